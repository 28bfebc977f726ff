//! # Communications Interface
//!
//! This crate defines the interface between the truck onboard software and
//! the external world: the MQTT message bus carrying sensor frames in and
//! actuator commands out, the wire format of every message crossing that
//! bus, and the topic names the fleet agrees on.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod msg;
pub mod net;
pub mod topics;
