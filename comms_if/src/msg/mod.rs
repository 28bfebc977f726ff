//! # Wire Message Types
//!
//! Every payload crossing the bus is parsed into a typed value at this
//! boundary. Payloads which do not parse are rejected here with a `None` or
//! an error, never half-interpreted further in.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod nav;
mod sensor;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

pub use nav::*;
pub use sensor::*;
