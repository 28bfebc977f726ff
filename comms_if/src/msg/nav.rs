//! # Navigation Messages
//!
//! Types exchanged with the mine management system: goal positions in,
//! filtered poses out.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A goal position received on `atr/<id>/setpoint_posicao_final`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GoalMsg {
    pub x: f64,
    pub y: f64,
}

/// The filtered pose published on `atr/<id>/posicao_inicial`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosePub {
    pub truck_id: u32,
    pub x: f64,
    pub y: f64,
    pub ang: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GoalMsg {
    /// Parse a goal from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl PosePub {
    /// Serialise the pose to its JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
