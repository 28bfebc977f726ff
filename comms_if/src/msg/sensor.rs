//! # Sensor Messages
//!
//! Types for the frames the simulator publishes on the `sensor` subtree.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A raw telemetry frame as published by the simulator on
/// `atr/<id>/sensor/raw`.
///
/// Field names match the wire format exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSensorFrame {
    pub truck_id: TruckId,
    pub i_posicao_x: f64,
    pub i_posicao_y: f64,
    pub i_angulo_x: f64,
    pub i_temperatura: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The truck identifier as it appears on the wire.
///
/// The simulator is inconsistent about the type of `truck_id`, publishing it
/// both as an integer and as a string depending on the producer. Both forms
/// are accepted here and compared numerically; anything else fails to parse
/// and the frame is skipped by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TruckId {
    Number(u32),
    Text(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TruckId {
    /// Return true if this wire identifier names the given truck.
    pub fn matches(&self, truck_id: u32) -> bool {
        match self {
            TruckId::Number(n) => *n == truck_id,
            TruckId::Text(s) => s.trim().parse::<u32>().map(|n| n == truck_id).unwrap_or(false),
        }
    }
}

impl RawSensorFrame {
    /// Parse a frame from its JSON wire form.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Parse a boolean fault-line payload.
///
/// Accepted forms are `"0"`, `"1"`, `"true"` and `"false"`; anything else is
/// rejected with `None` and the frame is dropped by the caller.
pub fn parse_fault_line(payload: &str) -> Option<bool> {
    match payload.trim() {
        "0" | "false" => Some(false),
        "1" | "true" => Some(true),
        _ => None,
    }
}

/// Parse a temperature payload in degrees Celsius.
///
/// The nominal wire form is integer text, but fractional readings are
/// accepted as well.
pub fn parse_temperature(payload: &str) -> Option<f64> {
    payload.trim().parse::<f64>().ok().filter(|t| t.is_finite())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_raw_frame_duck_typed_id() {
        let with_int = r#"{"truck_id": 1, "i_posicao_x": 1.0, "i_posicao_y": 2.0,
            "i_angulo_x": 3.0, "i_temperatura": 70}"#;
        let with_str = r#"{"truck_id": "1", "i_posicao_x": 1.0, "i_posicao_y": 2.0,
            "i_angulo_x": 3.0, "i_temperatura": 70}"#;

        let frame = RawSensorFrame::from_json(with_int).unwrap();
        assert!(frame.truck_id.matches(1));
        assert!(!frame.truck_id.matches(2));

        let frame = RawSensorFrame::from_json(with_str).unwrap();
        assert!(frame.truck_id.matches(1));
        assert_eq!(frame.i_temperatura, 70.0);
    }

    #[test]
    fn test_raw_frame_rejects_garbage() {
        assert!(RawSensorFrame::from_json("not json").is_err());
        assert!(RawSensorFrame::from_json(r#"{"truck_id": 1}"#).is_err());
        // A non-numeric string id parses but matches no truck
        let frame = RawSensorFrame::from_json(
            r#"{"truck_id": "abc", "i_posicao_x": 0, "i_posicao_y": 0,
                "i_angulo_x": 0, "i_temperatura": 0}"#,
        )
        .unwrap();
        assert!(!frame.truck_id.matches(1));
    }

    #[test]
    fn test_parse_fault_line() {
        assert_eq!(parse_fault_line("0"), Some(false));
        assert_eq!(parse_fault_line("1"), Some(true));
        assert_eq!(parse_fault_line("true"), Some(true));
        assert_eq!(parse_fault_line("false"), Some(false));
        assert_eq!(parse_fault_line(" 1 "), Some(true));
        assert_eq!(parse_fault_line("2"), None);
        assert_eq!(parse_fault_line(""), None);
    }

    #[test]
    fn test_parse_temperature() {
        assert_eq!(parse_temperature("125"), Some(125.0));
        assert_eq!(parse_temperature("-10"), Some(-10.0));
        assert_eq!(parse_temperature("95.5"), Some(95.5));
        assert_eq!(parse_temperature("NaN"), None);
        assert_eq!(parse_temperature("hot"), None);
    }
}
