//! # Topic Names
//!
//! Builders for the `atr/<id>/…` topic tree shared between the truck, the
//! simulator and the mine management system. Keeping them in one place means
//! no task ever assembles a topic string by hand.

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Raw sensor frames from the simulator (JSON).
pub fn sensor_raw(truck_id: u32) -> String {
    format!("atr/{}/sensor/raw", truck_id)
}

/// Temperature readings in degrees Celsius (integer text).
pub fn sensor_temperature(truck_id: u32) -> String {
    format!("atr/{}/sensor/i_temperatura", truck_id)
}

/// Electrical fault line ("0"|"1"|"true"|"false").
pub fn fault_electrical(truck_id: u32) -> String {
    format!("atr/{}/sensor/i_falha_eletrica", truck_id)
}

/// Hydraulic fault line ("0"|"1"|"true"|"false").
pub fn fault_hydraulic(truck_id: u32) -> String {
    format!("atr/{}/sensor/i_falha_hidraulica", truck_id)
}

/// Goal position from the mine management system (JSON `{x, y}`).
pub fn goal_position(truck_id: u32) -> String {
    format!("atr/{}/setpoint_posicao_final", truck_id)
}

/// Current filtered pose, published for the mine management system.
pub fn initial_position(truck_id: u32) -> String {
    format!("atr/{}/posicao_inicial", truck_id)
}

/// Acceleration actuator command (integer text in [-100, 100]).
pub fn actuator_accel(truck_id: u32) -> String {
    format!("atr/{}/o_aceleracao", truck_id)
}

/// Steering actuator command (integer text in [-180, 180]).
pub fn actuator_steer(truck_id: u32) -> String {
    format!("atr/{}/o_direcao", truck_id)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
