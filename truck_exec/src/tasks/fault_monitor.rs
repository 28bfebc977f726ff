//! # Fault monitor task
//!
//! Watches the temperature and fault-line topics, runs the threshold state
//! machine with hysteresis, and fires one event on the notifier for every
//! effective state transition. A watchdog on message arrival raises
//! [`FaultKind::SensorTimeout`] when the sensor feed goes quiet and
//! [`FaultKind::Normalized`] when it resumes.
//!
//! The state machine itself is a plain struct with one method per input so
//! the hysteresis and edge logic can be tested without a broker.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{error, info, warn};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Internal
use comms_if::{
    msg::{parse_fault_line, parse_temperature},
    net::{BusClient, QoS},
    topics,
};

use crate::event_notifier::{EventNotifier, FaultKind};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Fault monitor parameters, loaded from `params/fault_monitor.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Bus receive timeout in milliseconds; also the watchdog check period.
    pub recv_timeout_ms: u64,

    /// Sensor silence tolerated before a timeout fires, in milliseconds.
    pub sensor_timeout_ms: u64,

    /// Temperature above which the thermal fault rises, in Celsius.
    pub thermal_fault_set_c: f64,

    /// Temperature below which the thermal fault falls, in Celsius.
    pub thermal_fault_clear_c: f64,

    /// Temperature above which the thermal warning rises, in Celsius.
    pub thermal_warn_set_c: f64,

    /// Temperature below which the thermal warning falls, in Celsius.
    pub thermal_warn_clear_c: f64,
}

/// The five state bits and their thresholds.
///
/// Each `on_*` method applies one input and returns the event kind of the
/// resulting transition, or `None` when the state did not change. At most
/// one event results from one input.
pub struct FaultStateMachine {
    thermal_warn: bool,
    thermal_fault: bool,
    elec_fault: bool,
    hyd_fault: bool,
    sensor_lost: bool,

    fault_set_c: f64,
    fault_clear_c: f64,
    warn_set_c: f64,
    warn_clear_c: f64,
}

/// Everything the task needs, passed in by `main`.
pub struct FaultMonitorCtx {
    pub params: Params,
    pub truck_id: u32,
    pub bus: BusClient,
    pub notifier: Arc<EventNotifier>,
    pub stop: Arc<AtomicBool>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FaultStateMachine {
    pub fn new(params: &Params) -> Self {
        Self {
            thermal_warn: false,
            thermal_fault: false,
            elec_fault: false,
            hyd_fault: false,
            sensor_lost: false,
            fault_set_c: params.thermal_fault_set_c,
            fault_clear_c: params.thermal_fault_clear_c,
            warn_set_c: params.thermal_warn_set_c,
            warn_clear_c: params.thermal_warn_clear_c,
        }
    }

    /// Apply a temperature reading.
    ///
    /// The fault level is evaluated first; on the message where it changes
    /// the warning level is not evaluated, and a rising fault clears a
    /// standing warning silently so it cannot re-fire until the fault falls.
    pub fn on_temperature(&mut self, temperature_c: f64) -> Option<FaultKind> {
        if !self.thermal_fault && temperature_c > self.fault_set_c {
            self.thermal_fault = true;
            self.thermal_warn = false;
            return Some(FaultKind::ThermalFault);
        }

        if self.thermal_fault && temperature_c < self.fault_clear_c {
            self.thermal_fault = false;
            return Some(FaultKind::Normalized);
        }

        if self.thermal_fault {
            return None;
        }

        if !self.thermal_warn && temperature_c > self.warn_set_c {
            self.thermal_warn = true;
            return Some(FaultKind::ThermalWarning);
        }

        if self.thermal_warn && temperature_c < self.warn_clear_c {
            self.thermal_warn = false;
            return Some(FaultKind::Normalized);
        }

        None
    }

    /// Apply an electrical fault-line level.
    pub fn on_electrical(&mut self, active: bool) -> Option<FaultKind> {
        match (self.elec_fault, active) {
            (false, true) => {
                self.elec_fault = true;
                Some(FaultKind::ElectricalFault)
            }
            (true, false) => {
                self.elec_fault = false;
                Some(FaultKind::Normalized)
            }
            _ => None,
        }
    }

    /// Apply a hydraulic fault-line level.
    pub fn on_hydraulic(&mut self, active: bool) -> Option<FaultKind> {
        match (self.hyd_fault, active) {
            (false, true) => {
                self.hyd_fault = true;
                Some(FaultKind::HydraulicFault)
            }
            (true, false) => {
                self.hyd_fault = false;
                Some(FaultKind::Normalized)
            }
            _ => None,
        }
    }

    /// Note that a sensor message arrived.
    pub fn on_message(&mut self) -> Option<FaultKind> {
        if self.sensor_lost {
            self.sensor_lost = false;
            Some(FaultKind::Normalized)
        } else {
            None
        }
    }

    /// Note that the watchdog deadline has passed with no message.
    pub fn on_watchdog_expiry(&mut self) -> Option<FaultKind> {
        if self.sensor_lost {
            None
        } else {
            self.sensor_lost = true;
            Some(FaultKind::SensorTimeout)
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Task entry point.
pub fn run(mut ctx: FaultMonitorCtx) {
    info!("FaultMonitor started");

    let temperature_topic = topics::sensor_temperature(ctx.truck_id);
    let electrical_topic = topics::fault_electrical(ctx.truck_id);
    let hydraulic_topic = topics::fault_hydraulic(ctx.truck_id);

    for topic in [&temperature_topic, &electrical_topic, &hydraulic_topic] {
        if let Err(e) = ctx.bus.subscribe(topic, QoS::AtLeastOnce) {
            error!("FaultMonitor could not subscribe to {}: {}", topic, e);
            return;
        }
    }

    let mut machine = FaultStateMachine::new(&ctx.params);
    let mut last_message_at = Instant::now();

    let recv_timeout = Duration::from_millis(ctx.params.recv_timeout_ms);
    let sensor_timeout = Duration::from_millis(ctx.params.sensor_timeout_ms);

    while !ctx.stop.load(Ordering::Relaxed) {
        match ctx.bus.recv_timeout(recv_timeout) {
            Ok(Some(msg)) => {
                last_message_at = Instant::now();

                if let Some(kind) = machine.on_message() {
                    info!("Sensor feed resumed");
                    ctx.notifier.fire(kind);
                }

                let payload = String::from_utf8_lossy(&msg.payload).into_owned();

                let event = if msg.topic == temperature_topic {
                    match parse_temperature(&payload) {
                        Some(t) => machine.on_temperature(t),
                        None => {
                            warn!("Dropping an unparseable temperature payload: {:?}", payload);
                            None
                        }
                    }
                } else if msg.topic == electrical_topic {
                    match parse_fault_line(&payload) {
                        Some(level) => machine.on_electrical(level),
                        None => {
                            warn!("Dropping an unparseable electrical payload: {:?}", payload);
                            None
                        }
                    }
                } else if msg.topic == hydraulic_topic {
                    match parse_fault_line(&payload) {
                        Some(level) => machine.on_hydraulic(level),
                        None => {
                            warn!("Dropping an unparseable hydraulic payload: {:?}", payload);
                            None
                        }
                    }
                } else {
                    warn!("Message on unexpected topic {}", msg.topic);
                    None
                };

                if let Some(kind) = event {
                    info!("Fault transition: {}", kind);
                    ctx.notifier.fire(kind);
                }
            }
            Ok(None) => (),
            Err(e) => {
                error!("FaultMonitor lost the bus, stopping: {}", e);
                break;
            }
        }

        // Watchdog check, bounded to the receive timeout period
        if last_message_at.elapsed() > sensor_timeout {
            if let Some(kind) = machine.on_watchdog_expiry() {
                warn!(
                    "No sensor message for more than {} ms",
                    ctx.params.sensor_timeout_ms
                );
                ctx.notifier.fire(kind);
            }
        }
    }

    ctx.bus.disconnect();
    info!("FaultMonitor stopped");
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn default_params() -> Params {
        Params {
            recv_timeout_ms: 100,
            sensor_timeout_ms: 1000,
            thermal_fault_set_c: 120.0,
            thermal_fault_clear_c: 115.0,
            thermal_warn_set_c: 95.0,
            thermal_warn_clear_c: 90.0,
        }
    }

    fn run_sequence(machine: &mut FaultStateMachine, temps: &[f64]) -> Vec<FaultKind> {
        temps
            .iter()
            .filter_map(|t| machine.on_temperature(*t))
            .collect()
    }

    #[test]
    fn test_warning_hysteresis_with_default_thresholds() {
        let mut machine = FaultStateMachine::new(&default_params());

        // 94 is below the set threshold, 96 raises the warning, 94 sits in
        // the hysteresis band so nothing falls
        let events = run_sequence(&mut machine, &[94.0, 96.0, 94.0]);
        assert_eq!(events, vec![FaultKind::ThermalWarning]);

        // Dropping below the clear threshold normalises exactly once
        let events = run_sequence(&mut machine, &[91.0, 89.0, 88.0]);
        assert_eq!(events, vec![FaultKind::Normalized]);
    }

    #[test]
    fn test_warning_counts_with_no_hysteresis_band() {
        // With set == clear the 94,96,94 sequence fires one warning and one
        // normalization, and 94,96,91,89 behaves identically
        let params = Params {
            thermal_warn_clear_c: 95.0,
            ..default_params()
        };

        let mut machine = FaultStateMachine::new(&params);
        let events = run_sequence(&mut machine, &[94.0, 96.0, 94.0]);
        assert_eq!(events, vec![FaultKind::ThermalWarning, FaultKind::Normalized]);

        let mut machine = FaultStateMachine::new(&params);
        let events = run_sequence(&mut machine, &[94.0, 96.0, 91.0, 89.0]);
        assert_eq!(events, vec![FaultKind::ThermalWarning, FaultKind::Normalized]);
    }

    #[test]
    fn test_fault_hysteresis_sequence() {
        let mut machine = FaultStateMachine::new(&default_params());

        // 125 -> fault; 118 inside the band -> nothing; 100 -> normalized;
        // 80 -> nothing. No warning fires anywhere.
        let events = run_sequence(&mut machine, &[125.0, 118.0, 100.0, 80.0]);
        assert_eq!(events, vec![FaultKind::ThermalFault, FaultKind::Normalized]);
    }

    #[test]
    fn test_fault_suppresses_standing_warning() {
        let mut machine = FaultStateMachine::new(&default_params());

        assert_eq!(
            machine.on_temperature(100.0),
            Some(FaultKind::ThermalWarning)
        );
        // The rising fault swallows the warning without an extra event
        assert_eq!(machine.on_temperature(125.0), Some(FaultKind::ThermalFault));
        // Warm readings while the fault holds change nothing
        assert_eq!(machine.on_temperature(119.0), None);
        // The fault falls; the warning machine is skipped on this message
        assert_eq!(machine.on_temperature(114.0), Some(FaultKind::Normalized));
        // A hot reading may now raise the warning again
        assert_eq!(
            machine.on_temperature(100.0),
            Some(FaultKind::ThermalWarning)
        );
    }

    #[test]
    fn test_electrical_and_hydraulic_edges() {
        let mut machine = FaultStateMachine::new(&default_params());

        assert_eq!(machine.on_electrical(true), Some(FaultKind::ElectricalFault));
        assert_eq!(machine.on_electrical(true), None);
        assert_eq!(machine.on_electrical(false), Some(FaultKind::Normalized));
        assert_eq!(machine.on_electrical(false), None);

        assert_eq!(machine.on_hydraulic(true), Some(FaultKind::HydraulicFault));
        assert_eq!(machine.on_hydraulic(false), Some(FaultKind::Normalized));
    }

    #[test]
    fn test_watchdog_fires_exactly_once() {
        let mut machine = FaultStateMachine::new(&default_params());

        assert_eq!(
            machine.on_watchdog_expiry(),
            Some(FaultKind::SensorTimeout)
        );
        // Continued silence does not re-fire
        assert_eq!(machine.on_watchdog_expiry(), None);
        assert_eq!(machine.on_watchdog_expiry(), None);

        // One message afterwards normalises exactly once
        assert_eq!(machine.on_message(), Some(FaultKind::Normalized));
        assert_eq!(machine.on_message(), None);
    }
}
