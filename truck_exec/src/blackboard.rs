//! # Blackboard
//!
//! The central last-value store of the onboard software: five record types,
//! one mutex, one condition variable. The contract is external locking, a
//! caller acquires the guard explicitly around one or more get/set calls so
//! that multi-record snapshots are consistent, drops the guard, and then
//! calls [`Blackboard::notify_all`]. Every get and set is a value copy, no
//! reference into the store ever escapes the guard.
//!
//! Each record has exactly one writer task:
//!
//! | Record | Writer |
//! |--------|--------|
//! | [`FilteredPose`] | SensorFilter |
//! | [`OperatorCommands`] | DataCollector (on behalf of a UI, if any) |
//! | [`VehicleState`] | CommandLogic |
//! | [`NavSetpoints`] | RoutePlanner |
//! | [`ControllerOutput`] | NavController |
//!
//! The blackboard deliberately keeps no history: staleness is handled with
//! the pose sequence counter and stamp, not by buffering.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::sync::{TrackedCondvar, TrackedGuard, TrackedMutex};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The pose produced by the sensor filter from one averaged batch of raw
/// frames.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FilteredPose {
    pub x_m: f64,
    pub y_m: f64,
    pub heading_deg: f64,
    pub temperature_c: f64,

    /// Mean session-time of the source batch, in seconds.
    pub stamp_s: f64,

    /// Monotone update counter, assigned by the blackboard on every set.
    pub seq: u64,
}

/// Commands from the local operator UI.
///
/// Without a UI attached nothing ever writes this record and the defaults
/// govern forever: manual mode, no rearm, zero demands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OperatorCommands {
    pub auto: bool,
    pub manual: bool,
    pub rearm: bool,

    /// Demanded acceleration in percent, [-100, 100].
    pub accel: f64,

    /// Demanded steering in degrees, [-180, 180].
    pub turn: f64,
}

/// The vehicle state as decided by the command logic.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub fault: bool,
    pub automatic: bool,
}

/// Velocity and heading references from the route planner.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NavSetpoints {
    pub velocity_ms: f64,
    pub heading_deg: f64,
}

/// Actuator demands computed by the navigation controller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ControllerOutput {
    /// Acceleration demand in percent, [-100, 100].
    pub accel_pct: f64,

    /// Steering demand in degrees, [-180, 180].
    pub steer_deg: f64,
}

/// The five mailboxes behind the single mutex.
#[derive(Debug, Default)]
struct Records {
    filtered_pose: FilteredPose,
    operator_commands: OperatorCommands,
    vehicle_state: VehicleState,
    nav_setpoints: NavSetpoints,
    controller_output: ControllerOutput,
}

/// The blackboard itself.
pub struct Blackboard {
    records: TrackedMutex<Records>,
    cv: TrackedCondvar,
}

/// A locked view of the blackboard.
pub struct BlackboardGuard<'a> {
    records: TrackedGuard<'a, Records>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for OperatorCommands {
    fn default() -> Self {
        Self {
            auto: false,
            manual: true,
            rearm: false,
            accel: 0.0,
            turn: 0.0,
        }
    }
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            fault: false,
            automatic: true,
        }
    }
}

impl Blackboard {
    pub fn new() -> Self {
        Self {
            records: TrackedMutex::new(Records::default()),
            cv: TrackedCondvar::new(),
        }
    }

    /// Acquire the blackboard lock.
    pub fn lock(&self) -> BlackboardGuard {
        BlackboardGuard {
            records: self.records.lock(),
        }
    }

    /// Release the guard, sleep until a producer notifies, and re-acquire.
    ///
    /// Callers must re-check their predicate on return.
    pub fn wait<'a>(&'a self, guard: BlackboardGuard<'a>) -> BlackboardGuard<'a> {
        BlackboardGuard {
            records: self.cv.wait(guard.records),
        }
    }

    /// As [`Blackboard::wait`] but bounded by `timeout`; the boolean is true
    /// if the wait timed out.
    pub fn wait_timeout<'a>(
        &'a self,
        guard: BlackboardGuard<'a>,
        timeout: Duration,
    ) -> (BlackboardGuard<'a>, bool) {
        let (records, timed_out) = self.cv.wait_timeout(guard.records, timeout);
        (BlackboardGuard { records }, timed_out)
    }

    /// Wake every waiter. Call after the guard has been dropped.
    pub fn notify_all(&self) {
        self.cv.notify_all();
    }
}

impl Default for Blackboard {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> BlackboardGuard<'a> {
    pub fn filtered_pose(&self) -> FilteredPose {
        self.records.filtered_pose
    }

    /// Store a new filtered pose, assigning the next sequence number.
    ///
    /// Returns the stored copy so the caller can forward the stamped record.
    pub fn set_filtered_pose(&mut self, mut pose: FilteredPose) -> FilteredPose {
        pose.seq = self.records.filtered_pose.seq + 1;
        self.records.filtered_pose = pose;
        pose
    }

    pub fn operator_commands(&self) -> OperatorCommands {
        self.records.operator_commands
    }

    pub fn set_operator_commands(&mut self, commands: OperatorCommands) {
        self.records.operator_commands = commands;
    }

    pub fn vehicle_state(&self) -> VehicleState {
        self.records.vehicle_state
    }

    pub fn set_vehicle_state(&mut self, state: VehicleState) {
        self.records.vehicle_state = state;
    }

    pub fn nav_setpoints(&self) -> NavSetpoints {
        self.records.nav_setpoints
    }

    pub fn set_nav_setpoints(&mut self, setpoints: NavSetpoints) {
        self.records.nav_setpoints = setpoints;
    }

    pub fn controller_output(&self) -> ControllerOutput {
        self.records.controller_output
    }

    pub fn set_controller_output(&mut self, output: ControllerOutput) {
        self.records.controller_output = output;
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_defaults() {
        let bb = Blackboard::new();
        let guard = bb.lock();

        assert!(guard.operator_commands().manual);
        assert!(!guard.operator_commands().auto);
        assert!(!guard.vehicle_state().fault);
        assert!(guard.vehicle_state().automatic);
        assert_eq!(guard.controller_output(), ControllerOutput::default());
        assert_eq!(guard.filtered_pose().seq, 0);
    }

    #[test]
    fn test_pose_seq_is_monotone() {
        let bb = Blackboard::new();

        for i in 1..=5u64 {
            let mut guard = bb.lock();
            let stored = guard.set_filtered_pose(FilteredPose {
                x_m: i as f64,
                ..Default::default()
            });
            assert_eq!(stored.seq, i);
        }

        assert_eq!(bb.lock().filtered_pose().seq, 5);
    }

    #[test]
    fn test_multi_record_snapshot_is_consistent() {
        let bb = Arc::new(Blackboard::new());

        // Seed a state satisfying the relation the reader checks
        {
            let mut guard = bb.lock();
            guard.set_vehicle_state(VehicleState {
                fault: false,
                automatic: true,
            });
            guard.set_controller_output(ControllerOutput {
                accel_pct: 50.0,
                steer_deg: 0.0,
            });
        }

        // A writer flips both records under one guard; a reader snapshotting
        // both under one guard must never see them disagree.
        let writer = {
            let bb = bb.clone();
            thread::spawn(move || {
                for i in 0..1000u64 {
                    let fault = i % 2 == 0;
                    let mut guard = bb.lock();
                    guard.set_vehicle_state(VehicleState {
                        fault,
                        automatic: !fault,
                    });
                    guard.set_controller_output(ControllerOutput {
                        accel_pct: if fault { 0.0 } else { 50.0 },
                        steer_deg: 0.0,
                    });
                    drop(guard);
                    bb.notify_all();
                }
            })
        };

        for _ in 0..1000 {
            let guard = bb.lock();
            let state = guard.vehicle_state();
            let output = guard.controller_output();
            drop(guard);

            if state.fault {
                assert_eq!(output.accel_pct, 0.0);
            } else {
                assert_eq!(output.accel_pct, 50.0);
            }
        }

        writer.join().unwrap();
    }

    #[test]
    fn test_wait_wakes_on_pose_update() {
        let bb = Arc::new(Blackboard::new());

        let waiter = {
            let bb = bb.clone();
            thread::spawn(move || {
                let mut guard = bb.lock();
                while guard.filtered_pose().seq == 0 {
                    let (g, _) = bb.wait_timeout(guard, Duration::from_millis(100));
                    guard = g;
                }
                guard.filtered_pose()
            })
        };

        thread::sleep(Duration::from_millis(20));
        {
            let mut guard = bb.lock();
            guard.set_filtered_pose(FilteredPose {
                x_m: 4.5,
                ..Default::default()
            });
        }
        bb.notify_all();

        let pose = waiter.join().unwrap();
        assert_eq!(pose.x_m, 4.5);
        assert_eq!(pose.seq, 1);
    }
}
