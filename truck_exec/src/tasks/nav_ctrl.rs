//! # Navigation controller task
//!
//! A blocking pull-style controller: the control thread sleeps on the
//! setpoint queue's condition variable, consumes one setpoint per wake, and
//! writes a [`ControllerOutput`] back onto the blackboard. A companion
//! thread blocks on the event notifier and maintains the fault latch.
//!
//! The latch is one-way from this task's point of view: any serious fault
//! sets it and `Normalized` alone never clears it. It is released only when
//! the vehicle state published by the command logic shows the fault falling,
//! which happens after the operator rearms.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{info, warn};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// Internal
use util::maths::wrap_deg_180;

use crate::blackboard::{Blackboard, ControllerOutput, FilteredPose, NavSetpoints};
use crate::bounded_buffer::SignalledBuffer;
use crate::event_notifier::{EventWaiter, FaultKind};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Navigation controller parameters, loaded from `params/nav_ctrl.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Proportional gain on the velocity error.
    pub k_p_vel: f64,

    /// Proportional gain on the heading error.
    pub k_p_heading: f64,

    /// Condvar wait timeout, bounding the stop-flag check period, in
    /// milliseconds.
    pub wait_timeout_ms: u64,
}

/// Speed estimate from successive pose snapshots.
///
/// The estimate is the travelled distance over elapsed batch time between
/// two distinct pose records; it holds its last value while the pose stands
/// still in time.
pub struct SpeedEstimator {
    prev: Option<FilteredPose>,
    estimate_ms: f64,
}

/// Everything the task needs, passed in by `main`.
pub struct NavCtrlCtx {
    pub params: Params,
    pub blackboard: Arc<Blackboard>,
    pub setpoint_queue: Arc<SignalledBuffer<NavSetpoints>>,
    pub event_waiter: EventWaiter,
    pub stop: Arc<AtomicBool>,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SpeedEstimator {
    pub fn new() -> Self {
        Self {
            prev: None,
            estimate_ms: 0.0,
        }
    }

    /// Update the estimate from the latest pose snapshot.
    pub fn update(&mut self, pose: &FilteredPose) -> f64 {
        if let Some(prev) = self.prev {
            if pose.seq != prev.seq {
                let dt_s = pose.stamp_s - prev.stamp_s;
                if dt_s > 0.0 {
                    self.estimate_ms =
                        util::maths::dist_2d(prev.x_m, prev.y_m, pose.x_m, pose.y_m) / dt_s;
                }
                self.prev = Some(*pose);
            }
        } else {
            self.prev = Some(*pose);
        }

        self.estimate_ms
    }
}

impl Default for SpeedEstimator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Task entry point.
pub fn run(ctx: NavCtrlCtx) {
    info!("NavController started");

    let in_fault = Arc::new(AtomicBool::new(false));

    // Companion thread: blocks on the notifier and maintains the latch
    let event_handle = {
        let in_fault = in_fault.clone();
        let stop = ctx.stop.clone();
        let waiter = ctx.event_waiter;

        match thread::Builder::new()
            .name("nav_ctrl_events".into())
            .spawn(move || event_loop(waiter, in_fault, stop))
        {
            Ok(h) => h,
            Err(e) => util::raise_error!("Cannot spawn the NavController event thread: {}", e),
        }
    };

    let wait_timeout = Duration::from_millis(ctx.params.wait_timeout_ms);
    let mut estimator = SpeedEstimator::new();
    let mut prev_vehicle_fault = false;

    'control: while !ctx.stop.load(Ordering::Relaxed) {
        // Sleep on the queue until a setpoint is available
        let setpoints = {
            let mut queue = ctx.setpoint_queue.lock();
            loop {
                if let Some(sp) = queue.pop() {
                    break sp;
                }
                if ctx.stop.load(Ordering::Relaxed) {
                    break 'control;
                }
                let (guard, _) = ctx.setpoint_queue.wait_timeout(queue, wait_timeout);
                queue = guard;
            }
        };

        let (pose, vehicle_fault) = {
            let bb = ctx.blackboard.lock();
            (bb.filtered_pose(), bb.vehicle_state().fault)
        };

        // The latch releases only on the fault flag falling, i.e. after the
        // command logic has consumed an operator rearm.
        if prev_vehicle_fault && !vehicle_fault && in_fault.load(Ordering::Relaxed) {
            in_fault.store(false, Ordering::Relaxed);
            info!("Fault hold released after rearm");
        }
        prev_vehicle_fault = vehicle_fault;

        let output = if in_fault.load(Ordering::Relaxed) {
            ControllerOutput::default()
        } else {
            let est_speed_ms = estimator.update(&pose);
            control_law(&setpoints, &pose, est_speed_ms, &ctx.params)
        };

        {
            let mut bb = ctx.blackboard.lock();
            bb.set_controller_output(output);
        }
        ctx.blackboard.notify_all();
    }

    event_handle.join().ok();
    info!("NavController stopped");
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// The control law: proportional on the velocity error, proportional on the
/// wrapped heading error, both saturated at the actuator limits.
fn control_law(
    setpoints: &NavSetpoints,
    pose: &FilteredPose,
    est_speed_ms: f64,
    params: &Params,
) -> ControllerOutput {
    ControllerOutput {
        accel_pct: (params.k_p_vel * (setpoints.velocity_ms - est_speed_ms)).clamp(-100.0, 100.0),
        steer_deg: (params.k_p_heading * wrap_deg_180(setpoints.heading_deg - pose.heading_deg))
            .clamp(-180.0, 180.0),
    }
}

/// Companion loop maintaining the fault latch from notifier events.
fn event_loop(mut waiter: EventWaiter, in_fault: Arc<AtomicBool>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match waiter.wait_event_timeout(Duration::from_millis(100)) {
            Some(kind) if kind.is_serious() => {
                if !in_fault.swap(true, Ordering::Relaxed) {
                    warn!("Entering fault hold: {}", kind);
                }
            }
            Some(FaultKind::ThermalWarning) => {
                info!("Thermal warning received");
            }
            Some(FaultKind::Normalized) => {
                info!("Normalization received, fault hold retained until rearm");
            }
            Some(FaultKind::None) => {
                util::raise_error!("Received the None event kind from the notifier");
            }
            Some(_) | None => (),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
