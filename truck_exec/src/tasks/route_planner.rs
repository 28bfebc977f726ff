//! # Route planner task
//!
//! Holds the current goal position from the mine management system and turns
//! the latest filtered pose into velocity and heading setpoints for the
//! navigation controller, one per control tick. The planner also reports the
//! filtered pose back to the management system on every tick.
//!
//! The only straight-line goal seeking is intended here: velocity ramps down
//! on approach, heading steers proportionally onto the bearing to the goal,
//! and inside the arrival tolerance the goal deactivates, which pins the
//! velocity setpoint at zero until a new goal arrives.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{error, info, warn};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Internal
use comms_if::{
    msg::{GoalMsg, PosePub},
    net::{BusClient, QoS},
    topics,
};
use util::maths::{dist_2d, wrap_deg_180};

use crate::blackboard::{Blackboard, FilteredPose, NavSetpoints};
use crate::bounded_buffer::SignalledBuffer;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Route planner parameters, loaded from `params/route_planner.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Control tick period in milliseconds.
    pub tick_period_ms: u64,

    /// Bus poll timeout at the start of each tick, in milliseconds.
    pub bus_poll_timeout_ms: u64,

    /// Distance to the goal below which the truck has arrived, in metres.
    pub arrival_tolerance_m: f64,

    /// Velocity setpoint ceiling in metres per second.
    pub v_max_ms: f64,

    /// Gain turning distance-to-goal into the approach velocity.
    pub approach_gain: f64,

    /// Proportional gain on the heading error.
    pub k_p_heading: f64,
}

/// The goal position, held privately by this task.
#[derive(Debug, Clone, Copy, Default)]
struct Goal {
    x_m: f64,
    y_m: f64,
    active: bool,
}

/// Everything the task needs, passed in by `main`.
pub struct RoutePlannerCtx {
    pub params: Params,
    pub truck_id: u32,
    pub bus: BusClient,
    pub blackboard: Arc<Blackboard>,
    pub filtered_queue: Arc<SignalledBuffer<FilteredPose>>,
    pub setpoint_queue: Arc<SignalledBuffer<NavSetpoints>>,
    pub stop: Arc<AtomicBool>,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Task entry point.
pub fn run(mut ctx: RoutePlannerCtx) {
    info!("RoutePlanner started");

    let goal_topic = topics::goal_position(ctx.truck_id);
    let pose_topic = topics::initial_position(ctx.truck_id);

    if let Err(e) = ctx.bus.subscribe(&goal_topic, QoS::AtLeastOnce) {
        error!("RoutePlanner could not subscribe to {}: {}", goal_topic, e);
        return;
    }

    let mut goal = Goal::default();
    let mut last_pose: Option<FilteredPose> = None;

    let tick_period = Duration::from_millis(ctx.params.tick_period_ms);
    let bus_poll_timeout = Duration::from_millis(ctx.params.bus_poll_timeout_ms);

    while !ctx.stop.load(Ordering::Relaxed) {
        let tick_start = Instant::now();

        // New goal from the management system?
        match ctx.bus.recv_timeout(bus_poll_timeout) {
            Ok(Some(msg)) => match GoalMsg::from_json(&String::from_utf8_lossy(&msg.payload)) {
                Ok(g) => {
                    goal = Goal {
                        x_m: g.x,
                        y_m: g.y,
                        active: true,
                    };
                    info!("New goal: ({}, {})", g.x, g.y);
                }
                Err(e) => warn!("Dropping an unparseable goal message: {}", e),
            },
            Ok(None) => (),
            Err(e) => {
                error!("RoutePlanner lost the bus, stopping: {}", e);
                break;
            }
        }

        // Drain one filtered pose if available
        {
            let mut queue = ctx.filtered_queue.lock();
            if let Some(pose) = queue.pop() {
                last_pose = Some(pose);
            }
        }

        if let Some(pose) = last_pose {
            // Report the pose to the management system
            let report = PosePub {
                truck_id: ctx.truck_id,
                x: pose.x_m,
                y: pose.y_m,
                ang: pose.heading_deg,
            };
            match report.to_json() {
                Ok(json) => {
                    if let Err(e) = ctx.bus.publish(&pose_topic, QoS::AtLeastOnce, json) {
                        warn!("Could not publish the pose report: {}", e);
                    }
                }
                Err(e) => warn!("Could not serialise the pose report: {}", e),
            }

            let setpoints = compute_setpoints(&mut goal, &pose, &ctx.params);

            // Blackboard first, queue second; the first guard is dropped
            // before the second is taken.
            {
                let mut bb = ctx.blackboard.lock();
                bb.set_nav_setpoints(setpoints);
            }
            ctx.blackboard.notify_all();

            {
                let mut queue = ctx.setpoint_queue.lock();
                queue.push(setpoints).ok();
            }
            ctx.setpoint_queue.notify_all();
        }

        // Tick pacing
        if let Some(remaining) = tick_period.checked_sub(tick_start.elapsed()) {
            thread::sleep(remaining);
        }
    }

    ctx.bus.disconnect();
    info!("RoutePlanner stopped");
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// The setpoint law.
///
/// An inactive goal pins the velocity at zero. Arrival within the tolerance
/// deactivates the goal, so exactly one tick observes the transition.
fn compute_setpoints(goal: &mut Goal, pose: &FilteredPose, params: &Params) -> NavSetpoints {
    if !goal.active {
        return NavSetpoints {
            velocity_ms: 0.0,
            heading_deg: pose.heading_deg,
        };
    }

    let dist_m = dist_2d(pose.x_m, pose.y_m, goal.x_m, goal.y_m);

    if dist_m < params.arrival_tolerance_m {
        goal.active = false;
        info!("Goal reached ({:.3} m away), holding position", dist_m);
        return NavSetpoints {
            velocity_ms: 0.0,
            heading_deg: pose.heading_deg,
        };
    }

    let desired_deg = (goal.y_m - pose.y_m)
        .atan2(goal.x_m - pose.x_m)
        .to_degrees();
    let error_deg = wrap_deg_180(desired_deg - pose.heading_deg);

    NavSetpoints {
        velocity_ms: params.v_max_ms.min(params.approach_gain * dist_m),
        heading_deg: wrap_deg_180(pose.heading_deg + params.k_p_heading * error_deg),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn default_params() -> Params {
        Params {
            tick_period_ms: 500,
            bus_poll_timeout_ms: 10,
            arrival_tolerance_m: 1.0,
            v_max_ms: 2.0,
            approach_gain: 0.8,
            k_p_heading: 2.0,
        }
    }

    fn pose(x: f64, y: f64, heading: f64) -> FilteredPose {
        FilteredPose {
            x_m: x,
            y_m: y,
            heading_deg: heading,
            ..Default::default()
        }
    }

    #[test]
    fn test_inactive_goal_pins_velocity_at_zero() {
        let params = default_params();
        let mut goal = Goal::default();

        let sp = compute_setpoints(&mut goal, &pose(3.0, 4.0, 30.0), &params);
        assert_eq!(sp.velocity_ms, 0.0);
        assert_eq!(sp.heading_deg, 30.0);
    }

    #[test]
    fn test_goal_seeking_law() {
        let params = default_params();
        let mut goal = Goal {
            x_m: 6.0,
            y_m: 8.0,
            active: true,
        };

        // From (3, 4) the goal is 5 m away on a 53.13 degree bearing; a
        // truck already on that bearing keeps it and the velocity saturates
        // at v_max since 0.8 * 5 exceeds it
        let bearing = (4.0f64).atan2(3.0).to_degrees();
        let sp = compute_setpoints(&mut goal, &pose(3.0, 4.0, bearing), &params);

        assert!(goal.active);
        assert_eq!(sp.velocity_ms, 2.0);
        assert!((sp.heading_deg - bearing).abs() < 1e-9);
    }

    #[test]
    fn test_heading_error_is_amplified_and_wrapped() {
        let params = default_params();
        let mut goal = Goal {
            x_m: 0.0,
            y_m: 10.0,
            active: true,
        };

        // Goal due north (90 deg), truck heading east (0 deg): error 90,
        // commanded heading 0 + 2 * 90 = 180 which wraps to the -180 bound
        let sp = compute_setpoints(&mut goal, &pose(0.0, 0.0, 0.0), &params);
        assert!((sp.heading_deg.abs() - 180.0).abs() < 1e-9);

        // Approach velocity below the ceiling: 0.8 * 10 = 8 caps at 2
        assert_eq!(sp.velocity_ms, 2.0);
    }

    #[test]
    fn test_approach_velocity_ramps_down() {
        let params = default_params();
        let mut goal = Goal {
            x_m: 2.0,
            y_m: 0.0,
            active: true,
        };

        // 2 m out: 0.8 * 2 = 1.6, under the ceiling
        let sp = compute_setpoints(&mut goal, &pose(0.0, 0.0, 0.0), &params);
        assert!((sp.velocity_ms - 1.6).abs() < 1e-9);
    }

    #[test]
    fn test_arrival_deactivates_goal_once() {
        let params = default_params();
        let mut goal = Goal {
            x_m: 0.1,
            y_m: 0.1,
            active: true,
        };

        // Inside the 1.0 m tolerance: one setpoint with zero velocity and
        // the goal goes inactive
        let sp = compute_setpoints(&mut goal, &pose(0.0, 0.0, 15.0), &params);
        assert_eq!(sp.velocity_ms, 0.0);
        assert_eq!(sp.heading_deg, 15.0);
        assert!(!goal.active);

        // Subsequent ticks stay at zero velocity via the inactive branch
        let sp = compute_setpoints(&mut goal, &pose(0.0, 0.0, 15.0), &params);
        assert_eq!(sp.velocity_ms, 0.0);
    }

    #[test]
    fn test_goal_is_acquired_in_finitely_many_ticks() {
        let params = default_params();
        let mut goal = Goal {
            x_m: 10.0,
            y_m: 0.0,
            active: true,
        };

        // Crude plant: step 0.4 m along the bearing each tick
        let mut position = (0.0f64, 0.0f64);
        let mut heading = 0.0f64;
        let mut ticks = 0;

        loop {
            let sp = compute_setpoints(&mut goal, &pose(position.0, position.1, heading), &params);
            if !goal.active {
                assert_eq!(sp.velocity_ms, 0.0);
                break;
            }

            heading = sp.heading_deg;
            position.0 += 0.4 * heading.to_radians().cos();
            position.1 += 0.4 * heading.to_radians().sin();

            ticks += 1;
            assert!(ticks < 100, "goal never acquired");
        }
    }
}
