//! # Command logic task
//!
//! The mode arbiter and actuator publisher. Runs the fastest tick in the
//! pipeline, polling the event notifier, arbitrating between manual,
//! automatic and fault modes, and publishing the final acceleration and
//! steering demands to the bus as integer text.
//!
//! Transfers between manual and automatic are bumpless: the published
//! command slews from its previous value toward the new target by at most
//! one step per tick. The transfer into fault is deliberately not bumpless,
//! the output snaps to (0, 0) on the same tick the event is observed.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::{info, warn};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Internal
use comms_if::{
    net::{BusClient, QoS},
    topics,
};

use crate::blackboard::{Blackboard, ControllerOutput, OperatorCommands, VehicleState};
use crate::event_notifier::{EventWaiter, FaultKind};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Command logic parameters, loaded from `params/cmd_logic.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Control tick period in milliseconds.
    pub tick_period_ms: u64,

    /// Largest change of the published acceleration per tick, in percent.
    pub accel_slew_pct: f64,

    /// Largest change of the published steering per tick, in degrees.
    pub steer_slew_deg: f64,
}

/// Everything the task needs, passed in by `main`.
pub struct CmdLogicCtx {
    pub params: Params,
    pub truck_id: u32,
    pub bus: BusClient,
    pub blackboard: Arc<Blackboard>,
    pub event_waiter: EventWaiter,
    pub stop: Arc<AtomicBool>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The vehicle mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Manual,
    Automatic,
    Fault,
}

// ---------------------------------------------------------------------------
// MODE MACHINE
// ---------------------------------------------------------------------------

/// The mode state machine.
///
/// Fault entry happens on any serious event kind and can only be left
/// through a `Normalized` event followed by an operator rearm; the rearm is
/// consumed on the transition so a held-down rearm cannot skip a later
/// fault. Manual and automatic follow the rising edges of the operator's
/// mode switches.
pub struct ModeMachine {
    mode: Mode,
    normalized_seen: bool,
    rearm_consumed: bool,
    prev_auto: bool,
    prev_manual: bool,
}

impl ModeMachine {
    /// Initial mode per the operator command defaults: manual unless the
    /// operator has already selected automatic.
    pub fn new(commands: &OperatorCommands) -> Self {
        Self {
            mode: if commands.manual {
                Mode::Manual
            } else {
                Mode::Automatic
            },
            normalized_seen: false,
            rearm_consumed: false,
            prev_auto: commands.auto,
            prev_manual: commands.manual,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Feed one notifier event into the machine.
    pub fn on_event(&mut self, kind: FaultKind) {
        match kind {
            k if k.is_serious() => {
                if self.mode != Mode::Fault {
                    warn!("Entering fault mode: {}", k);
                }
                self.mode = Mode::Fault;
                self.normalized_seen = false;
            }
            FaultKind::Normalized => {
                if self.mode == Mode::Fault {
                    self.normalized_seen = true;
                    info!("Fault source normalized, awaiting rearm");
                }
            }
            _ => (),
        }
    }

    /// Feed the operator command snapshot for this tick.
    pub fn on_commands(&mut self, commands: &OperatorCommands) {
        match self.mode {
            Mode::Fault => {
                if self.normalized_seen && commands.rearm && !self.rearm_consumed {
                    self.mode = Mode::Manual;
                    self.normalized_seen = false;
                    self.rearm_consumed = true;
                    info!("Rearm accepted, returning to manual mode");
                }
            }
            Mode::Manual => {
                if commands.auto && !self.prev_auto {
                    self.mode = Mode::Automatic;
                    info!("Operator selected automatic mode");
                }
            }
            Mode::Automatic => {
                if commands.manual && !self.prev_manual {
                    self.mode = Mode::Manual;
                    info!("Operator selected manual mode");
                }
            }
        }

        if !commands.rearm {
            self.rearm_consumed = false;
        }
        self.prev_auto = commands.auto;
        self.prev_manual = commands.manual;
    }

    /// The vehicle state snapshot this mode maps to.
    pub fn vehicle_state(&self) -> VehicleState {
        match self.mode {
            Mode::Fault => VehicleState {
                fault: true,
                automatic: false,
            },
            Mode::Automatic => VehicleState {
                fault: false,
                automatic: true,
            },
            Mode::Manual => VehicleState {
                fault: false,
                automatic: false,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Task entry point.
pub fn run(mut ctx: CmdLogicCtx) {
    info!("CommandLogic started");

    let accel_topic = topics::actuator_accel(ctx.truck_id);
    let steer_topic = topics::actuator_steer(ctx.truck_id);

    let tick_period = Duration::from_millis(ctx.params.tick_period_ms);

    let mut machine = {
        let bb = ctx.blackboard.lock();
        ModeMachine::new(&bb.operator_commands())
    };

    // The previously published command, the base of the slew
    let mut published = (0.0f64, 0.0f64);

    while !ctx.stop.load(Ordering::Relaxed) {
        let tick_start = Instant::now();

        // 1) Events first, drained to exhaustion, so a fault queued behind
        //    a normalization still wins the tick it arrived in
        loop {
            let event = ctx.event_waiter.poll_event();
            if event == FaultKind::None {
                break;
            }
            machine.on_event(event);
        }

        // 2) One consistent snapshot of controller output and operator
        //    commands
        let (controller_output, commands) = {
            let bb = ctx.blackboard.lock();
            (bb.controller_output(), bb.operator_commands())
        };

        machine.on_commands(&commands);

        // 3) Choose the emitted command
        let (accel_pct, steer_deg) = choose_command(
            machine.mode(),
            &controller_output,
            &commands,
            published,
            &ctx.params,
        );

        // 4) Publish as integer text
        let accel_text = (accel_pct.round() as i64).to_string();
        let steer_text = (steer_deg.round() as i64).to_string();

        if let Err(e) = ctx.bus.publish(&accel_topic, QoS::AtLeastOnce, accel_text) {
            warn!("Could not publish the acceleration demand: {}", e);
        }
        if let Err(e) = ctx.bus.publish(&steer_topic, QoS::AtLeastOnce, steer_text) {
            warn!("Could not publish the steering demand: {}", e);
        }

        published = (accel_pct, steer_deg);

        // 5) Vehicle state snapshot
        {
            let mut bb = ctx.blackboard.lock();
            bb.set_vehicle_state(machine.vehicle_state());
        }
        ctx.blackboard.notify_all();

        // Tick pacing
        if let Some(remaining) = tick_period.checked_sub(tick_start.elapsed()) {
            thread::sleep(remaining);
        } else {
            warn!(
                "CommandLogic tick overran by {:.06} s",
                tick_start.elapsed().as_secs_f64() - tick_period.as_secs_f64()
            );
        }
    }

    ctx.bus.disconnect();
    info!("CommandLogic stopped");
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Choose the command to emit this tick.
///
/// Fault mode snaps to the safe stop. Automatic passes the controller output
/// through, clamped. Manual derives the target from the operator and slews
/// there from the previously published command, which makes the transfer out
/// of automatic bumpless.
fn choose_command(
    mode: Mode,
    controller_output: &ControllerOutput,
    commands: &OperatorCommands,
    published: (f64, f64),
    params: &Params,
) -> (f64, f64) {
    match mode {
        Mode::Fault => (0.0, 0.0),
        Mode::Automatic => (
            controller_output.accel_pct.clamp(-100.0, 100.0),
            controller_output.steer_deg.clamp(-180.0, 180.0),
        ),
        Mode::Manual => (
            slew_toward(
                published.0,
                commands.accel.clamp(-100.0, 100.0),
                params.accel_slew_pct,
            ),
            slew_toward(
                published.1,
                commands.turn.clamp(-180.0, 180.0),
                params.steer_slew_deg,
            ),
        ),
    }
}

/// Move `current` toward `target` by at most `max_step`.
fn slew_toward(current: f64, target: f64, max_step: f64) -> f64 {
    current + (target - current).clamp(-max_step, max_step)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
