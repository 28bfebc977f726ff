//! # Data collector task
//!
//! Mirrors the blackboard and the event stream into a local log file, one
//! timestamped JSON line per tick, for the operator UI and post-run
//! analysis. Nothing in the control pipeline depends on this task; write
//! failures are reported once on stderr and the loop carries on.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use chrono::Local;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Internal
use crate::blackboard::{Blackboard, ControllerOutput, FilteredPose, VehicleState};
use crate::event_notifier::{EventWaiter, FaultKind};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Data collector parameters, loaded from `params/data_collector.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Params {
    /// Snapshot period in milliseconds.
    pub tick_period_ms: u64,

    /// Directory the collector log is written to.
    pub out_dir: String,
}

/// One snapshot line as serialised into the collector log.
#[derive(Debug, Serialize)]
struct SnapshotRecord {
    timestamp: String,
    truck_id: u32,
    vehicle_state: VehicleState,
    filtered_pose: FilteredPose,
    controller_output: ControllerOutput,
    last_event: FaultKind,
}

/// Everything the task needs, passed in by `main`.
pub struct DataCollectorCtx {
    pub params: Params,
    pub truck_id: u32,
    pub blackboard: Arc<Blackboard>,
    pub event_waiter: EventWaiter,
    pub stop: Arc<AtomicBool>,
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Task entry point.
pub fn run(mut ctx: DataCollectorCtx) {
    info!("DataCollector started");

    let mut file = open_collector_log(&ctx.params.out_dir, ctx.truck_id);

    let tick_period = Duration::from_millis(ctx.params.tick_period_ms);

    // The most recent event kind, shadowing the notifier so the log always
    // carries the last observed state even between events.
    let mut last_event = FaultKind::None;
    let mut write_error_reported = false;

    while !ctx.stop.load(Ordering::Relaxed) {
        let tick_start = Instant::now();

        let (vehicle_state, filtered_pose, controller_output) = {
            let bb = ctx.blackboard.lock();
            (bb.vehicle_state(), bb.filtered_pose(), bb.controller_output())
        };

        // Drain the pending events; the shadow keeps the newest kind
        loop {
            let polled = ctx.event_waiter.poll_event();
            if polled == FaultKind::None {
                break;
            }
            last_event = polled;
        }

        let now = Local::now();
        let record = SnapshotRecord {
            timestamp: now.to_rfc3339(),
            truck_id: ctx.truck_id,
            vehicle_state,
            filtered_pose,
            controller_output,
            last_event,
        };

        if let Some(f) = file.as_mut() {
            let line = match serde_json::to_string(&record) {
                Ok(json) => json,
                // A record that cannot serialise is a programming error in
                // the record type, not a runtime condition
                Err(e) => util::raise_error!("Cannot serialise a snapshot record: {}", e),
            };

            let result = writeln!(f, "[{}] {}", now.format("%Y-%m-%d %H:%M:%S"), line);
            if let Err(e) = result {
                if !write_error_reported {
                    eprintln!("DataCollector: cannot write the collector log: {}", e);
                    write_error_reported = true;
                }
            }
        }

        if let Some(remaining) = tick_period.checked_sub(tick_start.elapsed()) {
            thread::sleep(remaining);
        }
    }

    info!("DataCollector stopped");
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

/// Open the append-only collector log, reporting a failure once on stderr.
fn open_collector_log(out_dir: &str, truck_id: u32) -> Option<File> {
    if let Err(e) = fs::create_dir_all(out_dir) {
        eprintln!("DataCollector: cannot create {}: {}", out_dir, e);
        return None;
    }

    let mut path = PathBuf::from(out_dir);
    path.push(format!("cam_{}.log", truck_id));

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(f) => {
            info!("Collector log: {:?}", path);
            Some(f)
        }
        Err(e) => {
            eprintln!("DataCollector: cannot open {:?}: {}", path, e);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
