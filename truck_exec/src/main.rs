//! Main truck-side executable entry point.
//!
//! # Architecture
//!
//! One process runs per physical vehicle. Execution proceeds as:
//!
//!     - Initialise the session and logging
//!     - Load parameters and apply environment overrides
//!     - Create the shared objects (blackboard, queues, event notifier)
//!     - Connect one bus client per bus-facing task
//!     - Launch the six task threads
//!     - Wait for shutdown and join every task
//!
//! All shared objects exist before any task starts and live until process
//! exit; tasks receive every dependency explicitly through their context
//! structs. A fatal configuration error (bad truck id, broker unreachable
//! within the retry budget) exits nonzero before any task thread is
//! spawned.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::info;
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

// Internal
use comms_if::net::{BusClient, NetParams};
use truck_lib::{
    blackboard::Blackboard,
    bounded_buffer::{OverflowPolicy, SignalledBuffer},
    event_notifier::EventNotifier,
    tasks::{cmd_logic, data_collector, fault_monitor, nav_ctrl, route_planner, sensor_filter},
};
use util::{
    logger::{self, LevelFilter},
    params,
    session::Session,
};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Environment variable naming the truck this instance serves.
const TRUCK_ID_ENV: &str = "CAMINHAO_ID";

/// Environment variable overriding the broker host from the parameter file.
const BROKER_HOST_ENV: &str = "BROKER_HOST";

/// Capacity of the filtered-pose queue between the sensor filter and the
/// route planner.
const FILTERED_QUEUE_CAPACITY: usize = 100;

/// Capacity of the setpoint queue between the route planner and the
/// navigation controller.
const SETPOINT_QUEUE_CAPACITY: usize = 8;

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    let session = Session::new("truck_exec", "sessions").wrap_err("Failed to create the session")?;

    logger::init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Autonomous Haul Truck Onboard Software\n");
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let mut net_params: NetParams =
        params::load_module("net").wrap_err("Could not load net params")?;
    let sensor_filter_params: sensor_filter::Params =
        params::load_module("sensor_filter").wrap_err("Could not load sensor filter params")?;
    let fault_monitor_params: fault_monitor::Params =
        params::load_module("fault_monitor").wrap_err("Could not load fault monitor params")?;
    let route_planner_params: route_planner::Params =
        params::load_module("route_planner").wrap_err("Could not load route planner params")?;
    let nav_ctrl_params: nav_ctrl::Params =
        params::load_module("nav_ctrl").wrap_err("Could not load nav ctrl params")?;
    let cmd_logic_params: cmd_logic::Params =
        params::load_module("cmd_logic").wrap_err("Could not load cmd logic params")?;
    let data_collector_params: data_collector::Params =
        params::load_module("data_collector").wrap_err("Could not load data collector params")?;

    info!("Exec parameters loaded");

    // ---- ENVIRONMENT ----

    let truck_id: u32 = match env::var(TRUCK_ID_ENV) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| eyre!("Invalid truck id {:?} in {}", raw, TRUCK_ID_ENV))?,
        Err(_) => 1,
    };

    if let Ok(host) = env::var(BROKER_HOST_ENV) {
        net_params.broker_host = host;
    }

    info!(
        "Serving truck {} via broker {}:{}\n",
        truck_id, net_params.broker_host, net_params.broker_port
    );

    // ---- SHARED OBJECTS ----

    let blackboard = Arc::new(Blackboard::new());
    let filtered_queue = Arc::new(SignalledBuffer::new(
        FILTERED_QUEUE_CAPACITY,
        OverflowPolicy::Overwrite,
    ));
    let setpoint_queue = Arc::new(SignalledBuffer::new(
        SETPOINT_QUEUE_CAPACITY,
        OverflowPolicy::Overwrite,
    ));
    let notifier = Arc::new(EventNotifier::new());
    let stop = Arc::new(AtomicBool::new(false));

    // Consumer cursors are taken before any task can fire so that no event
    // is ever missed by a late subscriber
    let nav_ctrl_waiter = notifier.waiter();
    let cmd_logic_waiter = notifier.waiter();
    let data_collector_waiter = notifier.waiter();

    info!("Shared objects initialised");

    // ---- INITIALISE NETWORK ----

    info!("Initialising network");

    let sensor_filter_bus = BusClient::connect(
        &net_params,
        &format!("sensor_filter_{}", truck_id),
        true,
    )
    .wrap_err("Failed to connect the SensorFilter bus client")?;
    info!("SensorFilter bus client connected");

    let fault_monitor_bus = BusClient::connect(
        &net_params,
        &format!("fault_monitor_{}", truck_id),
        true,
    )
    .wrap_err("Failed to connect the FaultMonitor bus client")?;
    info!("FaultMonitor bus client connected");

    let route_planner_bus = BusClient::connect(
        &net_params,
        &format!("route_planner_{}", truck_id),
        true,
    )
    .wrap_err("Failed to connect the RoutePlanner bus client")?;
    info!("RoutePlanner bus client connected");

    let cmd_logic_bus =
        BusClient::connect(&net_params, &format!("cmd_logic_{}", truck_id), true)
            .wrap_err("Failed to connect the CommandLogic bus client")?;
    info!("CommandLogic bus client connected");

    info!("Network initialisation complete\n");

    // ---- SHUTDOWN HANDLER ----

    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        })
        .wrap_err("Failed to install the shutdown handler")?;
    }

    // ---- LAUNCH TASKS ----

    info!("Launching tasks\n");

    let mut handles = Vec::new();

    handles.push(spawn_task("sensor_filter", {
        let ctx = sensor_filter::SensorFilterCtx {
            params: sensor_filter_params,
            truck_id,
            bus: sensor_filter_bus,
            blackboard: blackboard.clone(),
            filtered_queue: filtered_queue.clone(),
            stop: stop.clone(),
        };
        move || sensor_filter::run(ctx)
    })?);

    handles.push(spawn_task("fault_monitor", {
        let ctx = fault_monitor::FaultMonitorCtx {
            params: fault_monitor_params,
            truck_id,
            bus: fault_monitor_bus,
            notifier: notifier.clone(),
            stop: stop.clone(),
        };
        move || fault_monitor::run(ctx)
    })?);

    handles.push(spawn_task("route_planner", {
        let ctx = route_planner::RoutePlannerCtx {
            params: route_planner_params,
            truck_id,
            bus: route_planner_bus,
            blackboard: blackboard.clone(),
            filtered_queue: filtered_queue.clone(),
            setpoint_queue: setpoint_queue.clone(),
            stop: stop.clone(),
        };
        move || route_planner::run(ctx)
    })?);

    handles.push(spawn_task("nav_ctrl", {
        let ctx = nav_ctrl::NavCtrlCtx {
            params: nav_ctrl_params,
            blackboard: blackboard.clone(),
            setpoint_queue: setpoint_queue.clone(),
            event_waiter: nav_ctrl_waiter,
            stop: stop.clone(),
        };
        move || nav_ctrl::run(ctx)
    })?);

    handles.push(spawn_task("cmd_logic", {
        let ctx = cmd_logic::CmdLogicCtx {
            params: cmd_logic_params,
            truck_id,
            bus: cmd_logic_bus,
            blackboard: blackboard.clone(),
            event_waiter: cmd_logic_waiter,
            stop: stop.clone(),
        };
        move || cmd_logic::run(ctx)
    })?);

    handles.push(spawn_task("data_collector", {
        let ctx = data_collector::DataCollectorCtx {
            params: data_collector_params,
            truck_id,
            blackboard: blackboard.clone(),
            event_waiter: data_collector_waiter,
            stop: stop.clone(),
        };
        move || data_collector::run(ctx)
    })?);

    // ---- WAIT FOR SHUTDOWN ----

    for handle in handles {
        let name = handle.thread().name().unwrap_or("unnamed").to_string();
        handle
            .join()
            .map_err(|_| eyre!("Task {} panicked", name))?;
    }

    info!("End of execution");

    Ok(())
}

/// Spawn a named task thread.
fn spawn_task<F>(name: &str, task: F) -> Result<thread::JoinHandle<()>, Report>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.into())
        .spawn(task)
        .wrap_err_with(|| format!("Failed to spawn the {} task", name))
}
