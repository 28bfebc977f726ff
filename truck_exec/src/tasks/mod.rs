//! # Tasks
//!
//! The six long-running tasks of the onboard pipeline. Each module exposes a
//! `Params` struct loaded from its TOML file, a context struct naming every
//! dependency the task uses, and a `run` entry point executed on its own
//! thread. Dependencies are always passed in explicitly; there is no
//! module-level mutable state.
//!
//! Data flow:
//!
//! ```text
//! bus -> sensor_filter -> blackboard / filtered queue -> route_planner
//!     -> setpoint queue -> nav_ctrl -> blackboard -> cmd_logic -> bus
//! ```
//!
//! The fault monitor reads the bus independently and feeds the event
//! notifier, which short-circuits the controller and the command logic onto
//! the safe-stop branch. The data collector mirrors the blackboard and the
//! event stream into a local log file.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod cmd_logic;
pub mod data_collector;
pub mod fault_monitor;
pub mod nav_ctrl;
pub mod route_planner;
pub mod sensor_filter;
