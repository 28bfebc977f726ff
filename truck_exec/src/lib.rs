//! Onboard control software library for one autonomous haul truck.
//!
//! The executable in `main.rs` wires six long-running tasks together through
//! three shared objects:
//!
//! - the [`blackboard::Blackboard`], five last-value mailboxes under a single
//!   mutex and condition variable;
//! - two [`bounded_buffer::SignalledBuffer`] queues, carrying filtered poses
//!   from the sensor filter to the route planner and setpoints from the
//!   planner to the navigation controller;
//! - the [`event_notifier::EventNotifier`], a single-slot fault signal from
//!   the fault monitor to the controller, the command logic and the data
//!   collector.
//!
//! All tasks live in [`tasks`]; each one receives its dependencies explicitly
//! through a context struct and owns no state visible outside itself except
//! via the shared objects.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod blackboard;
pub mod bounded_buffer;
pub mod event_notifier;
pub mod sync;
pub mod tasks;
