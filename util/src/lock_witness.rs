//! # Lock witness
//!
//! Thread-local accounting of the shared-object locks currently held by the
//! calling thread. Every guard over a shared mutex registers here on
//! acquisition and deregisters on release, and the bus client asserts that
//! the count is zero before any publish or subscribe call. Holding a shared
//! lock across bus I/O would stretch a bounded critical section over an
//! unbounded network wait, so a nonzero count at a bus call site is a
//! programming error and aborts the process.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::cell::Cell;

// ---------------------------------------------------------------------------
// STATICS
// ---------------------------------------------------------------------------

thread_local! {
    /// Number of shared-object locks held by this thread.
    static HELD_LOCKS: Cell<usize> = const { Cell::new(0) };
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Record the acquisition of a shared-object lock by this thread.
pub fn register_acquire() {
    HELD_LOCKS.with(|h| h.set(h.get() + 1));
}

/// Record the release of a shared-object lock by this thread.
pub fn register_release() {
    HELD_LOCKS.with(|h| {
        let count = h.get();
        if count == 0 {
            crate::raise_error!("Lock witness underflow: release without acquire");
        }
        h.set(count - 1);
    });
}

/// Number of shared-object locks currently held by this thread.
pub fn held_count() -> usize {
    HELD_LOCKS.with(|h| h.get())
}

/// Assert that this thread holds no shared-object lock.
///
/// `context` names the operation being attempted, for the log message.
pub fn assert_none_held(context: &str) {
    let held = held_count();
    if held != 0 {
        crate::raise_error!(
            "{} attempted while {} shared lock(s) held by this thread",
            context,
            held
        );
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
