//! # Tracked synchronisation primitives
//!
//! Thin wrappers over `std::sync::{Mutex, Condvar}` whose guards register
//! with the [`util::lock_witness`] so that the bus client can assert no
//! shared lock is held across I/O. A poisoned mutex means another task
//! panicked inside a critical section, which is an unrecoverable invariant
//! violation for this process.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::ops::{Deref, DerefMut};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use util::lock_witness;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A mutex whose guards are visible to the lock witness.
pub struct TrackedMutex<T> {
    inner: Mutex<T>,
}

/// A guard over a [`TrackedMutex`].
///
/// The inner guard is surrendered to the condvar for the duration of a wait,
/// hence the `Option`; the lock itself stays owned by this thread throughout,
/// so the witness registration is held across waits.
pub struct TrackedGuard<'a, T> {
    inner: Option<MutexGuard<'a, T>>,
}

/// A condition variable operating on [`TrackedGuard`]s.
pub struct TrackedCondvar {
    inner: Condvar,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<T> TrackedMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the mutex, registering with the lock witness.
    pub fn lock(&self) -> TrackedGuard<T> {
        let guard = match self.inner.lock() {
            Ok(g) => g,
            Err(_) => util::raise_error!("Shared mutex poisoned by a panicking task"),
        };

        lock_witness::register_acquire();

        TrackedGuard { inner: Some(guard) }
    }
}

impl<'a, T> Deref for TrackedGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self.inner.as_ref() {
            Some(g) => g,
            None => util::raise_error!("Guard accessed while suspended in a condvar wait"),
        }
    }
}

impl<'a, T> DerefMut for TrackedGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        match self.inner.as_mut() {
            Some(g) => g,
            None => util::raise_error!("Guard accessed while suspended in a condvar wait"),
        }
    }
}

impl<'a, T> Drop for TrackedGuard<'a, T> {
    fn drop(&mut self) {
        // The inner guard unlocks on its own drop, this only balances the
        // witness count.
        lock_witness::register_release();
    }
}

impl TrackedCondvar {
    pub fn new() -> Self {
        Self {
            inner: Condvar::new(),
        }
    }

    /// Atomically release the guard, sleep, and re-acquire on wake.
    ///
    /// Callers must re-check their predicate on return: wake-ups can be
    /// spurious.
    pub fn wait<'a, T>(&self, mut guard: TrackedGuard<'a, T>) -> TrackedGuard<'a, T> {
        let inner = match guard.inner.take() {
            Some(g) => g,
            None => util::raise_error!("Condvar wait on a guard already suspended"),
        };

        let inner = match self.inner.wait(inner) {
            Ok(g) => g,
            Err(_) => util::raise_error!("Shared mutex poisoned by a panicking task"),
        };

        guard.inner = Some(inner);
        guard
    }

    /// As [`TrackedCondvar::wait`] but bounded by `timeout`.
    ///
    /// The boolean is true if the wait timed out.
    pub fn wait_timeout<'a, T>(
        &self,
        mut guard: TrackedGuard<'a, T>,
        timeout: Duration,
    ) -> (TrackedGuard<'a, T>, bool) {
        let inner = match guard.inner.take() {
            Some(g) => g,
            None => util::raise_error!("Condvar wait on a guard already suspended"),
        };

        let (inner, result) = match self.inner.wait_timeout(inner, timeout) {
            Ok((g, r)) => (g, r),
            Err(_) => util::raise_error!("Shared mutex poisoned by a panicking task"),
        };

        guard.inner = Some(inner);
        (guard, result.timed_out())
    }

    /// Wake every thread waiting on this condvar.
    pub fn notify_all(&self) {
        self.inner.notify_all();
    }
}

impl Default for TrackedCondvar {
    fn default() -> Self {
        Self::new()
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
    fn test_guard_registers_with_witness() {
        let mutex = TrackedMutex::new(0u32);

        assert_eq!(util::lock_witness::held_count(), 0);
        {
            let mut guard = mutex.lock();
            *guard += 1;
            assert_eq!(util::lock_witness::held_count(), 1);
        }
        assert_eq!(util::lock_witness::held_count(), 0);
        assert_eq!(*mutex.lock(), 1);
    }

    #[test]
    fn test_wait_timeout_reports_timeout() {
        let mutex = TrackedMutex::new(());
        let cv = TrackedCondvar::new();

        let guard = mutex.lock();
        let (_guard, timed_out) = cv.wait_timeout(guard, Duration::from_millis(10));
        assert!(timed_out);
    }

    #[test]
    fn test_notify_wakes_waiter() {
        let shared = Arc::new((TrackedMutex::new(false), TrackedCondvar::new()));

        let waiter = {
            let shared = shared.clone();
            thread::spawn(move || {
                let (mutex, cv) = &*shared;
                let mut guard = mutex.lock();
                while !*guard {
                    let (g, _) = cv.wait_timeout(guard, Duration::from_millis(100));
                    guard = g;
                }
                true
            })
        };

        {
            let (mutex, cv) = &*shared;
            let mut guard = mutex.lock();
            *guard = true;
            drop(guard);
            cv.notify_all();
        }

        assert!(waiter.join().unwrap());
    }
}
