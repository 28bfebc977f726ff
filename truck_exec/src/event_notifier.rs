//! # Event notifier
//!
//! The fault signal path from the fault monitor to the rest of the pipeline.
//! [`EventNotifier::fire`] publishes a tagged [`FaultKind`] to every
//! registered [`EventWaiter`]; the navigation controller's event thread, the
//! command logic's per-tick poll and the data collector's shadow poll each
//! hold one.
//!
//! The notifier never drops a fault-kind transition between distinct kinds;
//! it may coalesce repeats of the same kind. Each waiter therefore owns a
//! pending queue of unconsumed kinds: a fired kind equal to a queue's
//! unconsumed tail coalesces into it, any other kind is appended, and
//! nothing leaves a queue until its waiter consumes it. Back-to-back
//! distinct fires (one incoming message can end a sensor silence and trip a
//! fault line, which fires `Normalized` then the fault kind with no yield
//! between them) reach every consumer in fire order even if that consumer
//! is between polls at the time. Spurious wake-ups are absorbed by the
//! empty-queue check.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::sync::{TrackedCondvar, TrackedMutex};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The kinds of event the fault monitor can signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FaultKind {
    #[default]
    None,
    ThermalWarning,
    ThermalFault,
    ElectricalFault,
    HydraulicFault,
    SensorTimeout,
    Normalized,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// The per-consumer pending queues, keyed by waiter id.
#[derive(Debug, Default)]
struct Registry {
    next_waiter_id: u64,
    pending: Vec<(u64, VecDeque<FaultKind>)>,
}

/// The notifier shared by the producer and all consumers.
pub struct EventNotifier {
    registry: TrackedMutex<Registry>,
    cv: TrackedCondvar,
}

/// One consumer's view of the notifier.
///
/// Create one per consuming thread with [`EventNotifier::waiter`], before the
/// producer can fire, so no event is missed. Dropping the waiter retires its
/// queue.
pub struct EventWaiter {
    notifier: Arc<EventNotifier>,
    waiter_id: u64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl FaultKind {
    /// True for the kinds that demand a safe stop.
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            FaultKind::ThermalFault
                | FaultKind::ElectricalFault
                | FaultKind::HydraulicFault
                | FaultKind::SensorTimeout
        )
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FaultKind::None => "none",
            FaultKind::ThermalWarning => "thermal warning",
            FaultKind::ThermalFault => "thermal fault",
            FaultKind::ElectricalFault => "electrical fault",
            FaultKind::HydraulicFault => "hydraulic fault",
            FaultKind::SensorTimeout => "sensor timeout",
            FaultKind::Normalized => "normalized",
        };
        write!(f, "{}", name)
    }
}

impl Registry {
    /// The pending queue of one registered waiter.
    fn queue_mut(&mut self, waiter_id: u64) -> &mut VecDeque<FaultKind> {
        match self.pending.iter_mut().find(|(id, _)| *id == waiter_id) {
            Some((_, queue)) => queue,
            None => util::raise_error!("Event waiter {} is not registered", waiter_id),
        }
    }
}

impl EventNotifier {
    pub fn new() -> Self {
        Self {
            registry: TrackedMutex::new(Registry::default()),
            cv: TrackedCondvar::new(),
        }
    }

    /// Signal an event to every registered waiter.
    ///
    /// A kind equal to a waiter's unconsumed tail coalesces; a distinct kind
    /// is always appended, so no transition between distinct kinds is ever
    /// dropped. Firing [`FaultKind::None`] is an invariant violation.
    pub fn fire(&self, kind: FaultKind) {
        if kind == FaultKind::None {
            util::raise_error!("Cannot fire the None event kind");
        }

        {
            let mut registry = self.registry.lock();
            for (_, queue) in registry.pending.iter_mut() {
                if queue.back() != Some(&kind) {
                    queue.push_back(kind);
                }
            }
        }

        self.cv.notify_all();
    }

    /// Register a consumer. Its queue starts empty, so only events fired
    /// from this point on are delivered to it.
    pub fn waiter(self: &Arc<Self>) -> EventWaiter {
        let waiter_id = {
            let mut registry = self.registry.lock();
            let id = registry.next_waiter_id;
            registry.next_waiter_id += 1;
            registry.pending.push((id, VecDeque::new()));
            id
        };

        EventWaiter {
            notifier: self.clone(),
            waiter_id,
        }
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl EventWaiter {
    /// Block until an event is pending for this waiter, consume it, and
    /// return its kind. Pending events are consumed in fire order.
    pub fn wait_event(&mut self) -> FaultKind {
        let mut registry = self.notifier.registry.lock();

        loop {
            if let Some(kind) = registry.queue_mut(self.waiter_id).pop_front() {
                return kind;
            }
            registry = self.notifier.cv.wait(registry);
        }
    }

    /// As [`EventWaiter::wait_event`] but gives up after `timeout`,
    /// returning `None`.
    pub fn wait_event_timeout(&mut self, timeout: Duration) -> Option<FaultKind> {
        let deadline = Instant::now() + timeout;
        let mut registry = self.notifier.registry.lock();

        loop {
            if let Some(kind) = registry.queue_mut(self.waiter_id).pop_front() {
                return Some(kind);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self.notifier.cv.wait_timeout(registry, remaining);
            registry = guard;
        }
    }

    /// Non-blocking variant: consume and return the oldest pending event, or
    /// [`FaultKind::None`] if nothing is pending for this waiter.
    pub fn poll_event(&mut self) -> FaultKind {
        self.notifier
            .registry
            .lock()
            .queue_mut(self.waiter_id)
            .pop_front()
            .unwrap_or(FaultKind::None)
    }
}

impl Drop for EventWaiter {
    fn drop(&mut self) {
        let mut registry = self.notifier.registry.lock();
        registry.pending.retain(|(id, _)| *id != self.waiter_id);
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_poll_consumes_once() {
        let notifier = Arc::new(EventNotifier::new());
        let mut waiter = notifier.waiter();

        assert_eq!(waiter.poll_event(), FaultKind::None);

        notifier.fire(FaultKind::ThermalFault);
        assert_eq!(waiter.poll_event(), FaultKind::ThermalFault);
        assert_eq!(waiter.poll_event(), FaultKind::None);
    }

    #[test]
    fn test_every_waiter_sees_the_event() {
        let notifier = Arc::new(EventNotifier::new());
        let mut a = notifier.waiter();
        let mut b = notifier.waiter();
        let mut c = notifier.waiter();

        notifier.fire(FaultKind::ElectricalFault);

        assert_eq!(a.poll_event(), FaultKind::ElectricalFault);
        assert_eq!(b.poll_event(), FaultKind::ElectricalFault);
        assert_eq!(c.poll_event(), FaultKind::ElectricalFault);
    }

    #[test]
    fn test_distinct_kinds_are_never_dropped() {
        let notifier = Arc::new(EventNotifier::new());
        let mut waiter = notifier.waiter();

        // Back-to-back distinct fires with no consumer parked in a wait:
        // the exact shape of a message that ends a sensor silence and trips
        // a fault line
        notifier.fire(FaultKind::Normalized);
        notifier.fire(FaultKind::ElectricalFault);

        assert_eq!(waiter.poll_event(), FaultKind::Normalized);
        assert_eq!(waiter.poll_event(), FaultKind::ElectricalFault);
        assert_eq!(waiter.poll_event(), FaultKind::None);
    }

    #[test]
    fn test_alternating_kinds_all_delivered_in_order() {
        let notifier = Arc::new(EventNotifier::new());
        let mut waiter = notifier.waiter();

        notifier.fire(FaultKind::ThermalFault);
        notifier.fire(FaultKind::Normalized);
        notifier.fire(FaultKind::ThermalFault);

        assert_eq!(waiter.poll_event(), FaultKind::ThermalFault);
        assert_eq!(waiter.poll_event(), FaultKind::Normalized);
        assert_eq!(waiter.poll_event(), FaultKind::ThermalFault);
        assert_eq!(waiter.poll_event(), FaultKind::None);
    }

    #[test]
    fn test_repeats_coalesce_for_slow_waiters() {
        let notifier = Arc::new(EventNotifier::new());
        let mut waiter = notifier.waiter();

        notifier.fire(FaultKind::HydraulicFault);
        notifier.fire(FaultKind::HydraulicFault);
        notifier.fire(FaultKind::HydraulicFault);

        assert_eq!(waiter.poll_event(), FaultKind::HydraulicFault);
        assert_eq!(waiter.poll_event(), FaultKind::None);
    }

    #[test]
    fn test_repeat_after_consumption_is_delivered_again() {
        let notifier = Arc::new(EventNotifier::new());
        let mut waiter = notifier.waiter();

        notifier.fire(FaultKind::SensorTimeout);
        assert_eq!(waiter.poll_event(), FaultKind::SensorTimeout);

        // Coalescing only folds into an unconsumed tail; a fresh fire after
        // consumption is a new delivery
        notifier.fire(FaultKind::SensorTimeout);
        assert_eq!(waiter.poll_event(), FaultKind::SensorTimeout);
    }

    #[test]
    fn test_consumption_is_per_waiter() {
        let notifier = Arc::new(EventNotifier::new());
        let mut fast = notifier.waiter();
        let mut slow = notifier.waiter();

        notifier.fire(FaultKind::ThermalFault);
        assert_eq!(fast.poll_event(), FaultKind::ThermalFault);

        notifier.fire(FaultKind::Normalized);

        // The slow waiter still holds both kinds in order
        assert_eq!(slow.poll_event(), FaultKind::ThermalFault);
        assert_eq!(slow.poll_event(), FaultKind::Normalized);
        assert_eq!(fast.poll_event(), FaultKind::Normalized);
    }

    #[test]
    fn test_wait_event_blocks_until_fire() {
        let notifier = Arc::new(EventNotifier::new());
        let mut waiter = notifier.waiter();

        let handle = thread::spawn(move || waiter.wait_event());

        thread::sleep(Duration::from_millis(20));
        notifier.fire(FaultKind::SensorTimeout);

        assert_eq!(handle.join().unwrap(), FaultKind::SensorTimeout);
    }

    #[test]
    fn test_wait_event_timeout_expires() {
        let notifier = Arc::new(EventNotifier::new());
        let mut waiter = notifier.waiter();

        assert_eq!(waiter.wait_event_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_waiter_created_after_fire_sees_nothing() {
        let notifier = Arc::new(EventNotifier::new());
        {
            let _early = notifier.waiter();
            notifier.fire(FaultKind::ThermalWarning);
        }

        let mut late = notifier.waiter();
        assert_eq!(late.poll_event(), FaultKind::None);
    }

    #[test]
    fn test_dropped_waiter_is_retired() {
        let notifier = Arc::new(EventNotifier::new());
        let mut kept = notifier.waiter();

        let dropped = notifier.waiter();
        drop(dropped);

        // Firing into the registry with a retired queue neither panics nor
        // disturbs the surviving waiter
        notifier.fire(FaultKind::ElectricalFault);
        assert_eq!(kept.poll_event(), FaultKind::ElectricalFault);
    }

    #[test]
    #[should_panic]
    fn test_firing_none_is_an_invariant_violation() {
        let notifier = Arc::new(EventNotifier::new());
        notifier.fire(FaultKind::None);
    }

    #[test]
    fn test_is_serious() {
        assert!(FaultKind::ThermalFault.is_serious());
        assert!(FaultKind::ElectricalFault.is_serious());
        assert!(FaultKind::HydraulicFault.is_serious());
        assert!(FaultKind::SensorTimeout.is_serious());
        assert!(!FaultKind::ThermalWarning.is_serious());
        assert!(!FaultKind::Normalized.is_serious());
        assert!(!FaultKind::None.is_serious());
    }
}
