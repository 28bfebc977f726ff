//! # Bounded buffer
//!
//! A fixed-capacity FIFO ring with an overflow policy chosen at
//! construction. Two call-site policies exist in the pipeline:
//!
//! - **Reject** — `push` hands the item back on full. Used by the sensor
//!   filter's raw batch queue, whose consumer drains the whole buffer the
//!   moment it fills.
//! - **Overwrite** — `push` on full first evicts the oldest element, so a
//!   reader always finds the most recent data. Used for the filtered-pose
//!   and setpoint queues.
//!
//! The buffer itself is not synchronised; [`SignalledBuffer`] pairs one
//! instance with a tracked mutex and condition variable for the two queues
//! that cross task boundaries. Keeping the lock external allows compositions
//! like "pop from one buffer, push to another under the same guard" where a
//! task needs them.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::collections::VecDeque;
use std::time::Duration;

use crate::sync::{TrackedCondvar, TrackedGuard, TrackedMutex};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// What `push` does when the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Reject the new item, handing it back to the caller.
    Reject,

    /// Evict the oldest item, then append the new one.
    Overwrite,
}

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Fixed-capacity FIFO ring. Capacity is set at construction and never
/// changes.
#[derive(Debug)]
pub struct BoundedBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
    policy: OverflowPolicy,
}

/// A [`BoundedBuffer`] paired with its mutex and condition variable, for
/// queues shared between tasks.
pub struct SignalledBuffer<T> {
    buffer: TrackedMutex<BoundedBuffer<T>>,
    cv: TrackedCondvar,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl<T> BoundedBuffer<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        if capacity == 0 {
            util::raise_error!("Cannot create a bounded buffer with zero capacity");
        }

        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
            policy,
        }
    }

    /// Append an item.
    ///
    /// With the Reject policy a full buffer returns `Err` carrying the item
    /// back; with Overwrite the oldest element is evicted first and `push`
    /// always succeeds.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        if self.items.len() == self.capacity {
            match self.policy {
                OverflowPolicy::Reject => return Err(item),
                OverflowPolicy::Overwrite => {
                    self.items.pop_front();
                }
            }
        }

        self.items.push_back(item);
        Ok(())
    }

    /// Remove and return the oldest item.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Return a reference to the oldest item without removing it.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.items.len() == self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T> SignalledBuffer<T> {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            buffer: TrackedMutex::new(BoundedBuffer::new(capacity, policy)),
            cv: TrackedCondvar::new(),
        }
    }

    /// Acquire the buffer lock.
    pub fn lock(&self) -> TrackedGuard<BoundedBuffer<T>> {
        self.buffer.lock()
    }

    /// Release the guard, sleep until a producer signals, and re-acquire.
    /// The boolean is true if the wait timed out; callers re-check their
    /// predicate either way.
    pub fn wait_timeout<'a>(
        &'a self,
        guard: TrackedGuard<'a, BoundedBuffer<T>>,
        timeout: Duration,
    ) -> (TrackedGuard<'a, BoundedBuffer<T>>, bool) {
        self.cv.wait_timeout(guard, timeout)
    }

    /// Wake every waiter. Call after the guard has been dropped.
    pub fn notify_all(&self) {
        self.cv.notify_all();
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let mut buffer = BoundedBuffer::new(3, OverflowPolicy::Reject);

        buffer.push(1).unwrap();
        buffer.push(2).unwrap();
        assert_eq!(buffer.peek(), Some(&1));
        assert_eq!(buffer.pop(), Some(1));
        assert_eq!(buffer.pop(), Some(2));
        assert_eq!(buffer.pop(), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_reject_policy_hands_item_back() {
        let mut buffer = BoundedBuffer::new(2, OverflowPolicy::Reject);

        buffer.push(1).unwrap();
        buffer.push(2).unwrap();
        assert!(buffer.is_full());
        assert_eq!(buffer.push(3), Err(3));

        // The stored items are untouched
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.pop(), Some(1));
    }

    #[test]
    fn test_overwrite_policy_evicts_oldest() {
        let mut buffer = BoundedBuffer::new(2, OverflowPolicy::Overwrite);

        buffer.push(1).unwrap();
        buffer.push(2).unwrap();
        buffer.push(3).unwrap();

        // 1 was evicted, the reader sees the most recent two
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.pop(), Some(2));
        assert_eq!(buffer.pop(), Some(3));
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut buffer = BoundedBuffer::new(10, OverflowPolicy::Overwrite);

        for i in 0..500 {
            buffer.push(i).unwrap();
            assert!(buffer.len() <= buffer.capacity());
        }
        assert_eq!(buffer.len(), 10);
    }

    #[test]
    fn test_clear() {
        let mut buffer = BoundedBuffer::new(4, OverflowPolicy::Reject);

        buffer.push(1).unwrap();
        buffer.push(2).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(!buffer.is_full());
        assert_eq!(buffer.capacity(), 4);
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_is_rejected() {
        let _ = BoundedBuffer::<u8>::new(0, OverflowPolicy::Reject);
    }

    #[test]
    fn test_signalled_buffer_hand_off() {
        use std::sync::Arc;
        use std::thread;

        let queue = Arc::new(SignalledBuffer::new(8, OverflowPolicy::Overwrite));

        let consumer = {
            let queue = queue.clone();
            thread::spawn(move || {
                let mut guard = queue.lock();
                loop {
                    if let Some(item) = guard.pop() {
                        return item;
                    }
                    let (g, _) = queue.wait_timeout(guard, Duration::from_millis(100));
                    guard = g;
                }
            })
        };

        thread::sleep(Duration::from_millis(20));
        {
            let mut guard = queue.lock();
            guard.push(42).ok();
        }
        queue.notify_all();

        assert_eq!(consumer.join().unwrap(), 42);
    }
}
