//! In-flight async export limiter.
//!
//! A fixed pool of slot ids. The worker checks one out before starting an
//! async export and the exporter's completion callback returns it. When
//! every slot is busy the worker blocks in [`ExportSlotPool::try_acquire`]
//! — that blocking is the backpressure bounding concurrent exports.
//!
//! The pool orders nothing: exports may complete out of order. Release is
//! idempotent per checkout, guarded by a per-id in-use flag, so a
//! misbehaving caller cannot double-count a free slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::sync::Deadline;

/// Fixed-size pool of export slot ids.
pub struct ExportSlotPool {
    free: Mutex<Vec<usize>>,
    available: Condvar,
    in_use: Box<[AtomicBool]>,
}

impl ExportSlotPool {
    /// Create a pool of `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "slot pool capacity must be greater than zero");
        ExportSlotPool {
            free: Mutex::new((0..capacity).rev().collect()),
            available: Condvar::new(),
            in_use: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.in_use.len()
    }

    /// Number of slots currently checked out.
    pub fn in_flight(&self) -> usize {
        self.capacity() - self.free.lock().expect("slot pool lock").len()
    }

    /// Check out a slot, blocking up to `budget` for one to free up.
    /// `None` on timeout.
    pub fn try_acquire(&self, budget: Option<Duration>) -> Option<usize> {
        let deadline = Deadline::after(budget);
        let mut free = self.free.lock().expect("slot pool lock");
        loop {
            if let Some(id) = free.pop() {
                self.in_use[id].store(true, Ordering::Release);
                return Some(id);
            }
            match deadline.remaining() {
                None => free = self.available.wait(free).expect("slot pool lock"),
                Some(d) if d.is_zero() => return None,
                Some(d) => {
                    free = self
                        .available
                        .wait_timeout(free, d)
                        .expect("slot pool lock")
                        .0;
                }
            }
        }
    }

    /// Return a slot. Idempotent per checkout: a second release of the
    /// same id is ignored until the id is checked out again.
    pub fn release(&self, id: usize) {
        let Some(in_use) = self.in_use.get(id) else {
            tracing::warn!(id, "release of unknown export slot ignored");
            return;
        };
        if in_use.swap(false, Ordering::AcqRel) {
            let mut free = self.free.lock().expect("slot pool lock");
            free.push(id);
            self.available.notify_all();
        } else {
            tracing::debug!(id, "duplicate export slot release ignored");
        }
    }

    /// Block until every slot is free, or the limit elapses. Returns
    /// whether the pool was observed idle.
    pub fn wait_idle(&self, limit: Option<Duration>) -> bool {
        let deadline = Deadline::after(limit);
        let mut free = self.free.lock().expect("slot pool lock");
        while free.len() < self.capacity() {
            match deadline.remaining() {
                None => free = self.available.wait(free).expect("slot pool lock"),
                Some(d) if d.is_zero() => return false,
                Some(d) => {
                    free = self
                        .available
                        .wait_timeout(free, d)
                        .expect("slot pool lock")
                        .0;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_acquire_up_to_capacity() {
        let pool = ExportSlotPool::new(3);
        let a = pool.try_acquire(Some(Duration::ZERO)).unwrap();
        let b = pool.try_acquire(Some(Duration::ZERO)).unwrap();
        let c = pool.try_acquire(Some(Duration::ZERO)).unwrap();
        assert_eq!(pool.in_flight(), 3);

        // Distinct ids, all in range.
        let mut ids = vec![a, b, c];
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|&id| id < 3));

        assert!(pool.try_acquire(Some(Duration::ZERO)).is_none());
    }

    #[test]
    fn test_acquire_times_out_when_exhausted() {
        let pool = ExportSlotPool::new(1);
        let _held = pool.try_acquire(Some(Duration::ZERO)).unwrap();

        let start = Instant::now();
        assert!(pool.try_acquire(Some(Duration::from_millis(50))).is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_release_unblocks_waiter() {
        let pool = Arc::new(ExportSlotPool::new(1));
        let held = pool.try_acquire(Some(Duration::ZERO)).unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.try_acquire(Some(Duration::from_secs(5))))
        };

        thread::sleep(Duration::from_millis(20));
        pool.release(held);
        assert_eq!(waiter.join().unwrap(), Some(held));
    }

    #[test]
    fn test_duplicate_release_does_not_grow_pool() {
        let pool = ExportSlotPool::new(2);
        let a = pool.try_acquire(Some(Duration::ZERO)).unwrap();
        let _b = pool.try_acquire(Some(Duration::ZERO)).unwrap();

        pool.release(a);
        pool.release(a);
        pool.release(a);

        // Only one slot came back.
        assert!(pool.try_acquire(Some(Duration::ZERO)).is_some());
        assert!(pool.try_acquire(Some(Duration::ZERO)).is_none());
    }

    #[test]
    fn test_release_out_of_range_ignored() {
        let pool = ExportSlotPool::new(1);
        pool.release(42);
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn test_wait_idle() {
        let pool = Arc::new(ExportSlotPool::new(2));
        let a = pool.try_acquire(Some(Duration::ZERO)).unwrap();
        let b = pool.try_acquire(Some(Duration::ZERO)).unwrap();

        assert!(!pool.wait_idle(Some(Duration::from_millis(20))));

        let releaser = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                pool.release(a);
                pool.release(b);
            })
        };
        assert!(pool.wait_idle(Some(Duration::from_secs(5))));
        releaser.join().unwrap();
    }
}
