//! Worker/caller coordination state.
//!
//! One [`SyncState`] is shared between a batch processor, its worker
//! thread, and any in-flight async export completions. The processor and
//! worker hold strong handles; completion closures hold weak handles and
//! become no-ops once the owning processor is gone.
//!
//! Signals carried here:
//! - producer → worker wake-ups, coalesced (any number of requests before
//!   the worker wakes collapse into one)
//! - the shutdown flag, with exactly-once transition semantics
//! - force-flush request/completion, a pending flag plus a completion
//!   generation the waiters block on
//! - a worker-exited latch so no waiter can hang on a dead worker
//!
//! # Timeout Convention
//!
//! Every bounded wait takes `Option<Duration>`: `None` waits
//! indefinitely, `Some(d)` waits at most `d`, and `Some(Duration::ZERO)`
//! polls without waiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Absolute cutoff derived from an `Option<Duration>` wait limit.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    cutoff: Option<Instant>,
}

impl Deadline {
    /// Start a deadline `limit` from now. `None` never expires.
    pub fn after(limit: Option<Duration>) -> Self {
        Deadline {
            // A limit too large to represent never expires either.
            cutoff: limit.and_then(|d| Instant::now().checked_add(d)),
        }
    }

    /// Time left: `None` for an unbounded deadline, `Some(ZERO)` once
    /// expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.cutoff
            .map(|cutoff| cutoff.saturating_duration_since(Instant::now()))
    }

    /// Whether a bounded deadline has passed.
    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }
}

/// Shared flags and condition variables coordinating producers, the
/// worker thread, and flush/shutdown callers.
pub struct SyncState {
    shutdown: AtomicBool,
    flush_pending: AtomicBool,
    worker_done: AtomicBool,
    wake: Mutex<bool>,
    wake_cv: Condvar,
    /// Bumped once per completed flush; waiters block on the bump.
    flush_gen: Mutex<u64>,
    flush_cv: Condvar,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    pub fn new() -> Self {
        SyncState {
            shutdown: AtomicBool::new(false),
            flush_pending: AtomicBool::new(false),
            worker_done: AtomicBool::new(false),
            wake: Mutex::new(false),
            wake_cv: Condvar::new(),
            flush_gen: Mutex::new(0),
            flush_cv: Condvar::new(),
        }
    }

    /// Ask the worker to wake before its schedule delay elapses.
    /// Multiple requests before the worker wakes coalesce into one.
    pub fn request_wake(&self) {
        let mut woken = self.wake.lock().expect("wake lock");
        *woken = true;
        self.wake_cv.notify_one();
    }

    /// Worker-side wait for a wake request, `ready()` turning true, or
    /// the limit elapsing. Consumes the pending wake request.
    pub fn wait_for_wake(&self, limit: Option<Duration>, ready: impl Fn() -> bool) {
        let deadline = Deadline::after(limit);
        let mut woken = self.wake.lock().expect("wake lock");
        while !*woken && !ready() {
            match deadline.remaining() {
                None => woken = self.wake_cv.wait(woken).expect("wake lock"),
                Some(d) if d.is_zero() => break,
                Some(d) => {
                    woken = self.wake_cv.wait_timeout(woken, d).expect("wake lock").0;
                }
            }
        }
        *woken = false;
    }

    /// Transition to shutting-down. Returns `true` for exactly one
    /// caller — the one that owns forwarding shutdown to the exporter.
    pub fn request_shutdown(&self) -> bool {
        !self.shutdown.swap(true, Ordering::AcqRel)
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Whether a force flush is waiting to be served.
    pub fn flush_pending(&self) -> bool {
        self.flush_pending.load(Ordering::Acquire)
    }

    /// Worker-side take of the pending-flush flag.
    pub fn take_flush_pending(&self) -> bool {
        self.flush_pending.swap(false, Ordering::AcqRel)
    }

    /// Mark a flush pending, wake the worker, and block until the worker
    /// (or an async completion holding a live handle) signals completion,
    /// the limit elapses, or the worker exits. Returns whether completion
    /// was observed in time.
    ///
    /// Safe to call while a shutdown is in progress: the shutdown drain
    /// signals completion once the queue is empty, so the wait cannot
    /// hang on a worker that is going away.
    pub fn request_force_flush(&self, limit: Option<Duration>) -> bool {
        let deadline = Deadline::after(limit);
        let mut gen = self.flush_gen.lock().expect("flush lock");
        let start = *gen;
        self.flush_pending.store(true, Ordering::Release);
        self.request_wake();
        loop {
            if *gen != start {
                return true;
            }
            if self.worker_done.load(Ordering::Acquire) {
                return false;
            }
            match deadline.remaining() {
                None => gen = self.flush_cv.wait(gen).expect("flush lock"),
                Some(d) if d.is_zero() => return false,
                Some(d) => {
                    gen = self.flush_cv.wait_timeout(gen, d).expect("flush lock").0;
                }
            }
        }
    }

    /// Signal that a flush-triggered batch has been handed off (or that
    /// a flush found nothing to do). Wakes every waiter pending at this
    /// moment.
    pub fn notify_flush_complete(&self) {
        let mut gen = self.flush_gen.lock().expect("flush lock");
        *gen = gen.wrapping_add(1);
        self.flush_cv.notify_all();
    }

    /// Worker exit latch; set once, after the shutdown drain.
    pub fn mark_worker_done(&self) {
        let _gen = self.flush_gen.lock().expect("flush lock");
        self.worker_done.store(true, Ordering::Release);
        self.flush_cv.notify_all();
    }

    /// Whether the worker has drained and exited.
    pub fn worker_done(&self) -> bool {
        self.worker_done.load(Ordering::Acquire)
    }

    /// Block until the worker has drained and exited, or the limit
    /// elapses. Returns whether the worker was observed done.
    pub fn wait_worker_done(&self, limit: Option<Duration>) -> bool {
        let deadline = Deadline::after(limit);
        let mut gen = self.flush_gen.lock().expect("flush lock");
        while !self.worker_done.load(Ordering::Acquire) {
            match deadline.remaining() {
                None => gen = self.flush_cv.wait(gen).expect("flush lock"),
                Some(d) if d.is_zero() => return false,
                Some(d) => {
                    gen = self.flush_cv.wait_timeout(gen, d).expect("flush lock").0;
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

    #[test]
    fn test_shutdown_transition_is_exactly_once() {
        let sync = Arc::new(SyncState::new());
        let winners: Vec<bool> = (0..8)
            .map(|_| {
                let sync = Arc::clone(&sync);
                thread::spawn(move || sync.request_shutdown())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect();

        assert_eq!(winners.iter().filter(|&&w| w).count(), 1);
        assert!(sync.is_shutdown());
    }

    #[test]
    fn test_wake_requests_coalesce() {
        let sync = SyncState::new();
        sync.request_wake();
        sync.request_wake();

        // The pending requests satisfy one wait immediately...
        let start = Instant::now();
        sync.wait_for_wake(Some(Duration::from_secs(5)), || false);
        assert!(start.elapsed() < Duration::from_secs(1));

        // ...and are consumed by it.
        let start = Instant::now();
        sync.wait_for_wake(Some(Duration::from_millis(50)), || false);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_wait_for_wake_ready_predicate_short_circuits() {
        let sync = SyncState::new();
        let start = Instant::now();
        sync.wait_for_wake(Some(Duration::from_secs(5)), || true);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_force_flush_completes_on_notify() {
        let sync = Arc::new(SyncState::new());
        let worker = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || {
                sync.wait_for_wake(None, || false);
                assert!(sync.take_flush_pending());
                sync.notify_flush_complete();
            })
        };

        assert!(sync.request_force_flush(Some(Duration::from_secs(5))));
        worker.join().unwrap();
    }

    #[test]
    fn test_force_flush_times_out_without_worker() {
        let sync = SyncState::new();
        let start = Instant::now();
        assert!(!sync.request_force_flush(Some(Duration::from_millis(50))));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_force_flush_zero_limit_polls() {
        let sync = SyncState::new();
        let start = Instant::now();
        assert!(!sync.request_force_flush(Some(Duration::ZERO)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_force_flush_returns_when_worker_exits() {
        let sync = Arc::new(SyncState::new());
        let worker = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                sync.mark_worker_done();
            })
        };

        // No completion will ever arrive; the exit latch unblocks us.
        assert!(!sync.request_force_flush(None));
        worker.join().unwrap();
    }

    #[test]
    fn test_wait_worker_done() {
        let sync = Arc::new(SyncState::new());
        assert!(!sync.wait_worker_done(Some(Duration::from_millis(20))));

        let worker = {
            let sync = Arc::clone(&sync);
            thread::spawn(move || sync.mark_worker_done())
        };
        assert!(sync.wait_worker_done(Some(Duration::from_secs(5))));
        assert!(sync.worker_done());
        worker.join().unwrap();
    }

    #[test]
    fn test_deadline_unbounded_never_expires() {
        let deadline = Deadline::after(None);
        assert_eq!(deadline.remaining(), None);
        assert!(!deadline.expired());
    }

    #[test]
    fn test_deadline_bounded_expires() {
        let deadline = Deadline::after(Some(Duration::from_millis(10)));
        assert!(!deadline.expired());
        thread::sleep(Duration::from_millis(20));
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
    }
}
