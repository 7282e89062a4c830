//! Bounded lock-free record queue.
//!
//! A fixed-capacity ring of sequence-gated slots. Any number of producer
//! threads may `try_push` concurrently; the worker thread drains in FIFO
//! order. A full queue rejects the push immediately — the pipeline's
//! overflow policy is drop, never block and never grow.
//!
//! Each slot pairs a value cell with an atomic sequence number. The
//! sequence gate is what transfers ownership: a producer that wins the
//! ticket CAS has exclusive access to the cell until it publishes the new
//! sequence, and a consumer sees the value only after that publish. At no
//! point can two threads observe the same record.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Cache-line aligned wrapper to keep the producer and consumer cursors
/// off the same line.
#[repr(align(64))]
struct CachePadded<T>(T);

/// One buffer cell: a value guarded by an atomic sequence number.
///
/// Sequence values for the slot at ring index `i`:
/// - `turn * capacity + i` — empty, writable by the producer holding
///   ticket `turn * capacity + i`
/// - `ticket + 1` — occupied, readable by the consumer holding that
///   ticket
struct RingSlot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity concurrent FIFO queue (many producers, one consumer).
///
/// `drain_range` is intended for a single consumer at a time; the slot
/// sequence gates keep even a misused queue memory-safe, but FIFO order
/// is only meaningful with one drainer.
pub struct BoundedQueue<T> {
    slots: Box<[RingSlot<T>]>,
    capacity: usize,
    /// Next ticket a producer will claim.
    tail: CachePadded<AtomicUsize>,
    /// Next ticket the consumer will claim.
    head: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for BoundedQueue<T> {}
unsafe impl<T: Send> Sync for BoundedQueue<T> {}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "queue capacity must be greater than zero");
        let slots = (0..capacity)
            .map(|i| RingSlot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();
        BoundedQueue {
            slots,
            capacity,
            tail: CachePadded(AtomicUsize::new(0)),
            head: CachePadded(AtomicUsize::new(0)),
        }
    }

    /// Maximum number of records the queue can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempt to store `item`, returning `false` immediately when the
    /// queue is full. Never blocks; safe from any number of threads.
    pub fn try_push(&self, item: T) -> bool {
        let mut pos = self.tail.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % self.capacity];
            let seq = slot.sequence.load(Ordering::Acquire);
            let dif = (seq as isize).wrapping_sub(pos as isize);
            if dif == 0 {
                // Slot is empty for this ticket; claim it.
                match self.tail.0.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Exclusive access until the sequence store below.
                        unsafe { (*slot.value.get()).write(item) };
                        slot.sequence
                            .store(pos.wrapping_add(1), Ordering::Release);
                        return true;
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // The slot still holds the record from one lap ago.
                return false;
            } else {
                pos = self.tail.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Remove one record if available.
    fn try_pop(&self) -> Option<T> {
        let mut pos = self.head.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % self.capacity];
            let seq = slot.sequence.load(Ordering::Acquire);
            let dif = (seq as isize).wrapping_sub(pos.wrapping_add(1) as isize);
            if dif == 0 {
                match self.head.0.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Published by the producer's Release store; ours
                        // exclusively until the sequence store below.
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.capacity), Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                // Next slot not yet published; FIFO stops here.
                return None;
            } else {
                pos = self.head.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Remove up to `max` records in FIFO order, invoking `visitor` once
    /// per record. Returns the number removed. Zero visits on an empty
    /// queue. Producers may push concurrently; those records may or may
    /// not be picked up by this call.
    pub fn drain_range(&self, max: usize, mut visitor: impl FnMut(T)) -> usize {
        let mut drained = 0;
        while drained < max {
            match self.try_pop() {
                Some(item) => {
                    visitor(item);
                    drained += 1;
                }
                None => break,
            }
        }
        drained
    }

    /// Eventually-consistent live-record count. Heuristic only — use it
    /// for wake-up and batch-sizing decisions, never for accounting.
    pub fn approx_size(&self) -> usize {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Relaxed);
        tail.wrapping_sub(head).min(self.capacity)
    }

    /// Whether the queue currently looks empty.
    pub fn is_empty(&self) -> bool {
        self.approx_size() == 0
    }
}

impl<T> Drop for BoundedQueue<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}
