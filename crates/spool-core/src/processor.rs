//! Batch record processor.
//!
//! Producer threads hand finished records to [`BatchProcessor::submit`];
//! a dedicated worker thread drains them in bounded batches and forwards
//! each batch to the configured exporter. Memory is bounded by the queue
//! capacity — under sustained overload new records are dropped, never
//! buffered without limit and never blocking the producer.
//!
//! Lifecycle: `Running` until the first [`BatchProcessor::shutdown`]
//! call, then `ShuttingDown` (terminal). Shutdown drains everything still
//! buffered before the exporter itself is shut down, exactly once, no
//! matter how many threads race the call.
//!
//! # Export Backends
//!
//! The exporter variant is chosen at construction:
//! [`BatchProcessor::new`] for a [`SyncExporter`] (one blocking export
//! call at a time, from the worker thread only) and
//! [`BatchProcessor::with_async_exporter`] for an [`AsyncExporter`]
//! (up to `max_export_async` batches in flight, bounded by an
//! [`ExportSlotPool`]). Async completion callbacks hold only weak
//! handles, so a completion arriving after the processor is gone is a
//! no-op rather than a use-after-free.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Condvar, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use spool_export::{AsyncExporter, ExportResult, OnExportDone, SyncExporter};

use crate::config::{BatchConfig, ConfigError};
use crate::queue::BoundedQueue;
use crate::slots::ExportSlotPool;
use crate::sync::{Deadline, SyncState};

/// Errors from processor construction.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("invalid batch configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn batch worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),
}

/// Counter snapshot for external instrumentation.
///
/// `exported` counts records handed to the exporter; whether the backend
/// ultimately accepted them is the exporter's concern.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorStats {
    /// Records offered via `submit`.
    pub submitted: u64,
    /// Records handed to the exporter.
    pub exported: u64,
    /// Records dropped on overflow or after shutdown.
    pub dropped: u64,
    /// Batches the exporter reported as failed.
    pub export_failures: u64,
}

enum Backend<R> {
    Sync(Arc<dyn SyncExporter<Record = R>>),
    Async {
        exporter: Arc<dyn AsyncExporter<Record = R>>,
        slots: Arc<ExportSlotPool>,
    },
}

struct Shared<R> {
    queue: BoundedQueue<R>,
    sync: Arc<SyncState>,
    backend: Backend<R>,
    config: BatchConfig,
    submitted: AtomicU64,
    exported: AtomicU64,
    dropped: AtomicU64,
    export_failures: AtomicU64,
}

impl<R> Shared<R> {
    fn count_drop(&self) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped == 1 || dropped % 1024 == 0 {
            tracing::warn!(dropped, "telemetry records dropped (queue full or shutting down)");
        }
    }

    fn note_handoff(&self, batch_len: u64) {
        self.exported.fetch_add(batch_len, Ordering::Relaxed);
    }

    fn note_result(&self, result: ExportResult, batch_len: usize) {
        if !result.is_success() {
            self.export_failures.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(batch_len, "exporter reported batch failure");
        }
    }
}

/// Bounded batching pipeline in front of a pluggable exporter.
pub struct BatchProcessor<R: Send + 'static> {
    shared: Arc<Shared<R>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    shutdown_result: Mutex<Option<bool>>,
    shutdown_cv: Condvar,
}

impl<R: Send + 'static> BatchProcessor<R> {
    /// Start a processor over a synchronous exporter.
    pub fn new<E>(exporter: E, config: BatchConfig) -> Result<Self, ProcessorError>
    where
        E: SyncExporter<Record = R>,
    {
        config.validate()?;
        Self::start(Backend::Sync(Arc::new(exporter)), config)
    }

    /// Start a processor over an async-capable exporter, bounding
    /// in-flight exports at `config.max_export_async`.
    pub fn with_async_exporter<E>(exporter: E, config: BatchConfig) -> Result<Self, ProcessorError>
    where
        E: AsyncExporter<Record = R>,
    {
        config.validate()?;
        let slots = Arc::new(ExportSlotPool::new(config.max_export_async));
        Self::start(
            Backend::Async {
                exporter: Arc::new(exporter),
                slots,
            },
            config,
        )
    }

    fn start(backend: Backend<R>, config: BatchConfig) -> Result<Self, ProcessorError> {
        let shared = Arc::new(Shared {
            queue: BoundedQueue::new(config.max_queue_size),
            sync: Arc::new(SyncState::new()),
            backend,
            config,
            submitted: AtomicU64::new(0),
            exported: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            export_failures: AtomicU64::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("spool-batch-worker".to_string())
            .spawn(move || run_worker(worker_shared))?;

        Ok(BatchProcessor {
            shared,
            worker: Mutex::new(Some(handle)),
            shutdown_result: Mutex::new(None),
            shutdown_cv: Condvar::new(),
        })
    }

    /// Create a blank record via the exporter. Callable from any thread.
    pub fn make_record(&self) -> R {
        match &self.shared.backend {
            Backend::Sync(exporter) => exporter.make_record(),
            Backend::Async { exporter, .. } => exporter.make_record(),
        }
    }

    /// Hand one finished record to the pipeline. Fire-and-forget: never
    /// blocks, never fails loudly. The record is dropped when the queue
    /// is full or the processor is shutting down.
    pub fn submit(&self, record: R) {
        let shared = &self.shared;
        shared.submitted.fetch_add(1, Ordering::Relaxed);
        if shared.sync.is_shutdown() {
            shared.count_drop();
            return;
        }
        if !shared.queue.try_push(record) {
            shared.count_drop();
            return;
        }
        // Preemptive wake once the backlog is worth a batch, so the
        // worker does not sleep out its full schedule delay.
        let size = shared.queue.approx_size();
        if size >= shared.config.max_queue_size / 2
            || size >= shared.config.max_export_batch_size
        {
            shared.sync.request_wake();
        }
    }

    /// Export everything currently buffered before returning. Returns
    /// whether completion was observed within `limit` (`None` waits
    /// indefinitely); `false` immediately when already shutting down.
    pub fn force_flush(&self, limit: Option<Duration>) -> bool {
        if self.shared.sync.is_shutdown() {
            return false;
        }
        self.shared.sync.request_force_flush(limit)
    }

    /// Shut the pipeline down: drain the queue, stop the worker, then
    /// shut the exporter down exactly once. Idempotent — every caller
    /// blocks until the drain finishes and returns the same result.
    pub fn shutdown(&self, limit: Option<Duration>) -> bool {
        let deadline = Deadline::after(limit);
        let won = self.shared.sync.request_shutdown();
        self.shared.sync.request_wake();

        if won {
            let handle = self.worker.lock().expect("worker handle lock").take();
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    tracing::error!("batch worker thread panicked");
                }
            }

            // Async exports may still be in flight after the drain; give
            // them the remaining budget to call back in.
            let in_flight_done = match &self.shared.backend {
                Backend::Async { slots, .. } => slots.wait_idle(deadline.remaining()),
                Backend::Sync(_) => true,
            };

            let exporter_done = match &self.shared.backend {
                Backend::Sync(exporter) => exporter.shutdown(deadline.remaining()),
                Backend::Async { exporter, .. } => exporter.shutdown(deadline.remaining()),
            };

            let result = in_flight_done && exporter_done;
            let mut guard = self.shutdown_result.lock().expect("shutdown result lock");
            *guard = Some(result);
            self.shutdown_cv.notify_all();
            result
        } else {
            self.shared.sync.wait_worker_done(deadline.remaining());
            let mut guard = self.shutdown_result.lock().expect("shutdown result lock");
            loop {
                if let Some(result) = *guard {
                    return result;
                }
                match deadline.remaining() {
                    None => guard = self.shutdown_cv.wait(guard).expect("shutdown result lock"),
                    Some(d) if d.is_zero() => return false,
                    Some(d) => {
                        guard = self
                            .shutdown_cv
                            .wait_timeout(guard, d)
                            .expect("shutdown result lock")
                            .0;
                    }
                }
            }
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            exported: self.shared.exported.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            export_failures: self.shared.export_failures.load(Ordering::Relaxed),
        }
    }

    /// Records dropped so far on overflow or after shutdown.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// The configuration this processor runs with.
    pub fn config(&self) -> &BatchConfig {
        &self.shared.config
    }
}

impl<R: Send + 'static> Drop for BatchProcessor<R> {
    fn drop(&mut self) {
        if !self.shared.sync.is_shutdown() {
            let _ = self.shutdown(None);
        }
    }
}

fn run_worker<R: Send + 'static>(shared: Arc<Shared<R>>) {
    tracing::debug!(
        max_queue_size = shared.config.max_queue_size,
        max_export_batch_size = shared.config.max_export_batch_size,
        schedule_delay_ms = shared.config.schedule_delay_ms,
        "batch export worker started"
    );

    let schedule_delay = shared.config.schedule_delay();
    let mut last_cycle = Duration::ZERO;
    loop {
        // Keep the steady schedule even under a slow exporter: the time
        // the previous round took comes out of this round's wait.
        let timeout = schedule_delay.saturating_sub(last_cycle);
        let sync = Arc::clone(&shared.sync);
        shared
            .sync
            .wait_for_wake(Some(timeout), move || {
                sync.is_shutdown() || sync.flush_pending()
            });

        if shared.sync.is_shutdown() {
            break;
        }

        let started = Instant::now();
        run_export_cycles(&shared);
        last_cycle = started.elapsed();
    }

    drain_remaining(&shared);

    tracing::info!(
        exported = shared.exported.load(Ordering::Relaxed),
        dropped = shared.dropped.load(Ordering::Relaxed),
        export_failures = shared.export_failures.load(Ordering::Relaxed),
        "batch export worker stopped"
    );
    shared.sync.mark_worker_done();
}

/// One scheduling round: repeated batch-sized drains. Without a flush
/// pending the round ends once the backlog falls below one batch; with a
/// flush pending it continues until the queue is empty, and the batch
/// that empties it carries the completion signal.
fn run_export_cycles<R: Send + 'static>(shared: &Shared<R>) {
    let batch_limit = shared.config.max_export_batch_size;
    let mut flush = shared.sync.take_flush_pending();
    loop {
        if !flush {
            flush = shared.sync.take_flush_pending();
        }

        let count = shared.queue.approx_size().min(batch_limit);
        if count == 0 {
            // A flush of an empty queue completes immediately.
            if flush {
                shared.sync.notify_flush_complete();
            }
            return;
        }

        let mut batch = Vec::with_capacity(count);
        shared.queue.drain_range(count, |record| batch.push(record));
        if batch.is_empty() {
            if flush {
                shared.sync.notify_flush_complete();
            }
            return;
        }

        let completes_flush = flush && shared.queue.is_empty();
        export_batch(shared, batch, completes_flush);
        if completes_flush {
            flush = false;
        }

        if !flush
            && shared.queue.approx_size() < batch_limit
            && !shared.sync.flush_pending()
        {
            return;
        }
    }
}

/// Shutdown drain: everything still buffered goes out in batch-sized
/// chunks, then any flush waiter that raced the shutdown is released.
fn drain_remaining<R: Send + 'static>(shared: &Shared<R>) {
    let batch_limit = shared.config.max_export_batch_size;
    loop {
        let count = shared.queue.approx_size().min(batch_limit);
        if count == 0 {
            break;
        }
        let mut batch = Vec::with_capacity(count);
        shared.queue.drain_range(count, |record| batch.push(record));
        if batch.is_empty() {
            break;
        }
        export_batch(shared, batch, false);
    }
    shared.sync.notify_flush_complete();
}

fn export_batch<R: Send + 'static>(shared: &Shared<R>, batch: Vec<R>, completes_flush: bool) {
    let batch_len = batch.len();
    shared.note_handoff(batch_len as u64);

    match &shared.backend {
        Backend::Sync(exporter) => {
            let result = exporter.export(batch);
            shared.note_result(result, batch_len);
            if completes_flush {
                shared.sync.notify_flush_complete();
            }
        }
        Backend::Async { exporter, slots } => {
            // Blocking here is the backpressure bounding in-flight
            // exports.
            match slots.try_acquire(Some(shared.config.schedule_delay())) {
                Some(slot) => {
                    let on_done = completion_callback(
                        Arc::downgrade(&shared.sync),
                        Arc::downgrade(slots),
                        slot,
                        completes_flush,
                    );
                    exporter.export_async(batch, on_done);
                }
                None => {
                    // Every slot stayed busy for a whole schedule
                    // interval. Export inline and wait, so a stuck
                    // exporter stalls the worker instead of deadlocking
                    // the pipeline or exceeding the in-flight cap for
                    // longer than this one batch.
                    tracing::warn!(
                        batch_len,
                        in_flight = slots.in_flight(),
                        "async export slots exhausted; exporting inline"
                    );
                    let (done_tx, done_rx) = mpsc::channel();
                    exporter.export_async(
                        batch,
                        Box::new(move |result| {
                            let _ = done_tx.send(result);
                        }),
                    );
                    let result = done_rx.recv().unwrap_or(ExportResult::Failure);
                    shared.note_result(result, batch_len);
                    if completes_flush {
                        shared.sync.notify_flush_complete();
                    }
                }
            }
        }
    }
}

/// Completion callback for an async export. Captures only weak handles:
/// a completion that arrives after the processor is gone is a no-op. The
/// slot is released before any further signaling so it can never leak.
fn completion_callback(
    sync: Weak<SyncState>,
    slots: Weak<ExportSlotPool>,
    slot: usize,
    completes_flush: bool,
) -> OnExportDone {
    Box::new(move |result| {
        let (Some(sync), Some(slots)) = (sync.upgrade(), slots.upgrade()) else {
            return;
        };
        slots.release(slot);
        if completes_flush {
            sync.notify_flush_complete();
        }
        if !result.is_success() {
            tracing::debug!(slot, "async exporter reported batch failure");
        }
    })
}
