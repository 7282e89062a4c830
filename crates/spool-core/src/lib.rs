//! Bounded batching pipeline for client-side telemetry records.
//!
//! This crate provides:
//! - A fixed-capacity lock-free queue with drop-on-overflow semantics
//! - A background worker draining the queue in bounded batches
//! - Deterministic force-flush and shutdown coordination
//! - An in-flight limiter for async-capable exporters
//!
//! Producers call [`BatchProcessor::submit`] from any thread without ever
//! blocking; the worker hands batches to an exporter implementing the
//! contracts in the `spool-export` crate.
//!
//! # Example
//!
//! ```
//! use spool_core::{BatchConfig, BatchProcessor};
//! use spool_export::InMemoryExporter;
//!
//! let exporter = InMemoryExporter::<String>::new();
//! let received = exporter.clone();
//!
//! let processor = BatchProcessor::new(exporter, BatchConfig::default()).unwrap();
//! processor.submit("startup complete".to_string());
//! assert!(processor.force_flush(None));
//! assert_eq!(received.record_count(), 1);
//! assert!(processor.shutdown(None));
//! ```

pub mod config;
pub mod processor;
pub mod queue;
pub mod slots;
pub mod sync;

pub use config::{BatchConfig, ConfigError};
pub use processor::{BatchProcessor, ProcessorError, ProcessorStats};
pub use queue::BoundedQueue;
pub use slots::ExportSlotPool;
pub use sync::{Deadline, SyncState};
