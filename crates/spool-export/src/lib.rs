//! Exporter boundary for the spool batching pipeline.
//!
//! This crate provides:
//! - The [`ExportResult`] outcome type
//! - The [`Exporter`] base contract plus the [`SyncExporter`] and
//!   [`AsyncExporter`] capability traits
//! - Built-in exporters: [`InMemoryExporter`] for tests and tooling,
//!   [`JsonlExporter`] for local file sinks
//!
//! # Threading Contract
//!
//! [`Exporter::make_record`] may be called from any thread. The export
//! methods are only ever invoked from the processor's worker thread, one
//! call at a time, so a sync exporter may rely on never being entered
//! concurrently with itself. An async exporter must tolerate up to the
//! processor's configured number of in-flight exports.
//!
//! An async exporter must invoke the completion callback exactly once per
//! export. The processor tolerates a misbehaving exporter that invokes it
//! more than once, but the duplicate invocations are ignored.

pub mod jsonl;
pub mod memory;

pub use jsonl::{ExportError, JsonlExporter};
pub use memory::InMemoryExporter;

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Outcome of handing one batch to an exporter.
///
/// The batching pipeline treats this as informational: a failed batch is
/// counted and logged but never retried. Exporters that want retry
/// semantics implement them internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportResult {
    /// The batch was accepted by the backend.
    Success,
    /// The batch was lost; the records will not be re-offered.
    Failure,
}

impl ExportResult {
    /// Whether the batch was accepted.
    pub fn is_success(&self) -> bool {
        matches!(self, ExportResult::Success)
    }
}

/// Completion callback handed to [`AsyncExporter::export_async`].
pub type OnExportDone = Box<dyn FnOnce(ExportResult) + Send + 'static>;

/// Base contract shared by all exporters.
///
/// The record type is opaque to the pipeline: created here, populated by
/// the instrumentation layer, handed to the processor exactly once, and
/// destroyed either after export or when dropped on overflow.
pub trait Exporter: Send + Sync + 'static {
    /// The record type this exporter produces and consumes.
    type Record: Send + 'static;

    /// Create a blank record for the instrumentation layer to fill in.
    ///
    /// Callable from any thread.
    fn make_record(&self) -> Self::Record;

    /// Flush internal state and release backend resources.
    ///
    /// `limit` of `None` means wait as long as needed; `Some(d)` bounds
    /// the wait. Returns whether shutdown completed within the limit.
    fn shutdown(&self, limit: Option<Duration>) -> bool {
        let _ = limit;
        true
    }
}

/// An exporter whose export call blocks until the batch is handled.
pub trait SyncExporter: Exporter {
    /// Hand one batch to the backend, blocking until it is handled.
    fn export(&self, batch: Vec<Self::Record>) -> ExportResult;
}

/// An exporter that accepts a batch and completes it on its own schedule.
///
/// `on_done` may be invoked from any thread, including after the owning
/// processor has been torn down.
pub trait AsyncExporter: Exporter {
    /// Begin exporting one batch; `on_done` reports the outcome.
    fn export_async(&self, batch: Vec<Self::Record>, on_done: OnExportDone);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_result_is_success() {
        assert!(ExportResult::Success.is_success());
        assert!(!ExportResult::Failure.is_success());
    }

    #[test]
    fn test_export_result_serde_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExportResult::Success).unwrap(),
            "\"success\""
        );
        let parsed: ExportResult = serde_json::from_str("\"failure\"").unwrap();
        assert_eq!(parsed, ExportResult::Failure);
    }
}
