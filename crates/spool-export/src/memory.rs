//! In-memory exporter for tests and tooling.
//!
//! Collects every batch it receives so callers can assert on exactly what
//! reached the backend, in what grouping and order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::{ExportResult, Exporter, SyncExporter};

/// Exporter that appends batches to an in-memory log.
///
/// Cloning shares the underlying storage, so a test can keep one handle
/// while handing another to the processor.
#[derive(Debug)]
pub struct InMemoryExporter<R> {
    batches: Arc<Mutex<Vec<Vec<R>>>>,
    shutdown_calls: Arc<AtomicUsize>,
}

impl<R> Clone for InMemoryExporter<R> {
    fn clone(&self) -> Self {
        InMemoryExporter {
            batches: Arc::clone(&self.batches),
            shutdown_calls: Arc::clone(&self.shutdown_calls),
        }
    }
}

impl<R> Default for InMemoryExporter<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> InMemoryExporter<R> {
    /// Create an empty exporter.
    pub fn new() -> Self {
        InMemoryExporter {
            batches: Arc::new(Mutex::new(Vec::new())),
            shutdown_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of batches received so far.
    pub fn batch_count(&self) -> usize {
        self.batches.lock().expect("batch log lock").len()
    }

    /// Total number of records received so far.
    pub fn record_count(&self) -> usize {
        self.batches
            .lock()
            .expect("batch log lock")
            .iter()
            .map(|b| b.len())
            .sum()
    }

    /// Size of the largest batch received so far.
    pub fn max_batch_len(&self) -> usize {
        self.batches
            .lock()
            .expect("batch log lock")
            .iter()
            .map(|b| b.len())
            .max()
            .unwrap_or(0)
    }

    /// How many times `shutdown` has been invoked.
    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::Acquire)
    }
}

impl<R: Clone> InMemoryExporter<R> {
    /// Snapshot of the received batches, in arrival order.
    pub fn batches(&self) -> Vec<Vec<R>> {
        self.batches.lock().expect("batch log lock").clone()
    }

    /// Snapshot of all received records, flattened in arrival order.
    pub fn records(&self) -> Vec<R> {
        self.batches
            .lock()
            .expect("batch log lock")
            .iter()
            .flat_map(|b| b.iter().cloned())
            .collect()
    }
}

impl<R: Default + Send + 'static> Exporter for InMemoryExporter<R> {
    type Record = R;

    fn make_record(&self) -> R {
        R::default()
    }

    fn shutdown(&self, _limit: Option<Duration>) -> bool {
        self.shutdown_calls.fetch_add(1, Ordering::AcqRel);
        true
    }
}

impl<R: Default + Send + 'static> SyncExporter for InMemoryExporter<R> {
    fn export(&self, batch: Vec<R>) -> ExportResult {
        self.batches.lock().expect("batch log lock").push(batch);
        ExportResult::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_batches_in_order() {
        let exporter = InMemoryExporter::<String>::new();
        exporter.export(vec!["a".into(), "b".into()]);
        exporter.export(vec!["c".into()]);

        assert_eq!(exporter.batch_count(), 2);
        assert_eq!(exporter.record_count(), 3);
        assert_eq!(exporter.records(), vec!["a", "b", "c"]);
        assert_eq!(exporter.max_batch_len(), 2);
    }

    #[test]
    fn test_clone_shares_storage() {
        let exporter = InMemoryExporter::<u32>::new();
        let handle = exporter.clone();
        exporter.export(vec![1, 2, 3]);

        assert_eq!(handle.record_count(), 3);
    }

    #[test]
    fn test_shutdown_counted() {
        let exporter = InMemoryExporter::<u32>::new();
        assert!(exporter.shutdown(None));
        assert!(exporter.shutdown(Some(Duration::from_millis(10))));
        assert_eq!(exporter.shutdown_calls(), 2);
    }

    #[test]
    fn test_make_record_default() {
        let exporter = InMemoryExporter::<String>::new();
        assert_eq!(exporter.make_record(), String::new());
    }
}
