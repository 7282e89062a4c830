//! Batch processor configuration.
//!
//! Knobs and defaults match the conventional batching profile for
//! client-side telemetry SDKs: a 2048-record queue drained every 5
//! seconds in batches of up to 512, with at most 8 concurrent async
//! exports.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum number of buffered records.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;

/// Default worker schedule delay in milliseconds.
pub const DEFAULT_SCHEDULE_DELAY_MS: u64 = 5000;

/// Default maximum records per exported batch.
pub const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;

/// Default cap on concurrent in-flight async exports.
pub const DEFAULT_MAX_EXPORT_ASYNC: usize = 8;

/// Configuration validation errors.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("max_queue_size must be greater than zero")]
    ZeroQueueSize,

    #[error("max_export_batch_size must be greater than zero")]
    ZeroBatchSize,

    #[error("max_export_batch_size ({batch}) exceeds max_queue_size ({queue})")]
    BatchExceedsQueue { batch: usize, queue: usize },

    #[error("max_export_async must be at least 1")]
    ZeroAsyncSlots,
}

/// Tuning knobs for a [`BatchProcessor`](crate::BatchProcessor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum number of records buffered before new submissions are
    /// dropped.
    pub max_queue_size: usize,

    /// How long the worker sleeps between export rounds when nothing
    /// wakes it early, in milliseconds.
    pub schedule_delay_ms: u64,

    /// Maximum number of records handed to the exporter in one batch.
    /// Must not exceed `max_queue_size`.
    pub max_export_batch_size: usize,

    /// Cap on concurrent in-flight exports when the exporter is
    /// async-capable. Ignored for sync exporters.
    pub max_export_async: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            schedule_delay_ms: DEFAULT_SCHEDULE_DELAY_MS,
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
            max_export_async: DEFAULT_MAX_EXPORT_ASYNC,
        }
    }
}

impl BatchConfig {
    /// Set the queue capacity.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Set the worker schedule delay.
    pub fn with_schedule_delay(mut self, delay: Duration) -> Self {
        self.schedule_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the maximum batch size.
    pub fn with_max_export_batch_size(mut self, size: usize) -> Self {
        self.max_export_batch_size = size;
        self
    }

    /// Set the in-flight async export cap.
    pub fn with_max_export_async(mut self, slots: usize) -> Self {
        self.max_export_async = slots;
        self
    }

    /// Worker schedule delay as a [`Duration`].
    pub fn schedule_delay(&self) -> Duration {
        Duration::from_millis(self.schedule_delay_ms)
    }

    /// Semantic validation, run at processor construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if self.max_export_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_export_batch_size > self.max_queue_size {
            return Err(ConfigError::BatchExceedsQueue {
                batch: self.max_export_batch_size,
                queue: self.max_queue_size,
            });
        }
        if self.max_export_async == 0 {
            return Err(ConfigError::ZeroAsyncSlots);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.max_queue_size, 2048);
        assert_eq!(config.schedule_delay(), Duration::from_millis(5000));
        assert_eq!(config.max_export_batch_size, 512);
        assert_eq!(config.max_export_async, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = BatchConfig::default()
            .with_max_queue_size(64)
            .with_schedule_delay(Duration::from_millis(250))
            .with_max_export_batch_size(16)
            .with_max_export_async(2);

        assert_eq!(config.max_queue_size, 64);
        assert_eq!(config.schedule_delay_ms, 250);
        assert_eq!(config.max_export_batch_size, 16);
        assert_eq!(config.max_export_async, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_batch_larger_than_queue_rejected() {
        let config = BatchConfig::default()
            .with_max_queue_size(100)
            .with_max_export_batch_size(200);
        assert_eq!(
            config.validate(),
            Err(ConfigError::BatchExceedsQueue {
                batch: 200,
                queue: 100
            })
        );
    }

    #[test]
    fn test_zero_values_rejected() {
        assert_eq!(
            BatchConfig::default().with_max_queue_size(0).validate(),
            Err(ConfigError::ZeroQueueSize)
        );
        assert_eq!(
            BatchConfig::default()
                .with_max_export_batch_size(0)
                .validate(),
            Err(ConfigError::ZeroBatchSize)
        );
        assert_eq!(
            BatchConfig::default().with_max_export_async(0).validate(),
            Err(ConfigError::ZeroAsyncSlots)
        );
    }

    #[test]
    fn test_serde_round_trip_with_partial_input() {
        let parsed: BatchConfig = serde_json::from_str(r#"{"max_queue_size": 4096}"#).unwrap();
        assert_eq!(parsed.max_queue_size, 4096);
        assert_eq!(parsed.max_export_batch_size, 512);

        let json = serde_json::to_string(&parsed).unwrap();
        let round: BatchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(round, parsed);
    }
}
