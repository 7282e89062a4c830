//! JSONL file exporter.
//!
//! Writes one JSON line per record to a local file, with an envelope
//! carrying the export timestamp. Intended for local debugging sinks and
//! air-gapped capture; a real wire-format exporter lives outside this
//! workspace and implements the same traits.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::{ExportResult, Exporter, SyncExporter};

/// Errors from JSONL exporter operations.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Envelope written as one line per exported record.
#[derive(Debug, Serialize)]
struct ExportLine<'a, R: Serialize> {
    exported_at: DateTime<Utc>,
    record: &'a R,
}

/// Exporter that appends records to a JSONL file.
pub struct JsonlExporter<R> {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R> JsonlExporter<R> {
    /// Create or truncate the output file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(JsonlExporter {
            writer: Mutex::new(BufWriter::new(file)),
            path,
            _record: PhantomData,
        })
    }

    /// Open the output file at `path` for appending.
    pub fn append(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(JsonlExporter {
            writer: Mutex::new(BufWriter::new(file)),
            path,
            _record: PhantomData,
        })
    }

    /// Path of the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_batch(&self, batch: &[R]) -> Result<(), ExportError>
    where
        R: Serialize,
    {
        let mut writer = self.writer.lock().expect("jsonl writer lock");
        let now = Utc::now();
        for record in batch {
            let line = ExportLine {
                exported_at: now,
                record,
            };
            serde_json::to_writer(&mut *writer, &line)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl<R: Serialize + Default + Send + 'static> Exporter for JsonlExporter<R> {
    type Record = R;

    fn make_record(&self) -> R {
        R::default()
    }

    fn shutdown(&self, _limit: Option<Duration>) -> bool {
        match self.writer.lock().expect("jsonl writer lock").flush() {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "jsonl flush failed on shutdown");
                false
            }
        }
    }
}

impl<R: Serialize + Default + Send + 'static> SyncExporter for JsonlExporter<R> {
    fn export(&self, batch: Vec<R>) -> ExportResult {
        match self.write_batch(&batch) {
            Ok(()) => ExportResult::Success,
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    batch_len = batch.len(),
                    %error,
                    "jsonl export failed"
                );
                ExportResult::Failure
            }
        }
    }
}
