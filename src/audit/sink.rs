//! Execution Record Sinks
//!
//! Append-only destinations for execution records. Records are never
//! modified once appended.
//!
//! The file-backed log writes one JSON object per line so it can be
//! tailed while the engine runs.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::catalog::ExecutionRecord;
use crate::error::SinkError;

/// Destination for execution records.
pub trait ExecutionSink: Send + Sync {
    fn append(&self, record: ExecutionRecord) -> Result<(), SinkError>;
}

/// Keeps records in memory, in append order.
#[derive(Default)]
pub struct InMemoryExecutionLog {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl InMemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every record.
    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Returns the records of one test case, in append order.
    pub fn records_for(&self, test_case_id: &str) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.test_case_id == test_case_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExecutionSink for InMemoryExecutionLog {
    fn append(&self, record: ExecutionRecord) -> Result<(), SinkError> {
        self.records
            .lock()
            .map_err(|_| SinkError::Poisoned)?
            .push(record);
        Ok(())
    }
}

/// Appends records to a JSON Lines file.
pub struct JsonLinesExecutionLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesExecutionLog {
    /// Opens (or creates) the log file, creating parent directories as needed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                debug!("Created directory: {}", parent.display());
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Writing execution records to {}", path.display());

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads every record back from a log file.
    pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<ExecutionRecord>, SinkError> {
        let content = fs::read_to_string(path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(SinkError::from))
            .collect()
    }
}

impl ExecutionSink for JsonLinesExecutionLog {
    fn append(&self, record: ExecutionRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(&record)?;
        let mut file = self.file.lock().map_err(|_| SinkError::Poisoned)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }
}

/// Forwards each record to several sinks, stopping at the first error.
#[derive(Default)]
pub struct TeeSink {
    sinks: Vec<Arc<dyn ExecutionSink>>,
}

impl TeeSink {
    pub fn new(sinks: Vec<Arc<dyn ExecutionSink>>) -> Self {
        Self { sinks }
    }
}

impl ExecutionSink for TeeSink {
    fn append(&self, record: ExecutionRecord) -> Result<(), SinkError> {
        for sink in &self.sinks {
            sink.append(record.clone())?;
        }
        Ok(())
    }
}
