//! Append-only result log.
//!
//! One tab separated record per terminal job, no header row:
//!
//! ```text
//! <linker_id>\t<epoch>\tFinished\t<property>\t
//! <linker_id>\t<epoch>\tFailed\t\t<reason>
//! ```
//!
//! Fields holding tabs, quotes or newlines are quoted, so failure reasons
//! read back exactly as they were written.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SearchError;
use crate::state_machine::{Job, JobState};

/// One row of the result log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub linker_id: String,
    pub epoch: u32,
    pub status: JobState,
    pub property: Option<f64>,
    pub reason: Option<String>,
}

impl ResultRecord {
    pub fn from_job(job: &Job) -> Self {
        Self {
            linker_id: job.linker_id.clone(),
            epoch: job.epoch,
            status: job.state,
            property: job.property,
            reason: job.failure.as_ref().map(ToString::to_string),
        }
    }

    fn into_entry(self, line: u64) -> Result<LogEntry, SearchError> {
        let outcome = match (self.status, self.property) {
            (JobState::Finished, Some(property)) => LogOutcome::Finished { property },
            (JobState::Finished, None) => {
                return Err(malformed(line, "finished record without a property"));
            }
            (JobState::Failed, _) => LogOutcome::Failed {
                reason: self.reason.unwrap_or_default(),
            },
            (state, _) => {
                return Err(malformed(line, &format!("non-terminal status {state}")));
            }
        };
        Ok(LogEntry {
            linker_id: self.linker_id,
            epoch: self.epoch,
            outcome,
        })
    }
}

/// Writer for `<run>/<mode>.txt`.
pub struct ResultLog {
    path: PathBuf,
    writer: csv::Writer<File>,
    written: usize,
}

impl ResultLog {
    /// Create (or truncate) the log for a fresh run.
    pub fn create(path: &Path) -> Result<Self, SearchError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(file);
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            written: 0,
        })
    }

    /// Append one record and flush it, so the log can be read while the run
    /// is still going.
    pub fn record(&mut self, record: &ResultRecord) -> Result<(), SearchError> {
        self.writer.serialize(record)?;
        self.writer.flush()?;
        self.written += 1;
        debug!(linker = %record.linker_id, status = %record.status, "result recorded");
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the log.
    pub fn finish(mut self) -> Result<PathBuf, SearchError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome {
    Finished { property: f64 },
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub linker_id: String,
    pub epoch: u32,
    pub outcome: LogOutcome,
}

fn malformed(line: u64, reason: &str) -> SearchError {
    SearchError::ResultFormat {
        line: line as usize,
        reason: reason.to_string(),
    }
}

/// Parse a result log written by [`ResultLog`].
pub fn read_log(path: &Path) -> Result<Vec<LogEntry>, SearchError> {
    if !path.exists() {
        return Err(SearchError::NoResults(path.to_path_buf()));
    }
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(path)?;

    let mut entries = Vec::new();
    for result in reader.records() {
        let row = result.map_err(|e| {
            let line = e.position().map_or(0, |pos| pos.line());
            malformed(line, &e.to_string())
        })?;
        let line = row.position().map_or(0, |pos| pos.line());
        let record: ResultRecord = row
            .deserialize(None)
            .map_err(|e| malformed(line, &e.to_string()))?;
        entries.push(record.into_entry(line)?);
    }
    Ok(entries)
}

/// Aggregate view of a result log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultSummary {
    pub finished: usize,
    pub failed: usize,
    pub best: Option<(String, f64)>,
    pub mean_property: Option<f64>,
}

impl ResultSummary {
    pub fn from_entries(entries: &[LogEntry]) -> Self {
        let properties: Vec<(&str, f64)> = entries
            .iter()
            .filter_map(|entry| match entry.outcome {
                LogOutcome::Finished { property } => Some((entry.linker_id.as_str(), property)),
                LogOutcome::Failed { .. } => None,
            })
            .collect();

        let best = properties
            .iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(id, value)| (id.to_string(), *value));
        let mean_property = if properties.is_empty() {
            None
        } else {
            Some(properties.iter().map(|(_, v)| v).sum::<f64>() / properties.len() as f64)
        };

        Self {
            finished: properties.len(),
            failed: entries.len() - properties.len(),
            best,
            mean_property,
        }
    }
}
