//! Batch Controller Module
//!
//! Owns the ordered job queue, dispatches jobs under a concurrency bound,
//! aggregates progress and coordinates batch-wide cancellation.

mod controller;
mod output;
mod state;

pub use controller::*;
pub use output::*;
pub use state::*;

use std::path::PathBuf;

use serde::Serialize;

use crate::core::jobs::{JobStatus, LogLevel};
use crate::core::{format_duration, JobId, MediaKind};

// =============================================================================
// Events
// =============================================================================

/// Events published by a running batch
///
/// Per-job events carry the job id and the input file name, since events of
/// concurrent jobs interleave.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BatchEvent {
    BatchStarted {
        total: usize,
    },
    JobStarted {
        job_id: JobId,
        input_name: String,
        kind: MediaKind,
    },
    JobProgress {
        job_id: JobId,
        input_name: String,
        progress: u8,
    },
    JobLog {
        job_id: JobId,
        input_name: String,
        level: LogLevel,
        message: String,
    },
    JobError {
        job_id: JobId,
        input_name: String,
        message: String,
    },
    JobResult {
        job_id: JobId,
        input_name: String,
        output: PathBuf,
    },
    JobFinished {
        job_id: JobId,
        input_name: String,
        status: JobStatus,
    },
    BatchProgress(BatchProgress),
    /// Stop was requested; running jobs are being cancelled
    BatchStopping,
    BatchFinished(BatchSummary),
}

/// Final accounting of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// `stop()` was called before the batch ran out of jobs
    pub stopped: bool,
    pub elapsed_secs: u64,
}

impl BatchSummary {
    pub fn is_clean(&self) -> bool {
        !self.stopped && self.failed == 0 && self.cancelled == 0
    }

    /// One-line human summary
    pub fn message(&self) -> String {
        let elapsed = format_duration(std::time::Duration::from_secs(self.elapsed_secs));
        if self.stopped {
            format!(
                "Processing stopped after {}: {} of {} files succeeded, {} failed, {} cancelled",
                elapsed, self.succeeded, self.total, self.failed, self.cancelled
            )
        } else {
            format!(
                "Processed {} files in {}: {} succeeded, {} failed, {} cancelled",
                self.total, elapsed, self.succeeded, self.failed, self.cancelled
            )
        }
    }
}
