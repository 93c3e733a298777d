//! Job System Module
//!
//! One job upscales one input file. A job is created `Queued` when it is
//! enqueued, moves to `Running` when the batch dispatches it, and ends in
//! exactly one terminal state.

mod executor;

pub use executor::*;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::{JobId, MediaKind};

// =============================================================================
// Job Types
// =============================================================================

/// Job status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobStatus {
    /// Waiting in queue
    #[default]
    Queued,
    /// Currently running
    Running,
    /// Output written
    Succeeded,
    /// Failed with error
    Failed,
    /// Cancelled by user, before or during execution
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Job definition
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Source file
    pub input_path: PathBuf,
    /// Derived destination file
    pub output_path: PathBuf,
    /// Pipeline to run
    pub kind: MediaKind,
    /// Current status
    pub status: JobStatus,
    /// Last reported progress (0-100)
    pub progress: u8,
    /// Creation timestamp
    pub created_at: String,
    /// Dispatch timestamp
    pub started_at: Option<String>,
    /// Completion timestamp
    pub completed_at: Option<String>,
}

impl Job {
    /// Creates a new queued job
    pub fn new(input_path: PathBuf, output_path: PathBuf) -> Self {
        let kind = MediaKind::from_path(&input_path);
        Self {
            id: ulid::Ulid::new().to_string(),
            input_path,
            output_path,
            kind,
            status: JobStatus::Queued,
            progress: 0,
            created_at: chrono::Utc::now().to_rfc3339(),
            started_at: None,
            completed_at: None,
        }
    }

    /// File name of the input, for log lines
    pub fn display_name(&self) -> String {
        self.input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.input_path.display().to_string())
    }

    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }

    /// Checks if job reached a terminal state
    pub fn is_done(&self) -> bool {
        self.status.is_terminal()
    }

    pub(crate) fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(chrono::Utc::now().to_rfc3339());
    }

    /// Records progress; values never go backwards and are capped at 100.
    pub(crate) fn record_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    /// Moves to a terminal state. Terminal states are final.
    pub(crate) fn finish(&mut self, status: JobStatus) -> bool {
        if self.is_done() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        if status == JobStatus::Succeeded {
            self.progress = 100;
        }
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
        true
    }
}

// =============================================================================
// Events
// =============================================================================

/// Severity of a user-facing job log line
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LogLevel {
    Info,
    Warning,
}

/// Event payload sent from a running job to the batch
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobEventKind {
    Progress(u8),
    Log { level: LogLevel, message: String },
    Error(String),
    Result(PathBuf),
    /// Always the last event of a job
    Finished(JobStatus),
}

/// Job event tagged with its job id
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobEvent {
    pub job_id: JobId,
    pub kind: JobEventKind,
}
