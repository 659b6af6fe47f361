//! Job record and lifecycle.
//!
//! ```text
//! Queued ──start──▶ Processing ──complete──▶ Completed
//!    │                  │
//!    └──────fail────────┴────────fail──────▶ Failed
//! ```
//!
//! Every transition goes through a method on [`Job`] so the invariants hold at
//! each step: `result` is set only when `Completed`, `error` only when
//! `Failed`, progress never moves backwards except the reset to 0 on failure,
//! and terminal jobs are immutable.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobStateError;
use crate::transcript::OutputFormat;
use crate::Utterance;

/// Progress recorded when a worker picks up a job.
pub const PROGRESS_STARTED: u8 = 5;
/// Progress recorded once audio has been acquired.
pub const PROGRESS_ACQUIRED: u8 = 10;
/// Highest progress reachable while still decoding or saving.
pub const PROGRESS_MAX_RUNNING: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, enough to tell artifacts apart.
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub utterances: Vec<Utterance>,
    pub artifact_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// URL or original file name, as submitted.
    pub input: String,
    pub output_format: OutputFormat,
    pub status: JobStatus,
    pub message: String,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    /// Staged copy of an uploaded video, deleted when the job finishes.
    pub upload_path: Option<PathBuf>,
}

impl Job {
    pub fn new(
        id: JobId,
        input: impl Into<String>,
        output_format: OutputFormat,
        upload_path: Option<PathBuf>,
    ) -> Self {
        Self {
            id,
            input: input.into(),
            output_format,
            status: JobStatus::Queued,
            message: "Waiting for a free worker".to_string(),
            progress: 0,
            created_at: Utc::now(),
            finished_at: None,
            result: None,
            error: None,
            upload_path,
        }
    }

    pub fn start(&mut self) -> Result<(), JobStateError> {
        self.ensure(JobStatus::Queued, JobStatus::Processing)?;
        self.status = JobStatus::Processing;
        self.progress = PROGRESS_STARTED;
        self.message = "Preparing".to_string();
        Ok(())
    }

    /// Record intermediate progress. Lower values than the current one are
    /// ignored and 100 is reserved for completion.
    pub fn advance(&mut self, progress: u8, message: impl Into<String>) -> Result<(), JobStateError> {
        self.ensure(JobStatus::Processing, JobStatus::Processing)?;
        self.progress = self.progress.max(progress.min(PROGRESS_MAX_RUNNING));
        self.message = message.into();
        Ok(())
    }

    pub fn complete(&mut self, result: JobResult) -> Result<(), JobStateError> {
        self.ensure(JobStatus::Processing, JobStatus::Completed)?;
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.message = "Transcription completed".to_string();
        self.result = Some(result);
        self.error = None;
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), JobStateError> {
        if self.status.is_terminal() {
            return Err(self.transition_error(JobStatus::Failed));
        }
        let error = error.into();
        self.status = JobStatus::Failed;
        self.progress = 0;
        self.message = format!("Transcription failed: {error}");
        self.result = None;
        self.error = Some(error);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    fn ensure(&self, expected: JobStatus, to: JobStatus) -> Result<(), JobStateError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(self.transition_error(to))
        }
    }

    fn transition_error(&self, to: JobStatus) -> JobStateError {
        JobStateError {
            id: self.id,
            from: self.status,
            to,
        }
    }
}
