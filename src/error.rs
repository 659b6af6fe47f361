//! Error types shared across the transcription pipeline.
//!
//! Every per-job failure is funnelled into [`JobError`], whose display text is
//! what a polling client sees on a failed job.

use std::io;
use std::path::PathBuf;

use crate::job::{JobId, JobStatus};

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("failed to read WAV audio: {0}")]
    Wav(#[from] hound::Error),
    #[error("unexpected audio format: {0}")]
    Format(String),
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("speech model error: {0}")]
    Model(String),
    #[error("decoder chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("chunk holds {actual} samples, decoder expects {expected}")]
    ChunkSize { expected: usize, actual: usize },
    #[error("decoding cancelled")]
    Cancelled,
}

#[derive(thiserror::Error, Debug)]
pub enum AcquisitionError {
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },
    #[error("no audio stream was returned for {0}")]
    NoAudio(String),
    #[error("input file does not exist: {0}")]
    MissingInput(PathBuf),
    #[error("{0} was stopped because the job was cancelled")]
    Cancelled(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum TranscriptError {
    #[error("failed to write transcript: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode transcript: {0}")]
    Json(#[from] serde_json::Error),
}

/// Raised when a client names an output format that has no encoder.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unsupported output format: {0}")]
pub struct UnsupportedFormat(pub String);

#[derive(thiserror::Error, Debug)]
pub enum JobError {
    #[error("audio extraction failed: {0}")]
    Acquisition(AcquisitionError),
    #[error("extracted audio is unreadable: {0}")]
    Audio(#[from] AudioError),
    #[error("decoding failed: {0}")]
    Decode(DecodeError),
    #[error("failed to save transcript: {0}")]
    Transcript(#[from] TranscriptError),
    #[error("failed to prepare job workspace: {0}")]
    Workspace(io::Error),
    #[error("job cancelled")]
    Cancelled,
    #[error("worker stopped unexpectedly: {0}")]
    Worker(String),
}

impl From<AcquisitionError> for JobError {
    fn from(err: AcquisitionError) -> Self {
        match err {
            AcquisitionError::Cancelled(_) => JobError::Cancelled,
            other => JobError::Acquisition(other),
        }
    }
}

impl From<DecodeError> for JobError {
    fn from(err: DecodeError) -> Self {
        match err {
            DecodeError::Cancelled => JobError::Cancelled,
            other => JobError::Decode(other),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("job {id} cannot move from {from} to {to}")]
pub struct JobStateError {
    pub id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

#[derive(thiserror::Error, Debug)]
pub enum SubmitError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("input_url must be an absolute http(s) URL, got {0:?}")]
    InvalidUrl(String),
    #[error(transparent)]
    Format(#[from] UnsupportedFormat),
    #[error("malformed upload: {0}")]
    MalformedUpload(String),
    #[error("failed to stage upload: {0}")]
    Staging(#[from] io::Error),
    #[error("too many pending jobs ({0}), try again later")]
    QueueFull(usize),
    #[error("service is shutting down")]
    ShuttingDown,
}

#[derive(thiserror::Error, Debug)]
pub enum LookupError {
    #[error("job {0} not found")]
    NotFound(String),
    #[error("job {id} is {status}, transcript is not ready")]
    NotReady { id: JobId, status: JobStatus },
    #[error("transcript file for job {0} was not found on the server")]
    ArtifactMissing(JobId),
    #[error("job {id} already finished as {status}")]
    AlreadyFinished { id: JobId, status: JobStatus },
    #[error("failed to read transcript: {0}")]
    Io(#[from] io::Error),
}
