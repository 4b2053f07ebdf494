use thiserror::Error;

use crate::types::JobKey;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A persisted schedule could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The provided schedule definition is invalid or unsupported.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A job with the same key is already stored.
    #[error("Job already exists: {key}")]
    JobAlreadyExists { key: JobKey },

    /// No job with the given key exists in the store.
    #[error("Job not found: {key}")]
    JobNotFound { key: JobKey },

    /// No job implementation was registered under this type name.
    #[error("Unknown job type: {job_type}")]
    UnknownJobType { job_type: String },

    /// The scheduler was shut down and cannot accept work.
    #[error("Scheduler has been shut down")]
    ShutDown,
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Failure reported by a job implementation.
#[derive(Debug, Error)]
#[error("job failed: {message}")]
pub struct JobError {
    pub message: String,
}

impl JobError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
