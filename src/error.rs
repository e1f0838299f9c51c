use thiserror::Error;

#[derive(Error, Debug)]
pub enum MallobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job not found: #{0}")]
    JobNotFound(u32),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("File watcher error: {0}")]
    Watcher(#[from] notify::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, MallobError>;

/// Failure classes for one job-file ingestion attempt.
///
/// The adapter recovers from all of these by warning and skipping the file;
/// the distinction exists for logging and for tests.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),
}
