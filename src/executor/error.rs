// Bastion — Executor error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Path '{0}' is outside the allowed directories")]
    PathNotAllowed(String),

    #[error("Tool executor at capacity — retry shortly")]
    CapacityExceeded,

    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    #[error("Job {0} is not running")]
    NotRunning(uuid::Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
