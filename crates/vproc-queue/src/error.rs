//! Queue error types.

use thiserror::Error;

/// Result type for job source operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Errors that can occur while talking to a job source.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("SQS error: {0}")]
    Sqs(String),

    #[error("Invalid job record: {0}")]
    InvalidJob(String),

    #[error("Operation not supported by {0} source")]
    Unsupported(&'static str),

    #[error("Webhook server error: {0}")]
    Server(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn sqs(msg: impl Into<String>) -> Self {
        Self::Sqs(msg.into())
    }

    pub fn invalid_job(msg: impl Into<String>) -> Self {
        Self::InvalidJob(msg.into())
    }

    /// Whether the error is a connectivity/transport failure.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Tls(_)
            ),
            QueueError::Sqs(_) | QueueError::Io(_) => true,
            _ => false,
        }
    }
}
