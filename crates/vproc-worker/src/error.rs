//! Worker error types.

use std::fmt;

use thiserror::Error;

use vproc_media::MediaError;
use vproc_ml_client::MlError;
use vproc_models::ModelError;
use vproc_queue::QueueError;
use vproc_storage::StorageError;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// How a failure is treated by the orchestrator and the worker loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Referenced video or source file is missing
    NotFound,
    /// Media is unreadable or an external reply is malformed
    InvalidInput,
    /// Network, API or database connectivity failure
    TransientTransport,
    /// Part of a stage degraded but the stage completed
    PartialDegradation,
    /// Configuration or programming error
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NotFound",
            ErrorKind::InvalidInput => "InvalidInput",
            ErrorKind::TransientTransport => "TransientTransport",
            ErrorKind::PartialDegradation => "PartialDegradation",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("InvalidInput: {0}")]
    InvalidInput(String),

    #[error("Frame analysis degraded: {0}")]
    Degraded(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Stage failed: {0}")]
    StageFailed(String),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("AI error: {0}")]
    Ml(#[from] MlError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn stage_failed(msg: impl Into<String>) -> Self {
        Self::StageFailed(msg.into())
    }

    /// Map the error onto the failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkerError::NotFound(_) => ErrorKind::NotFound,
            WorkerError::InvalidInput(_) | WorkerError::Model(_) => ErrorKind::InvalidInput,
            WorkerError::Degraded(_) => ErrorKind::PartialDegradation,
            WorkerError::ConfigError(_) | WorkerError::StageFailed(_) => ErrorKind::Internal,
            WorkerError::Media(e) => {
                if e.is_not_found() {
                    ErrorKind::NotFound
                } else if e.is_invalid_input() {
                    ErrorKind::InvalidInput
                } else if matches!(e, MediaError::Timeout(_) | MediaError::Io(_)) {
                    ErrorKind::TransientTransport
                } else {
                    ErrorKind::Internal
                }
            }
            WorkerError::Storage(e) => match e {
                StorageError::NotFound(_) => ErrorKind::NotFound,
                StorageError::Json(_) => ErrorKind::InvalidInput,
                StorageError::ConfigError(_) => ErrorKind::Internal,
                e if e.is_transient() => ErrorKind::TransientTransport,
                _ => ErrorKind::Internal,
            },
            WorkerError::Queue(e) => match e {
                QueueError::InvalidJob(_) | QueueError::Json(_) => ErrorKind::InvalidInput,
                e if e.is_transient() => ErrorKind::TransientTransport,
                _ => ErrorKind::Internal,
            },
            WorkerError::Ml(e) => {
                if e.is_retryable() {
                    ErrorKind::TransientTransport
                } else if e.is_invalid_response() {
                    ErrorKind::InvalidInput
                } else if let MlError::Io(io) = e {
                    if io.kind() == std::io::ErrorKind::NotFound {
                        ErrorKind::NotFound
                    } else {
                        ErrorKind::Internal
                    }
                } else {
                    ErrorKind::Internal
                }
            }
            WorkerError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::InvalidData => ErrorKind::InvalidInput,
                _ => ErrorKind::Internal,
            },
        }
    }

    /// Only transport failures may succeed when the job is attempted again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::TransientTransport
    }
}
