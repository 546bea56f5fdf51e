//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during media processing.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Scene detection failed: {0}")]
    SceneDetection(String),

    #[error("Image hashing failed: {0}")]
    Hashing(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl MediaError {
    /// Create an FFmpeg failure error.
    pub fn ffmpeg_failed(
        message: impl Into<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
    ) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            stderr,
            exit_code,
        }
    }

    pub fn invalid_video(message: impl Into<String>) -> Self {
        Self::InvalidVideo(message.into())
    }

    pub fn scene_detection(message: impl Into<String>) -> Self {
        Self::SceneDetection(message.into())
    }

    /// Whether the error describes a missing input rather than a broken one.
    pub fn is_not_found(&self) -> bool {
        matches!(self, MediaError::FileNotFound(_))
    }

    /// Whether the input media itself is unreadable or malformed.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            MediaError::InvalidVideo(_)
                | MediaError::FfprobeFailed { .. }
                | MediaError::SceneDetection(_)
                | MediaError::Hashing(_)
                | MediaError::JsonParse(_)
        )
    }
}
