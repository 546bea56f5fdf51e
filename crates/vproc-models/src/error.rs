//! Model validation errors.

use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("Invalid scene {idx}: {message}")]
    InvalidScene { idx: u32, message: String },

    #[error("Unknown status: {0}")]
    UnknownStatus(String),
}

impl ModelError {
    pub fn invalid_scene(idx: u32, message: impl Into<String>) -> Self {
        Self::InvalidScene {
            idx,
            message: message.into(),
        }
    }
}
