//! Client for the AI inference API.
//!
//! This crate provides:
//! - Speech-to-text with timed segments
//! - Structured frame analysis through a vision model
//! - Fixed-width text embeddings and token-sized text chunking

pub mod client;
pub mod embeddings;
pub mod error;
pub mod transcription;
pub mod vision;

pub use client::{MlClient, MlClientConfig, DEFAULT_BASE_URL};
pub use embeddings::chunk_text_by_tokens;
pub use error::{MlError, MlResult};
pub use transcription::{segments_from_response, TranscriptionResponse};
pub use vision::frame_analysis_schema;
