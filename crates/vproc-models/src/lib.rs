//! Shared data models for the video processing worker.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs and their lifecycle status
//! - Video metadata
//! - Pipeline artifacts (scenes, frames, transcript segments, captions)
//! - Processing results and pipeline stage names
//! - Deterministic identifiers for derived entities

pub mod caption;
pub mod error;
pub mod frame;
pub mod ids;
pub mod job;
pub mod result;
pub mod scene;
pub mod transcript;
pub mod video;

// Re-export common types
pub use caption::{ControlItem, FrameAnalysis, FrameCaption, ScreenText};
pub use error::{ModelError, ModelResult};
pub use frame::Frame;
pub use ids::{caption_id, frame_id, scene_id, segment_id};
pub use job::{Job, JobId, JobStatus};
pub use result::{ProcessingResult, Stage};
pub use scene::{validate_scenes, Scene};
pub use transcript::TranscriptSegment;
pub use video::{VideoId, VideoMetadata, VideoStatus};

/// Dimension of every embedding vector produced by the pipeline.
pub const EMBEDDING_DIMENSIONS: usize = 1536;
