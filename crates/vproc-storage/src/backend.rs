//! Storage port.

use async_trait::async_trait;

use vproc_models::{Frame, FrameAnalysis, Scene, TranscriptSegment, VideoId};

use crate::error::StorageResult;

/// Persistence for pipeline artifacts.
///
/// Every write must be safe to repeat: a retried job re-runs from the first
/// stage and writes the same deterministic IDs again. A repeated write is a
/// no-op or an overwrite with identical content, never a duplicate.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Backend name for logs and status output.
    fn name(&self) -> &'static str;

    /// Stored source path of a video, `None` if the video is unknown.
    async fn get_source_path(&self, video_id: &VideoId) -> StorageResult<Option<String>>;

    async fn record_normalized(
        &self,
        video_id: &VideoId,
        normalized_path: &str,
        duration_sec: f64,
    ) -> StorageResult<()>;

    /// Scenes are keyed by `scene_id(video_id, idx)`.
    async fn record_scenes(&self, video_id: &VideoId, scenes: &[Scene]) -> StorageResult<()>;

    /// Frames are keyed by `frame_id(video_id, position)`.
    async fn record_frames(&self, video_id: &VideoId, frames: &[Frame]) -> StorageResult<()>;

    /// Segments are keyed by `segment_id(video_id, position)`.
    async fn record_transcript(
        &self,
        video_id: &VideoId,
        segments: &[TranscriptSegment],
    ) -> StorageResult<()>;

    /// Store a caption for a recorded frame and return its ID, or `None` if
    /// the frame is unknown to this backend.
    async fn record_frame_caption(
        &self,
        frame_id: &str,
        analysis: &FrameAnalysis,
    ) -> StorageResult<Option<String>>;

    async fn attach_transcript_embedding(
        &self,
        segment_id: &str,
        embedding: &[f32],
    ) -> StorageResult<()>;

    async fn attach_caption_embedding(&self, caption_id: &str, embedding: &[f32])
        -> StorageResult<()>;

    /// Counts for the status endpoint.
    async fn get_stats(&self) -> StorageResult<serde_json::Value>;

    async fn health_check(&self) -> StorageResult<()>;
}
