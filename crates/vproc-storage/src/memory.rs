//! In-process storage backend.
//!
//! Keeps every artifact in maps keyed by the same deterministic IDs the
//! durable backends use. Backs orchestrator and worker tests, and local runs
//! without a database.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use vproc_models::{
    caption_id, frame_id, scene_id, segment_id, Frame, FrameAnalysis, FrameCaption, Scene,
    TranscriptSegment, VideoId, VideoMetadata, VideoStatus,
};

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

#[derive(Debug, Default)]
struct State {
    videos: HashMap<String, VideoMetadata>,
    scenes: BTreeMap<String, Scene>,
    frames: BTreeMap<String, Frame>,
    segments: BTreeMap<String, TranscriptSegment>,
    captions: BTreeMap<String, FrameCaption>,
    fail_writes: bool,
}

impl State {
    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes {
            return Err(StorageError::upload_failed("storage unavailable"));
        }
        Ok(())
    }

    fn remove_frames(&mut self, frame_ids: &[String]) {
        for id in frame_ids {
            self.frames.remove(id);
            self.captions.remove(&caption_id(id));
        }
    }
}

/// Whether `key` is `{prefix}{ordinal}` for this video.
fn is_ordinal_key(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

#[derive(Debug, Default)]
pub struct InMemoryStorage {
    state: Mutex<State>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uploaded video.
    pub fn insert_video(&self, video: VideoMetadata) {
        self.state
            .lock()
            .videos
            .insert(video.id.as_str().to_string(), video);
    }

    /// Make every subsequent write fail with a transient error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    pub fn video(&self, video_id: &VideoId) -> Option<VideoMetadata> {
        self.state.lock().videos.get(video_id.as_str()).cloned()
    }

    pub fn scene_count(&self) -> usize {
        self.state.lock().scenes.len()
    }

    pub fn frame_count(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn segment_count(&self) -> usize {
        self.state.lock().segments.len()
    }

    pub fn caption_count(&self) -> usize {
        self.state.lock().captions.len()
    }

    pub fn segment(&self, segment_id: &str) -> Option<TranscriptSegment> {
        self.state.lock().segments.get(segment_id).cloned()
    }

    pub fn caption(&self, caption_id: &str) -> Option<FrameCaption> {
        self.state.lock().captions.get(caption_id).cloned()
    }
}

#[async_trait]
impl StorageBackend for InMemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_source_path(&self, video_id: &VideoId) -> StorageResult<Option<String>> {
        Ok(self
            .state
            .lock()
            .videos
            .get(video_id.as_str())
            .map(|v| v.original_path.clone()))
    }

    async fn record_normalized(
        &self,
        video_id: &VideoId,
        normalized_path: &str,
        duration_sec: f64,
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.check_writable()?;

        let video = state
            .videos
            .get_mut(video_id.as_str())
            .ok_or_else(|| StorageError::not_found(video_id.as_str()))?;
        video.normalized_path = Some(normalized_path.to_string());
        video.duration_sec = Some(duration_sec);
        video.status = VideoStatus::Normalized;
        Ok(())
    }

    async fn record_scenes(&self, video_id: &VideoId, scenes: &[Scene]) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.check_writable()?;

        let keep: BTreeSet<String> = scenes
            .iter()
            .map(|scene| scene_id(video_id, scene.idx as usize))
            .collect();
        let prefix = format!("{}_scene_", video_id);
        state
            .scenes
            .retain(|id, _| !is_ordinal_key(id, &prefix) || keep.contains(id));

        // Frames of scenes that no longer exist go with them.
        let scene_count = scenes.len() as u32;
        let frame_prefix = format!("{}_frame_", video_id);
        let orphaned: Vec<String> = state
            .frames
            .iter()
            .filter(|(id, frame)| is_ordinal_key(id, &frame_prefix) && frame.scene_idx >= scene_count)
            .map(|(id, _)| id.clone())
            .collect();
        state.remove_frames(&orphaned);

        for scene in scenes {
            state
                .scenes
                .insert(scene_id(video_id, scene.idx as usize), scene.clone());
        }
        Ok(())
    }

    async fn record_frames(&self, video_id: &VideoId, frames: &[Frame]) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.check_writable()?;

        let prefix = format!("{}_frame_", video_id);
        let stale: Vec<String> = state
            .frames
            .keys()
            .filter(|id| is_ordinal_key(id, &prefix))
            .filter(|id| {
                id[prefix.len()..]
                    .parse::<usize>()
                    .map_or(true, |ordinal| ordinal >= frames.len())
            })
            .cloned()
            .collect();
        state.remove_frames(&stale);

        for (i, frame) in frames.iter().enumerate() {
            state.frames.insert(frame_id(video_id, i), frame.clone());
        }
        Ok(())
    }

    async fn record_transcript(
        &self,
        video_id: &VideoId,
        segments: &[TranscriptSegment],
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.check_writable()?;

        let prefix = format!("{}_segment_", video_id);
        let count = segments.len();
        state.segments.retain(|id, _| {
            !is_ordinal_key(id, &prefix)
                || id[prefix.len()..]
                    .parse::<usize>()
                    .is_ok_and(|ordinal| ordinal < count)
        });

        for (i, segment) in segments.iter().enumerate() {
            let id = segment_id(video_id, i);
            let embedding = state
                .segments
                .get(&id)
                .filter(|old| old.text == segment.text)
                .and_then(|old| old.embedding.clone());
            state.segments.insert(
                id,
                TranscriptSegment {
                    embedding,
                    ..segment.clone()
                },
            );
        }
        Ok(())
    }

    async fn record_frame_caption(
        &self,
        frame_id: &str,
        analysis: &FrameAnalysis,
    ) -> StorageResult<Option<String>> {
        let mut state = self.state.lock();
        state.check_writable()?;

        if !state.frames.contains_key(frame_id) {
            return Ok(None);
        }

        let id = caption_id(frame_id);
        let embedding = state
            .captions
            .get(&id)
            .filter(|old| &old.analysis == analysis)
            .and_then(|old| old.embedding.clone());
        state.captions.insert(
            id.clone(),
            FrameCaption {
                frame_id: frame_id.to_string(),
                analysis: analysis.clone(),
                embedding,
            },
        );
        Ok(Some(id))
    }

    async fn attach_transcript_embedding(
        &self,
        segment_id: &str,
        embedding: &[f32],
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.check_writable()?;

        if let Some(segment) = state.segments.get_mut(segment_id) {
            segment.embedding = Some(embedding.to_vec());
        }
        Ok(())
    }

    async fn attach_caption_embedding(
        &self,
        caption_id: &str,
        embedding: &[f32],
    ) -> StorageResult<()> {
        let mut state = self.state.lock();
        state.check_writable()?;

        if let Some(caption) = state.captions.get_mut(caption_id) {
            caption.embedding = Some(embedding.to_vec());
        }
        Ok(())
    }

    async fn get_stats(&self) -> StorageResult<serde_json::Value> {
        let state = self.state.lock();
        Ok(json!({
            "backend": "memory",
            "videos": state.videos.len(),
            "scenes": state.scenes.len(),
            "frames": state.frames.len(),
            "transcript_segments": state.segments.len(),
            "frame_captions": state.captions.len(),
        }))
    }

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with_video() -> (InMemoryStorage, VideoId) {
        let storage = InMemoryStorage::new();
        let video = VideoId::from("v1");
        storage.insert_video(VideoMetadata::new(video.clone(), "uploads/v1.mp4"));
        (storage, video)
    }

    fn scenes() -> Vec<Scene> {
        vec![Scene::new(0, 0.0, 4.0), Scene::new(1, 4.0, 9.5)]
    }

    #[tokio::test]
    async fn test_source_path_lookup() {
        let (storage, video) = storage_with_video();
        assert_eq!(
            storage.get_source_path(&video).await.unwrap().as_deref(),
            Some("uploads/v1.mp4")
        );
        assert!(storage
            .get_source_path(&VideoId::from("missing"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_record_normalized_updates_video() {
        let (storage, video) = storage_with_video();
        storage
            .record_normalized(&video, "/data/processed/v1/normalized.mp4", 9.5)
            .await
            .unwrap();

        let stored = storage.video(&video).unwrap();
        assert_eq!(stored.status, VideoStatus::Normalized);
        assert_eq!(stored.duration_sec, Some(9.5));
    }

    #[tokio::test]
    async fn test_repeated_writes_are_idempotent() {
        let (storage, video) = storage_with_video();
        let frames = vec![Frame::new(0, "00ff00ff00ff00ff", "a.jpg", 2.0)];
        let segments = vec![TranscriptSegment::new(0.0, 2.0, "hello")];

        for _ in 0..2 {
            storage.record_scenes(&video, &scenes()).await.unwrap();
            storage.record_frames(&video, &frames).await.unwrap();
            storage.record_transcript(&video, &segments).await.unwrap();
            storage
                .record_frame_caption("v1_frame_000", &FrameAnalysis::placeholder("x"))
                .await
                .unwrap();
        }

        assert_eq!(storage.scene_count(), 2);
        assert_eq!(storage.frame_count(), 1);
        assert_eq!(storage.segment_count(), 1);
        assert_eq!(storage.caption_count(), 1);
    }

    #[tokio::test]
    async fn test_rewrite_replaces_previous_artifacts() {
        let (storage, video) = storage_with_video();
        let three = vec![Scene::new(0, 0.0, 3.0), Scene::new(1, 3.0, 6.0), Scene::new(2, 6.0, 9.5)];
        let frames = vec![
            Frame::new(0, "00ff00ff00ff00ff", "a.jpg", 1.5),
            Frame::new(1, "ff00ff00ff00ff00", "b.jpg", 4.5),
            Frame::new(2, "0f0f0f0f0f0f0f0f", "c.jpg", 7.0),
        ];
        storage.record_scenes(&video, &three).await.unwrap();
        storage.record_frames(&video, &frames).await.unwrap();
        storage
            .record_transcript(
                &video,
                &[
                    TranscriptSegment::new(0.0, 2.0, "one"),
                    TranscriptSegment::new(2.0, 4.0, "two"),
                ],
            )
            .await
            .unwrap();
        storage
            .record_frame_caption("v1_frame_002", &FrameAnalysis::default())
            .await
            .unwrap();

        // A retry finds fewer scenes, frames and segments, with shifted times.
        storage.record_scenes(&video, &scenes()).await.unwrap();
        storage.record_frames(&video, &frames[..1]).await.unwrap();
        storage
            .record_transcript(&video, &[TranscriptSegment::new(0.1, 2.2, "one")])
            .await
            .unwrap();

        assert_eq!(storage.scene_count(), 2);
        assert_eq!(storage.frame_count(), 1);
        assert_eq!(storage.caption_count(), 0);
        assert_eq!(storage.segment_count(), 1);
        let segment = storage.segment("v1_segment_000").unwrap();
        assert_eq!((segment.t_start, segment.t_end), (0.1, 2.2));
    }

    #[tokio::test]
    async fn test_caption_rewrite_replaces_placeholder() {
        let (storage, video) = storage_with_video();
        storage
            .record_frames(&video, &[Frame::new(0, "00ff00ff00ff00ff", "a.jpg", 2.0)])
            .await
            .unwrap();

        let good = FrameAnalysis {
            caption: "A cockpit".to_string(),
            ..Default::default()
        };
        let id = storage
            .record_frame_caption("v1_frame_000", &good)
            .await
            .unwrap()
            .unwrap();
        storage.attach_caption_embedding(&id, &[1.0]).await.unwrap();

        // Same analysis again keeps the vector.
        storage.record_frame_caption("v1_frame_000", &good).await.unwrap();
        assert_eq!(storage.caption(&id).unwrap().embedding, Some(vec![1.0]));

        // A placeholder replaces the caption and drops the stale vector.
        storage
            .record_frame_caption("v1_frame_000", &FrameAnalysis::placeholder("timeout"))
            .await
            .unwrap();
        let caption = storage.caption(&id).unwrap();
        assert!(caption.analysis.caption.starts_with("Analysis failed"));
        assert!(caption.embedding.is_none());
    }

    #[tokio::test]
    async fn test_unchanged_segment_keeps_embedding() {
        let (storage, video) = storage_with_video();
        let segments = vec![TranscriptSegment::new(0.0, 1.0, "hi")];
        storage.record_transcript(&video, &segments).await.unwrap();
        storage
            .attach_transcript_embedding("v1_segment_000", &[0.5])
            .await
            .unwrap();

        storage.record_transcript(&video, &segments).await.unwrap();
        assert_eq!(storage.segment("v1_segment_000").unwrap().embedding, Some(vec![0.5]));

        storage
            .record_transcript(&video, &[TranscriptSegment::new(0.0, 1.0, "hello")])
            .await
            .unwrap();
        assert!(storage.segment("v1_segment_000").unwrap().embedding.is_none());
    }

    #[test]
    fn test_ordinal_keys_are_scoped_to_video() {
        assert!(is_ordinal_key("v1_frame_003", "v1_frame_"));
        assert!(!is_ordinal_key("v1_frame_003_caption", "v1_frame_"));
        assert!(!is_ordinal_key("v10_frame_003", "v1_frame_"));
        assert!(!is_ordinal_key("v1_frame_", "v1_frame_"));
    }

    #[tokio::test]
    async fn test_caption_for_unknown_frame() {
        let (storage, _) = storage_with_video();
        let id = storage
            .record_frame_caption("v1_frame_009", &FrameAnalysis::default())
            .await
            .unwrap();
        assert!(id.is_none());
    }

    #[tokio::test]
    async fn test_embeddings_attach_to_records() {
        let (storage, video) = storage_with_video();
        storage
            .record_transcript(&video, &[TranscriptSegment::new(0.0, 1.0, "hi")])
            .await
            .unwrap();
        storage
            .attach_transcript_embedding("v1_segment_000", &[0.1, 0.2])
            .await
            .unwrap();

        let segment = storage.segment("v1_segment_000").unwrap();
        assert_eq!(segment.embedding, Some(vec![0.1, 0.2]));
    }

    #[tokio::test]
    async fn test_fail_writes() {
        let (storage, video) = storage_with_video();
        storage.set_fail_writes(true);
        let err = storage.record_scenes(&video, &scenes()).await.unwrap_err();
        assert!(err.is_transient());
    }
}
