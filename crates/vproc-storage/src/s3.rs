//! S3 storage backend.
//!
//! Artifacts are JSON documents under a key prefix. Every write is a whole
//! object PUT to a deterministic key, so repeating a write overwrites the
//! same object.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use vproc_models::{
    caption_id, frame_id, scene_id, segment_id, Frame, FrameAnalysis, Scene, TranscriptSegment,
    VideoId, VideoStatus,
};

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Default key prefix.
pub const DEFAULT_S3_PREFIX: &str = "video-processing/";

/// Configuration for the S3 backend.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub prefix: String,
    pub region: String,
    /// S3-compatible endpoint; enables path-style addressing when set
    pub endpoint_url: Option<String>,
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: DEFAULT_S3_PREFIX.to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: None,
        }
    }
}

/// Key layout under the configured prefix.
#[derive(Debug, Clone)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: &str) -> Self {
        let trimmed = prefix.trim_matches('/');
        let prefix = if trimmed.is_empty() {
            String::new()
        } else {
            format!("{}/", trimmed)
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn video_info(&self, video_id: &VideoId) -> String {
        format!("{}metadata/{}/video_info.json", self.prefix, video_id)
    }

    pub fn scenes(&self, video_id: &VideoId) -> String {
        format!("{}metadata/{}/scenes.json", self.prefix, video_id)
    }

    pub fn frames(&self, video_id: &VideoId) -> String {
        format!("{}metadata/{}/frames.json", self.prefix, video_id)
    }

    pub fn transcript(&self, video_id: &VideoId) -> String {
        format!("{}metadata/{}/transcript.json", self.prefix, video_id)
    }

    pub fn caption(&self, caption_id: &str) -> String {
        format!("{}captions/{}.json", self.prefix, caption_id)
    }

    pub fn transcript_embedding(&self, segment_id: &str) -> String {
        format!("{}embeddings/transcript/{}.json", self.prefix, segment_id)
    }

    pub fn caption_embedding(&self, caption_id: &str) -> String {
        format!("{}embeddings/frames/{}.json", self.prefix, caption_id)
    }

    /// Key family used for statistics: `metadata`, `captions`,
    /// `embeddings/transcript` or `embeddings/frames`.
    pub fn family<'a>(&self, key: &'a str) -> &'a str {
        let rest = key.strip_prefix(self.prefix.as_str()).unwrap_or(key);
        let mut parts = rest.splitn(3, '/');
        match (parts.next(), parts.next()) {
            (Some("embeddings"), Some(kind)) => {
                let end = "embeddings/".len() + kind.len();
                &rest[..end]
            }
            (Some(first), Some(_)) => first,
            _ => "other",
        }
    }
}

#[derive(Debug, Serialize)]
struct SceneRecord<'a> {
    id: String,
    #[serde(flatten)]
    scene: &'a Scene,
}

#[derive(Debug, Serialize)]
struct FrameRecord<'a> {
    id: String,
    #[serde(flatten)]
    frame: &'a Frame,
}

#[derive(Debug, Serialize)]
struct SegmentRecord<'a> {
    id: String,
    t_start: f64,
    t_end: f64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct CaptionRecord<'a> {
    id: &'a str,
    frame_id: &'a str,
    #[serde(flatten)]
    analysis: &'a FrameAnalysis,
}

#[derive(Debug, Serialize)]
struct EmbeddingRecord<'a> {
    id: &'a str,
    embedding: &'a [f32],
    dimensions: usize,
}

/// Stores artifacts as JSON objects in an S3 bucket.
#[derive(Clone)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    keys: KeyLayout,
}

impl S3Storage {
    /// Create a client using the default AWS credential chain.
    pub async fn new(config: S3Config) -> StorageResult<Self> {
        if config.bucket.is_empty() {
            return Err(StorageError::config_error("AWS_S3_BUCKET not set"));
        }

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            keys: KeyLayout::new(&config.prefix),
        })
    }

    pub fn keys(&self) -> &KeyLayout {
        &self.keys
    }

    async fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let body = serde_json::to_vec_pretty(value)?;
        debug!("Uploading {} bytes to {}", body.len(), key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let message = e.to_string();
                let no_such_key = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if no_such_key || message.contains("NoSuchKey") {
                    return Ok(None);
                }
                return Err(StorageError::download_failed(message));
            }
        };

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
            .into_bytes();

        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// `(key, size)` of every object under the prefix.
    async fn list_objects(&self) -> StorageResult<Vec<(String, u64)>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(self.keys.prefix());

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            for obj in response.contents() {
                objects.push((
                    obj.key().unwrap_or_default().to_string(),
                    obj.size().unwrap_or(0).max(0) as u64,
                ));
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(objects)
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    fn name(&self) -> &'static str {
        "s3"
    }

    async fn get_source_path(&self, video_id: &VideoId) -> StorageResult<Option<String>> {
        let info: Option<serde_json::Value> = self.get_json(&self.keys.video_info(video_id)).await?;
        Ok(info.and_then(|v| {
            v.get("original_path")
                .and_then(|p| p.as_str())
                .map(str::to_string)
        }))
    }

    async fn record_normalized(
        &self,
        video_id: &VideoId,
        normalized_path: &str,
        duration_sec: f64,
    ) -> StorageResult<()> {
        let key = self.keys.video_info(video_id);

        // Merge into the existing document so fields written by the uploader survive.
        let mut info = match self.get_json::<serde_json::Value>(&key).await? {
            Some(serde_json::Value::Object(map)) => map,
            _ => {
                let mut map = serde_json::Map::new();
                map.insert("id".to_string(), json!(video_id));
                map
            }
        };
        info.insert("normalized_path".to_string(), json!(normalized_path));
        info.insert("duration_sec".to_string(), json!(duration_sec));
        info.insert("status".to_string(), json!(VideoStatus::Normalized));

        self.put_json(&key, &info).await?;
        debug!(video_id = %video_id, "Recorded normalized path");
        Ok(())
    }

    async fn record_scenes(&self, video_id: &VideoId, scenes: &[Scene]) -> StorageResult<()> {
        let records: Vec<SceneRecord<'_>> = scenes
            .iter()
            .map(|scene| SceneRecord {
                id: scene_id(video_id, scene.idx as usize),
                scene,
            })
            .collect();

        self.put_json(&self.keys.scenes(video_id), &records).await?;
        info!(video_id = %video_id, "Recorded {} scenes", scenes.len());
        Ok(())
    }

    async fn record_frames(&self, video_id: &VideoId, frames: &[Frame]) -> StorageResult<()> {
        let records: Vec<FrameRecord<'_>> = frames
            .iter()
            .enumerate()
            .map(|(i, frame)| FrameRecord {
                id: frame_id(video_id, i),
                frame,
            })
            .collect();

        self.put_json(&self.keys.frames(video_id), &records).await?;
        info!(video_id = %video_id, "Recorded {} frames", frames.len());
        Ok(())
    }

    async fn record_transcript(
        &self,
        video_id: &VideoId,
        segments: &[TranscriptSegment],
    ) -> StorageResult<()> {
        let records: Vec<SegmentRecord<'_>> = segments
            .iter()
            .enumerate()
            .map(|(i, seg)| SegmentRecord {
                id: segment_id(video_id, i),
                t_start: seg.t_start,
                t_end: seg.t_end,
                text: &seg.text,
            })
            .collect();

        self.put_json(&self.keys.transcript(video_id), &records).await?;
        info!(video_id = %video_id, "Recorded {} transcript segments", segments.len());
        Ok(())
    }

    async fn record_frame_caption(
        &self,
        frame_id: &str,
        analysis: &FrameAnalysis,
    ) -> StorageResult<Option<String>> {
        let id = caption_id(frame_id);
        let record = CaptionRecord {
            id: &id,
            frame_id,
            analysis,
        };
        self.put_json(&self.keys.caption(&id), &record).await?;
        Ok(Some(id))
    }

    async fn attach_transcript_embedding(
        &self,
        segment_id: &str,
        embedding: &[f32],
    ) -> StorageResult<()> {
        let record = EmbeddingRecord {
            id: segment_id,
            embedding,
            dimensions: embedding.len(),
        };
        self.put_json(&self.keys.transcript_embedding(segment_id), &record)
            .await
    }

    async fn attach_caption_embedding(
        &self,
        caption_id: &str,
        embedding: &[f32],
    ) -> StorageResult<()> {
        let record = EmbeddingRecord {
            id: caption_id,
            embedding,
            dimensions: embedding.len(),
        };
        self.put_json(&self.keys.caption_embedding(caption_id), &record)
            .await
    }

    async fn get_stats(&self) -> StorageResult<serde_json::Value> {
        let objects = self.list_objects().await?;

        let mut families: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for (key, size) in &objects {
            let entry = families
                .entry(self.keys.family(key).to_string())
                .or_insert((0, 0));
            entry.0 += 1;
            entry.1 += size;
        }

        let by_family: serde_json::Map<String, serde_json::Value> = families
            .into_iter()
            .map(|(family, (count, bytes))| (family, json!({ "objects": count, "bytes": bytes })))
            .collect();

        Ok(json!({
            "backend": self.name(),
            "bucket": self.bucket,
            "prefix": self.keys.prefix(),
            "total_objects": objects.len(),
            "total_bytes": objects.iter().map(|(_, size)| size).sum::<u64>(),
            "by_family": by_family,
        }))
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("S3 connectivity check failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = KeyLayout::new("video-processing/");
        let video = VideoId::from("v1");
        assert_eq!(keys.video_info(&video), "video-processing/metadata/v1/video_info.json");
        assert_eq!(keys.scenes(&video), "video-processing/metadata/v1/scenes.json");
        assert_eq!(keys.frames(&video), "video-processing/metadata/v1/frames.json");
        assert_eq!(keys.transcript(&video), "video-processing/metadata/v1/transcript.json");
        assert_eq!(
            keys.caption("v1_frame_000_caption"),
            "video-processing/captions/v1_frame_000_caption.json"
        );
        assert_eq!(
            keys.transcript_embedding("v1_segment_002"),
            "video-processing/embeddings/transcript/v1_segment_002.json"
        );
        assert_eq!(
            keys.caption_embedding("v1_frame_000_caption"),
            "video-processing/embeddings/frames/v1_frame_000_caption.json"
        );
    }

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(KeyLayout::new("videos").prefix(), "videos/");
        assert_eq!(KeyLayout::new("/videos/").prefix(), "videos/");
        assert_eq!(KeyLayout::new("").prefix(), "");
        assert_eq!(
            KeyLayout::new("").video_info(&VideoId::from("x")),
            "metadata/x/video_info.json"
        );
    }

    #[test]
    fn test_key_family() {
        let keys = KeyLayout::new("p/");
        assert_eq!(keys.family("p/metadata/v1/scenes.json"), "metadata");
        assert_eq!(keys.family("p/captions/a.json"), "captions");
        assert_eq!(keys.family("p/embeddings/transcript/s.json"), "embeddings/transcript");
        assert_eq!(keys.family("p/embeddings/frames/c.json"), "embeddings/frames");
        assert_eq!(keys.family("p/stray.json"), "other");
    }

    #[test]
    fn test_caption_record_shape() {
        let analysis = FrameAnalysis {
            caption: "Dashboard".to_string(),
            ..Default::default()
        };
        let record = CaptionRecord {
            id: "v1_frame_000_caption",
            frame_id: "v1_frame_000",
            analysis: &analysis,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["id"], "v1_frame_000_caption");
        assert_eq!(value["caption"], "Dashboard");
        assert!(value["controls"].as_array().unwrap().is_empty());
    }
}
