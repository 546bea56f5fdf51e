//! Stage collaborators.
//!
//! Each pipeline stage talks to one collaborator behind a trait so the
//! orchestrator can run against FFmpeg and the AI API in production and
//! against fakes in tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use vproc_media::{
    detect_scenes, extract_frames, normalize_video, probe_video, write_srt, DataLayout,
    FfmpegRunner, FrameExtractorConfig, MediaError, NormalizedVideo, SceneDetectorConfig,
};
use vproc_ml_client::{MlClient, MlClientConfig};
use vproc_models::{Frame, FrameAnalysis, Scene, TranscriptSegment, VideoId};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};

#[async_trait]
pub trait SourceProbe: Send + Sync {
    /// Duration of a source file; unreadable media is `InvalidInput`.
    async fn duration(&self, source: &Path) -> WorkerResult<f64>;
}

#[async_trait]
pub trait Normalizer: Send + Sync {
    /// Produce the normalized video, its audio track and duration.
    async fn normalize(&self, source: &Path, video_id: &VideoId) -> WorkerResult<NormalizedVideo>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Ordered transcript segments for an audio (or video) file.
    async fn transcribe(
        &self,
        audio: &Path,
        video_id: &VideoId,
        duration_hint: Option<f64>,
    ) -> WorkerResult<Vec<TranscriptSegment>>;
}

#[async_trait]
pub trait SceneDetector: Send + Sync {
    async fn detect(&self, video: &Path, video_id: &VideoId) -> WorkerResult<Vec<Scene>>;
}

#[async_trait]
pub trait FrameExtractor: Send + Sync {
    /// One representative frame per scene, already deduplicated and capped.
    async fn extract(
        &self,
        video: &Path,
        scenes: &[Scene],
        video_id: &VideoId,
    ) -> WorkerResult<Vec<Frame>>;
}

#[async_trait]
pub trait VisionAnalyzer: Send + Sync {
    async fn analyze(&self, frame: &Frame) -> WorkerResult<FrameAnalysis>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> WorkerResult<Vec<f32>>;
}

/// Result of analyzing one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Analyzed(FrameAnalysis),
    /// The frame could not be analyzed; `analysis` is a placeholder
    Degraded { analysis: FrameAnalysis, error: String },
}

impl FrameOutcome {
    pub fn analysis(&self) -> &FrameAnalysis {
        match self {
            FrameOutcome::Analyzed(analysis) => analysis,
            FrameOutcome::Degraded { analysis, .. } => analysis,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, FrameOutcome::Degraded { .. })
    }
}

/// Analyze every frame with at most `concurrency` requests in flight.
///
/// Outcomes are returned in input order. A failing frame never fails the
/// batch; it becomes [`FrameOutcome::Degraded`].
pub async fn analyze_frames(
    analyzer: &dyn VisionAnalyzer,
    frames: &[Frame],
    concurrency: usize,
) -> Vec<FrameOutcome> {
    let semaphore = Semaphore::new(concurrency.max(1));

    let tasks = frames.iter().map(|frame| {
        let semaphore = &semaphore;
        async move {
            let _permit = match semaphore.acquire().await {
                Ok(permit) => permit,
                Err(e) => {
                    return FrameOutcome::Degraded {
                        analysis: FrameAnalysis::placeholder(&e),
                        error: e.to_string(),
                    }
                }
            };

            match analyzer.analyze(frame).await {
                Ok(analysis) => FrameOutcome::Analyzed(analysis),
                Err(e) => {
                    warn!(
                        scene_idx = frame.scene_idx,
                        "Frame analysis failed for {}: {}", frame.path, e
                    );
                    FrameOutcome::Degraded {
                        analysis: FrameAnalysis::placeholder(&e),
                        error: e.to_string(),
                    }
                }
            }
        }
    });

    join_all(tasks).await
}

/// The collaborators for one orchestrator.
///
/// A stage runs when its collaborator is present. Scene detection and frame
/// extraction are always present.
#[derive(Clone)]
pub struct Stages {
    pub probe: Arc<dyn SourceProbe>,
    pub normalizer: Option<Arc<dyn Normalizer>>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub scene_detector: Arc<dyn SceneDetector>,
    pub frame_extractor: Arc<dyn FrameExtractor>,
    pub vision: Option<Arc<dyn VisionAnalyzer>>,
    pub embedder: Option<Arc<dyn Embedder>>,
}

impl Stages {
    /// Build the FFmpeg and AI-backed collaborators for the enabled stages.
    pub fn from_config(config: &WorkerConfig) -> WorkerResult<Self> {
        let runner = FfmpegRunner::new();
        let layout = DataLayout::new(config.data_dir.clone());
        let toggles = config.stages;

        let client = if toggles.needs_ai() {
            let api_key = config
                .openai_api_key
                .clone()
                .ok_or_else(|| WorkerError::config_error("OPENAI_API_KEY not set"))?;
            Some(MlClient::new(MlClientConfig {
                api_key,
                base_url: config.openai_base_url.clone(),
                ..MlClientConfig::from_env()
            })?)
        } else {
            None
        };

        let normalizer: Option<Arc<dyn Normalizer>> = toggles.normalize.then(|| {
            Arc::new(FfmpegNormalizer::new(runner.clone(), layout.clone())) as Arc<dyn Normalizer>
        });

        let transcriber: Option<Arc<dyn Transcriber>> = match (&client, toggles.transcription) {
            (Some(client), true) => Some(Arc::new(AiTranscriber::new(client.clone(), layout.clone()))),
            _ => None,
        };
        let vision: Option<Arc<dyn VisionAnalyzer>> = match (&client, toggles.vision) {
            (Some(client), true) => Some(Arc::new(AiVisionAnalyzer::new(client.clone()))),
            _ => None,
        };
        let embedder: Option<Arc<dyn Embedder>> = match (&client, toggles.embeddings) {
            (Some(client), true) => Some(Arc::new(AiEmbedder::new(client.clone()))),
            _ => None,
        };

        Ok(Self {
            probe: Arc::new(FfprobeSourceProbe),
            normalizer,
            transcriber,
            scene_detector: Arc::new(FfmpegSceneDetector::new(
                runner.clone(),
                SceneDetectorConfig::default(),
            )),
            frame_extractor: Arc::new(FfmpegFrameExtractor::new(
                runner,
                layout,
                FrameExtractorConfig {
                    max_frames: config.max_frames_per_video,
                    dedup_threshold: config.frame_dedup_threshold,
                },
            )),
            vision,
            embedder,
        })
    }
}

/// Source validation through FFprobe.
pub struct FfprobeSourceProbe;

#[async_trait]
impl SourceProbe for FfprobeSourceProbe {
    async fn duration(&self, source: &Path) -> WorkerResult<f64> {
        match probe_video(source).await {
            Ok(info) => Ok(info.duration),
            Err(e @ (MediaError::FfprobeNotFound | MediaError::FileNotFound(_))) => Err(e.into()),
            Err(e) => Err(WorkerError::invalid_input(format!(
                "unreadable media {}: {}",
                source.display(),
                e
            ))),
        }
    }
}

/// Normalization through FFmpeg.
pub struct FfmpegNormalizer {
    runner: FfmpegRunner,
    layout: DataLayout,
}

impl FfmpegNormalizer {
    pub fn new(runner: FfmpegRunner, layout: DataLayout) -> Self {
        Self { runner, layout }
    }
}

#[async_trait]
impl Normalizer for FfmpegNormalizer {
    async fn normalize(&self, source: &Path, video_id: &VideoId) -> WorkerResult<NormalizedVideo> {
        Ok(normalize_video(&self.runner, &self.layout, source, video_id).await?)
    }
}

/// Speech-to-text through the AI API. Also writes an SRT file.
pub struct AiTranscriber {
    client: MlClient,
    layout: DataLayout,
}

impl AiTranscriber {
    pub fn new(client: MlClient, layout: DataLayout) -> Self {
        Self { client, layout }
    }
}

#[async_trait]
impl Transcriber for AiTranscriber {
    async fn transcribe(
        &self,
        audio: &Path,
        video_id: &VideoId,
        duration_hint: Option<f64>,
    ) -> WorkerResult<Vec<TranscriptSegment>> {
        let segments = self.client.transcribe(audio, duration_hint).await?;

        match write_srt(&self.layout, video_id, &segments).await {
            Ok(path) => debug!(video_id = %video_id, "Wrote subtitles to {}", path.display()),
            Err(e) => warn!(video_id = %video_id, "Failed to write subtitles: {}", e),
        }

        Ok(segments)
    }
}

/// Scene detection through FFmpeg's scene-change score.
pub struct FfmpegSceneDetector {
    runner: FfmpegRunner,
    config: SceneDetectorConfig,
}

impl FfmpegSceneDetector {
    pub fn new(runner: FfmpegRunner, config: SceneDetectorConfig) -> Self {
        Self { runner, config }
    }
}

#[async_trait]
impl SceneDetector for FfmpegSceneDetector {
    async fn detect(&self, video: &Path, video_id: &VideoId) -> WorkerResult<Vec<Scene>> {
        Ok(detect_scenes(&self.runner, &self.config, video, video_id).await?)
    }
}

/// Midpoint frame grabbing with perceptual-hash dedup.
pub struct FfmpegFrameExtractor {
    runner: FfmpegRunner,
    layout: DataLayout,
    config: FrameExtractorConfig,
}

impl FfmpegFrameExtractor {
    pub fn new(runner: FfmpegRunner, layout: DataLayout, config: FrameExtractorConfig) -> Self {
        Self {
            runner,
            layout,
            config,
        }
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract(
        &self,
        video: &Path,
        scenes: &[Scene],
        video_id: &VideoId,
    ) -> WorkerResult<Vec<Frame>> {
        Ok(extract_frames(&self.runner, &self.layout, &self.config, video, scenes, video_id).await?)
    }
}

pub struct AiVisionAnalyzer {
    client: MlClient,
}

impl AiVisionAnalyzer {
    pub fn new(client: MlClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VisionAnalyzer for AiVisionAnalyzer {
    async fn analyze(&self, frame: &Frame) -> WorkerResult<FrameAnalysis> {
        Ok(self.client.analyze_frame(&PathBuf::from(&frame.path)).await?)
    }
}

pub struct AiEmbedder {
    client: MlClient,
}

impl AiEmbedder {
    pub fn new(client: MlClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Embedder for AiEmbedder {
    async fn embed(&self, text: &str) -> WorkerResult<Vec<f32>> {
        Ok(self.client.embed(text).await?)
    }
}
