//! Pipeline orchestration.
//!
//! Runs the fixed stage sequence for one job, persists each stage's output
//! before moving on, reports the outcome to the job source and keeps
//! lifetime statistics.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{error, Instrument};

use vproc_media::DataLayout;
use vproc_models::{frame_id, segment_id, FrameAnalysis, Job, ProcessingResult, Stage, TranscriptSegment};
use vproc_queue::JobSource;
use vproc_storage::StorageBackend;

use crate::embedding::{embed_caption, embed_transcript};
use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::stages::{analyze_frames, Stages};

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Attempts before a failure is reported as permanent
    pub max_attempts: u32,
    /// Concurrent vision requests per job
    pub vision_concurrency: usize,
    /// Root for relative source paths
    pub data_dir: PathBuf,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            vision_concurrency: 5,
            data_dir: PathBuf::from(vproc_media::DEFAULT_DATA_DIR),
        }
    }
}

#[derive(Debug)]
struct ProcessingStats {
    jobs_processed: u64,
    jobs_failed: u64,
    total_processing_time: f64,
    started_at: Instant,
}

impl ProcessingStats {
    fn new() -> Self {
        Self {
            jobs_processed: 0,
            jobs_failed: 0,
            total_processing_time: 0.0,
            started_at: Instant::now(),
        }
    }
}

/// Point-in-time view of the orchestrator statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    /// Seconds spent on successful jobs
    pub total_processing_time: f64,
    pub average_processing_time: f64,
    pub uptime_seconds: f64,
    /// `processed / (processed + failed)`, 0 before any job
    pub success_rate: f64,
}

#[derive(Debug, Default)]
struct PipelineProgress {
    completed: Vec<Stage>,
    current: Option<Stage>,
}

impl PipelineProgress {
    fn begin(&mut self, stage: Stage) {
        self.current = Some(stage);
    }

    fn finish(&mut self, stage: Stage) {
        self.completed.push(stage);
    }
}

#[derive(Debug, Default)]
struct PipelineCounts {
    scenes: usize,
    frames: usize,
    segments: usize,
    captions: usize,
    degraded: usize,
}

/// Runs jobs through the pipeline.
pub struct Orchestrator {
    source: Arc<dyn JobSource>,
    storage: Arc<dyn StorageBackend>,
    stages: Stages,
    layout: DataLayout,
    config: OrchestratorConfig,
    stats: Mutex<ProcessingStats>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn JobSource>,
        storage: Arc<dyn StorageBackend>,
        stages: Stages,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            source,
            storage,
            stages,
            layout: DataLayout::new(config.data_dir.clone()),
            config,
            stats: Mutex::new(ProcessingStats::new()),
        }
    }

    pub fn source(&self) -> &Arc<dyn JobSource> {
        &self.source
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Run one job to completion or first failure.
    ///
    /// Never returns an error: failures are reported to the job source and
    /// described in the returned result.
    pub async fn execute(&self, job: &Job) -> ProcessingResult {
        let logger = JobLogger::new(job, "pipeline");
        let span = logger.create_span();
        self.execute_logged(job, &logger).instrument(span).await
    }

    async fn execute_logged(&self, job: &Job, logger: &JobLogger) -> ProcessingResult {
        let started = Instant::now();
        logger.log_start(&format!("attempt {} of {}", job.attempts, self.config.max_attempts));

        let mut progress = PipelineProgress::default();
        let outcome = self.run_pipeline(job, logger, &mut progress).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(counts) => {
                if let Err(e) = self.source.complete(&job.id, &job.video_id).await {
                    logger.log_error(&format!("Failed to mark job complete: {}", e));
                }

                {
                    let mut stats = self.stats.lock();
                    stats.jobs_processed += 1;
                    stats.total_processing_time += elapsed;
                }
                metrics::record_job_processed(elapsed);

                logger.log_completion(&format!(
                    "{} scenes, {} frames, {} segments, {} captions in {:.2}s",
                    counts.scenes, counts.frames, counts.segments, counts.captions, elapsed
                ));

                ProcessingResult::succeeded(progress.completed)
                    .with_metric("processing_time_sec", elapsed)
                    .with_metric("scenes_count", counts.scenes)
                    .with_metric("frames_count", counts.frames)
                    .with_metric("transcript_segments", counts.segments)
                    .with_metric("frame_captions", counts.captions)
                    .with_metric("frames_degraded", counts.degraded)
            }
            Err(e) => {
                let failed_at = progress.current.map(|s| s.as_str()).unwrap_or("start");
                logger.log_error(&format!("Failed at {} ({}): {}", failed_at, e.kind(), e));

                self.handle_failure(job, &e, logger).await;

                self.stats.lock().jobs_failed += 1;
                metrics::record_job_failed(progress.current, elapsed);

                ProcessingResult::failed(progress.completed, e.to_string())
                    .with_metric("processing_time_sec", elapsed)
                    .with_metric("failed_at_stage", failed_at)
            }
        }
    }

    /// Report a failed attempt to the job source.
    ///
    /// Errors from the job source are logged, never propagated.
    async fn handle_failure(&self, job: &Job, err: &WorkerError, logger: &JobLogger) {
        let message = failure_message(job.attempts, self.config.max_attempts, err);

        if job.attempts < self.config.max_attempts {
            logger.log_warning(&message);
        } else {
            logger.log_error(&message);
        }

        if let Err(e) = self.source.fail(&job.id, &message).await {
            error!(job_id = %job.id, "Failed to record job failure: {}", e);
        }
    }

    async fn resolve_source(&self, job: &Job) -> WorkerResult<(PathBuf, f64)> {
        let stored = self
            .storage
            .get_source_path(&job.video_id)
            .await?
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                WorkerError::not_found(format!("no source path recorded for video {}", job.video_id))
            })?;

        let path = self.layout.resolve_video_path(&stored);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(WorkerError::not_found(format!(
                "source path {} does not exist",
                path.display()
            )));
        }

        let duration = self.stages.probe.duration(&path).await?;
        Ok((path, duration))
    }

    async fn run_pipeline(
        &self,
        job: &Job,
        logger: &JobLogger,
        progress: &mut PipelineProgress,
    ) -> WorkerResult<PipelineCounts> {
        let video_id = &job.video_id;
        let mut counts = PipelineCounts::default();

        let (source, source_duration) = self.resolve_source(job).await?;

        // Normalize
        let (video_path, audio_path, duration) = match &self.stages.normalizer {
            Some(normalizer) => {
                progress.begin(Stage::Normalize);
                let normalized = normalizer.normalize(&source, video_id).await?;
                self.storage
                    .record_normalized(
                        video_id,
                        &normalized.video_path.to_string_lossy(),
                        normalized.duration,
                    )
                    .await?;
                progress.finish(Stage::Normalize);
                logger.log_stage(
                    Stage::Normalize,
                    &format!("{} ({:.1}s)", normalized.video_path.display(), normalized.duration),
                );
                (normalized.video_path, normalized.audio_path, normalized.duration)
            }
            None => (source.clone(), Some(source.clone()), source_duration),
        };

        // Transcribe
        let mut segments: Vec<TranscriptSegment> = Vec::new();
        if let Some(transcriber) = &self.stages.transcriber {
            progress.begin(Stage::Transcribe);
            match audio_path.as_deref() {
                Some(audio) => {
                    segments = transcriber.transcribe(audio, video_id, Some(duration)).await?;
                    self.storage.record_transcript(video_id, &segments).await?;
                }
                None => logger.log_warning("No audio track; skipping transcription"),
            }
            counts.segments = segments.len();
            progress.finish(Stage::Transcribe);
            logger.log_stage(Stage::Transcribe, &format!("{} segments", segments.len()));
        }

        // Scenes
        progress.begin(Stage::Scenes);
        let scenes = self.stages.scene_detector.detect(&video_path, video_id).await?;
        self.storage.record_scenes(video_id, &scenes).await?;
        counts.scenes = scenes.len();
        progress.finish(Stage::Scenes);
        logger.log_stage(Stage::Scenes, &format!("{} scenes", scenes.len()));

        // Frames
        progress.begin(Stage::Frames);
        let frames = self
            .stages
            .frame_extractor
            .extract(&video_path, &scenes, video_id)
            .await?;
        self.storage.record_frames(video_id, &frames).await?;
        counts.frames = frames.len();
        progress.finish(Stage::Frames);
        logger.log_stage(Stage::Frames, &format!("{} frames", frames.len()));

        // Vision
        let mut captions: Vec<(String, FrameAnalysis)> = Vec::new();
        if let Some(vision) = &self.stages.vision {
            progress.begin(Stage::Vision);
            let outcomes =
                analyze_frames(vision.as_ref(), &frames, self.config.vision_concurrency).await;

            for (i, outcome) in outcomes.iter().enumerate() {
                if outcome.is_degraded() {
                    counts.degraded += 1;
                }
                let fid = frame_id(video_id, i);
                match self.storage.record_frame_caption(&fid, outcome.analysis()).await? {
                    Some(caption_id) => {
                        counts.captions += 1;
                        if !outcome.is_degraded() {
                            captions.push((caption_id, outcome.analysis().clone()));
                        }
                    }
                    None => logger.log_warning(&format!("Frame {} not stored; caption dropped", fid)),
                }
            }

            metrics::record_frames_degraded(counts.degraded);
            if counts.degraded > 0 {
                logger.log_warning(&format!(
                    "{} of {} frames degraded to placeholder captions",
                    counts.degraded,
                    frames.len()
                ));
            }
            progress.finish(Stage::Vision);
            logger.log_stage(Stage::Vision, &format!("{} captions", counts.captions));
        }

        // Embeddings
        if let Some(embedder) = &self.stages.embedder {
            progress.begin(Stage::Embeddings);

            let transcript_embeddings =
                embed_transcript(embedder.as_ref(), &segments, &scenes).await?;
            let mut attached = 0;
            for (i, embedding) in transcript_embeddings.iter().enumerate() {
                if let Some(embedding) = embedding {
                    self.storage
                        .attach_transcript_embedding(&segment_id(video_id, i), embedding)
                        .await?;
                    attached += 1;
                }
            }

            for (caption_id, analysis) in &captions {
                if let Some(embedding) = embed_caption(embedder.as_ref(), analysis).await? {
                    self.storage.attach_caption_embedding(caption_id, &embedding).await?;
                    attached += 1;
                }
            }

            progress.finish(Stage::Embeddings);
            logger.log_stage(Stage::Embeddings, &format!("{} vectors", attached));
        }

        Ok(counts)
    }

    /// Current statistics.
    pub fn get_stats(&self) -> StatsSnapshot {
        let stats = self.stats.lock();
        let finished = stats.jobs_processed + stats.jobs_failed;

        StatsSnapshot {
            jobs_processed: stats.jobs_processed,
            jobs_failed: stats.jobs_failed,
            total_processing_time: stats.total_processing_time,
            average_processing_time: if stats.jobs_processed > 0 {
                stats.total_processing_time / stats.jobs_processed as f64
            } else {
                0.0
            },
            uptime_seconds: stats.started_at.elapsed().as_secs_f64(),
            success_rate: if finished > 0 {
                stats.jobs_processed as f64 / finished as f64
            } else {
                0.0
            },
        }
    }

    /// Zero the counters and restart the uptime clock.
    pub fn reset_stats(&self) {
        *self.stats.lock() = ProcessingStats::new();
    }
}

/// Message recorded on the job for a failed attempt.
pub fn failure_message(attempts: u32, max_attempts: u32, err: &WorkerError) -> String {
    if attempts < max_attempts {
        format!("Attempt {} failed: {}", attempts, err)
    } else {
        format!("Permanent failure after {} attempts: {}", attempts, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;
    use vproc_media::NormalizedVideo;
    use vproc_models::{Frame, JobStatus, Scene, VideoId, VideoMetadata};
    use vproc_queue::InMemoryJobSource;
    use vproc_storage::InMemoryStorage;

    use crate::stages::{
        Embedder, FrameExtractor, Normalizer, SceneDetector, SourceProbe, Transcriber,
        VisionAnalyzer,
    };

    struct FixedProbe;

    #[async_trait]
    impl SourceProbe for FixedProbe {
        async fn duration(&self, _source: &Path) -> WorkerResult<f64> {
            Ok(20.0)
        }
    }

    struct PassThroughNormalizer;

    #[async_trait]
    impl Normalizer for PassThroughNormalizer {
        async fn normalize(&self, source: &Path, _video_id: &VideoId) -> WorkerResult<NormalizedVideo> {
            Ok(NormalizedVideo {
                video_path: source.to_path_buf(),
                audio_path: Some(source.to_path_buf()),
                duration: 20.0,
            })
        }
    }

    struct ScriptedTranscriber;

    #[async_trait]
    impl Transcriber for ScriptedTranscriber {
        async fn transcribe(
            &self,
            _audio: &Path,
            _video_id: &VideoId,
            _duration_hint: Option<f64>,
        ) -> WorkerResult<Vec<TranscriptSegment>> {
            Ok(vec![
                TranscriptSegment::new(0.0, 8.0, "Turn the dial."),
                TranscriptSegment::new(12.0, 18.0, "Check the gauge."),
            ])
        }
    }

    struct TwoScenes {
        fail: bool,
    }

    #[async_trait]
    impl SceneDetector for TwoScenes {
        async fn detect(&self, _video: &Path, _video_id: &VideoId) -> WorkerResult<Vec<Scene>> {
            if self.fail {
                return Err(WorkerError::invalid_input("decode error"));
            }
            Ok(vec![Scene::new(0, 0.0, 10.0), Scene::new(1, 10.0, 20.0)])
        }
    }

    struct MidpointFrames;

    #[async_trait]
    impl FrameExtractor for MidpointFrames {
        async fn extract(
            &self,
            _video: &Path,
            scenes: &[Scene],
            _video_id: &VideoId,
        ) -> WorkerResult<Vec<Frame>> {
            Ok(scenes
                .iter()
                .map(|s| {
                    Frame::new(
                        s.idx,
                        format!("{:016x}", u64::MAX >> (s.idx * 32)),
                        format!("scene_{:03}.jpg", s.idx),
                        s.midpoint(),
                    )
                })
                .collect())
        }
    }

    /// Fails on the second scene's frame.
    struct FlakyVision;

    #[async_trait]
    impl VisionAnalyzer for FlakyVision {
        async fn analyze(&self, frame: &Frame) -> WorkerResult<FrameAnalysis> {
            if frame.scene_idx == 1 {
                return Err(WorkerError::invalid_input("model refused"));
            }
            Ok(FrameAnalysis {
                caption: "A control panel".to_string(),
                ..Default::default()
            })
        }
    }

    struct UnitEmbedder;

    #[async_trait]
    impl Embedder for UnitEmbedder {
        async fn embed(&self, _text: &str) -> WorkerResult<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
    }

    fn all_stages() -> Stages {
        Stages {
            probe: Arc::new(FixedProbe),
            normalizer: Some(Arc::new(PassThroughNormalizer)),
            transcriber: Some(Arc::new(ScriptedTranscriber)),
            scene_detector: Arc::new(TwoScenes { fail: false }),
            frame_extractor: Arc::new(MidpointFrames),
            vision: Some(Arc::new(FlakyVision)),
            embedder: Some(Arc::new(UnitEmbedder)),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        source: Arc<InMemoryJobSource>,
        storage: Arc<InMemoryStorage>,
        orchestrator: Orchestrator,
    }

    fn fixture(stages: Stages) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("v1.mp4"), b"not really a video").unwrap();

        let source = Arc::new(InMemoryJobSource::new());
        let storage = Arc::new(InMemoryStorage::new());
        storage.insert_video(VideoMetadata::new("v1", "v1.mp4"));

        let orchestrator = Orchestrator::new(
            source.clone(),
            storage.clone(),
            stages,
            OrchestratorConfig {
                max_attempts: 3,
                vision_concurrency: 2,
                data_dir: dir.path().to_path_buf(),
            },
        );

        Fixture {
            _dir: dir,
            source,
            storage,
            orchestrator,
        }
    }

    async fn claim(fx: &Fixture, job: Job) -> Job {
        fx.source.submit(job);
        fx.source.claim().await.unwrap().unwrap()
    }

    fn is_prefix_of_order(stages: &[Stage]) -> bool {
        let mut order = Stage::ORDER.iter();
        stages.iter().all(|s| order.any(|o| o == s))
    }

    #[tokio::test]
    async fn test_full_pipeline_success() {
        let fx = fixture(all_stages());
        let job = claim(&fx, Job::new("j1", "v1")).await;

        let result = fx.orchestrator.execute(&job).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.stages_completed, Stage::ORDER.to_vec());
        assert_eq!(result.metrics["scenes_count"], 2);
        assert_eq!(result.metrics["frames_count"], 2);
        assert_eq!(result.metrics["transcript_segments"], 2);
        assert_eq!(result.metrics["frame_captions"], 2);
        assert_eq!(result.metrics["frames_degraded"], 1);

        let info = fx.source.get_job_info(&job.id).await.unwrap().unwrap();
        assert_eq!(info.status, JobStatus::Done);

        let video = fx.storage.video(&VideoId::from("v1")).unwrap();
        assert_eq!(video.duration_sec, Some(20.0));
        assert!(fx.storage.segment("v1_segment_000").unwrap().embedding.is_some());

        let degraded = fx.storage.caption("v1_frame_001_caption").unwrap();
        assert!(degraded.analysis.caption.starts_with("Analysis failed"));
        assert!(degraded.embedding.is_none());
        assert!(fx.storage.caption("v1_frame_000_caption").unwrap().embedding.is_some());
    }

    #[tokio::test]
    async fn test_missing_source_path_is_not_found() {
        let fx = fixture(all_stages());
        let job = claim(&fx, Job::new("j1", "V1")).await;

        let result = fx.orchestrator.execute(&job).await;

        assert!(!result.success);
        assert!(result.stages_completed.is_empty());
        assert!(result.error.as_deref().unwrap().contains("NotFound"));
        assert_eq!(result.failed_at_stage(), Some("start"));

        let info = fx.source.get_job_info(&job.id).await.unwrap().unwrap();
        assert_eq!(info.status, JobStatus::Failed);
        assert!(info.error.unwrap().starts_with("Attempt 1 failed"));
    }

    #[tokio::test]
    async fn test_missing_source_file_is_not_found() {
        let fx = fixture(all_stages());
        fx.storage.insert_video(VideoMetadata::new("v2", "/definitely/missing.mp4"));
        let job = claim(&fx, Job::new("j2", "v2")).await;

        let result = fx.orchestrator.execute(&job).await;

        assert!(result.error.unwrap().contains("NotFound"));
        assert!(result.stages_completed.is_empty());
    }

    #[tokio::test]
    async fn test_stage_failure_stops_pipeline() {
        let stages = Stages {
            scene_detector: Arc::new(TwoScenes { fail: true }),
            ..all_stages()
        };
        let fx = fixture(stages);
        let job = claim(&fx, Job::new("j1", "v1")).await;

        let result = fx.orchestrator.execute(&job).await;

        assert!(!result.success);
        assert_eq!(result.stages_completed, vec![Stage::Normalize, Stage::Transcribe]);
        assert!(is_prefix_of_order(&result.stages_completed));
        assert_eq!(result.failed_at_stage(), Some("scenes"));
        assert_eq!(fx.storage.frame_count(), 0);
        assert_eq!(fx.storage.segment_count(), 2);
    }

    #[tokio::test]
    async fn test_last_attempt_is_permanent() {
        let stages = Stages {
            scene_detector: Arc::new(TwoScenes { fail: true }),
            ..all_stages()
        };
        let fx = fixture(stages);
        let job = claim(&fx, Job::new("j1", "v1").with_attempts(2)).await;
        assert_eq!(job.attempts, 3);

        fx.orchestrator.execute(&job).await;

        let message = fx.source.get_job_info(&job.id).await.unwrap().unwrap().error.unwrap();
        assert!(message.to_lowercase().contains("permanent"));
        assert!(message.starts_with("Permanent failure after 3 attempts"));
    }

    #[tokio::test]
    async fn test_disabled_stages_are_skipped() {
        let stages = Stages {
            normalizer: None,
            transcriber: None,
            vision: None,
            embedder: None,
            ..all_stages()
        };
        let fx = fixture(stages);
        let job = claim(&fx, Job::new("j1", "v1")).await;

        let result = fx.orchestrator.execute(&job).await;

        assert!(result.success);
        assert_eq!(result.stages_completed, vec![Stage::Scenes, Stage::Frames]);
        assert!(is_prefix_of_order(&result.stages_completed));
        assert_eq!(fx.storage.caption_count(), 0);
    }

    #[tokio::test]
    async fn test_rerun_does_not_duplicate_artifacts() {
        let fx = fixture(all_stages());
        let job = claim(&fx, Job::new("j1", "v1")).await;

        fx.orchestrator.execute(&job).await;
        let counts = (
            fx.storage.scene_count(),
            fx.storage.frame_count(),
            fx.storage.segment_count(),
            fx.storage.caption_count(),
        );
        fx.orchestrator.execute(&job).await;

        assert_eq!(
            counts,
            (
                fx.storage.scene_count(),
                fx.storage.frame_count(),
                fx.storage.segment_count(),
                fx.storage.caption_count(),
            )
        );
    }

    struct SteadyVision;

    #[async_trait]
    impl VisionAnalyzer for SteadyVision {
        async fn analyze(&self, frame: &Frame) -> WorkerResult<FrameAnalysis> {
            Ok(FrameAnalysis {
                caption: format!("Gauge close-up {}", frame.scene_idx),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_retry_replaces_degraded_caption() {
        let fx = fixture(all_stages());
        let first = claim(&fx, Job::new("j1", "v1")).await;
        assert!(fx.orchestrator.execute(&first).await.success);
        assert!(fx
            .storage
            .caption("v1_frame_001_caption")
            .unwrap()
            .analysis
            .caption
            .starts_with("Analysis failed"));

        let retry = Orchestrator::new(
            fx.source.clone(),
            fx.storage.clone(),
            Stages {
                vision: Some(Arc::new(SteadyVision)),
                ..all_stages()
            },
            OrchestratorConfig {
                max_attempts: 3,
                vision_concurrency: 2,
                data_dir: fx._dir.path().to_path_buf(),
            },
        );
        let second = claim(&fx, Job::new("j2", "v1")).await;
        let result = retry.execute(&second).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.metrics["frames_degraded"], 0);
        assert_eq!(fx.storage.caption_count(), 2);
        for id in ["v1_frame_000_caption", "v1_frame_001_caption"] {
            let caption = fx.storage.caption(id).unwrap();
            assert!(caption.analysis.caption.starts_with("Gauge close-up"));
            assert!(caption.embedding.is_some());
        }
    }

    #[tokio::test]
    async fn test_storage_outage_fails_job() {
        let fx = fixture(all_stages());
        fx.storage.set_fail_writes(true);
        let job = claim(&fx, Job::new("j1", "v1")).await;

        let result = fx.orchestrator.execute(&job).await;

        assert!(!result.success);
        assert_eq!(result.failed_at_stage(), Some("normalize"));
    }

    #[tokio::test]
    async fn test_stats_and_reset() {
        let fx = fixture(all_stages());
        let stats = fx.orchestrator.get_stats();
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.average_processing_time, 0.0);

        let ok = claim(&fx, Job::new("ok", "v1")).await;
        fx.orchestrator.execute(&ok).await;
        let bad = claim(&fx, Job::new("bad", "missing")).await;
        fx.orchestrator.execute(&bad).await;

        let stats = fx.orchestrator.get_stats();
        assert_eq!(stats.jobs_processed, 1);
        assert_eq!(stats.jobs_failed, 1);
        assert_eq!(stats.success_rate, 0.5);

        fx.orchestrator.reset_stats();
        let stats = fx.orchestrator.get_stats();
        assert_eq!(stats.jobs_processed, 0);
        assert_eq!(stats.jobs_failed, 0);
        assert_eq!(stats.total_processing_time, 0.0);
    }

    #[test]
    fn test_failure_message_format() {
        let err = WorkerError::stage_failed("boom");
        assert_eq!(failure_message(1, 3, &err), "Attempt 1 failed: Stage failed: boom");
        assert_eq!(
            failure_message(3, 3, &err),
            "Permanent failure after 3 attempts: Stage failed: boom"
        );
    }
}
