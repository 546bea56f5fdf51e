//! Video normalization and audio extraction.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use vproc_models::VideoId;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::paths::DataLayout;
use crate::probe::probe_video;

/// Target height of normalized video.
pub const NORMALIZED_HEIGHT: u32 = 720;
/// Target frame rate of normalized video.
pub const NORMALIZED_FPS: u32 = 30;
/// Sample rate of extracted audio (speech models expect 16 kHz mono).
pub const AUDIO_SAMPLE_RATE: u32 = 16_000;

/// Output of normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVideo {
    pub video_path: PathBuf,
    /// `None` when the source has no audio stream
    pub audio_path: Option<PathBuf>,
    pub duration: f64,
}

/// Build the normalization command (720p, 30 fps, H.264 CRF 22).
pub fn normalize_command(input: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .video_filter(format!("scale=-2:{},fps={}", NORMALIZED_HEIGHT, NORMALIZED_FPS))
        .video_codec("libx264")
        .crf(22)
        .preset("medium")
        .no_audio()
}

/// Build the audio extraction command (PCM s16le, mono, 16 kHz).
pub fn audio_command(input: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .no_video()
        .audio_codec("pcm_s16le")
        .audio_format(1, AUDIO_SAMPLE_RATE)
}

/// Normalize a source video into `{data}/processed/{video_id}/`.
pub async fn normalize_video(
    runner: &FfmpegRunner,
    layout: &DataLayout,
    input: &Path,
    video_id: &VideoId,
) -> MediaResult<NormalizedVideo> {
    let source = probe_video(input).await?;

    let output_dir = layout.processed_dir(video_id);
    tokio::fs::create_dir_all(&output_dir).await?;

    let video_path = output_dir.join("normalized.mp4");
    let audio_path = output_dir.join("audio.wav");

    info!(
        video_id = %video_id,
        "Normalizing video: {} -> {}",
        input.display(),
        video_path.display()
    );
    runner.run(&normalize_command(input, &video_path)).await?;

    let audio_path = if source.has_audio {
        info!(video_id = %video_id, "Extracting audio: {}", audio_path.display());
        runner.run(&audio_command(input, &audio_path)).await?;
        if !audio_path.exists() {
            return Err(MediaError::ffmpeg_failed(
                "Audio extraction produced no output",
                None,
                None,
            ));
        }
        Some(audio_path)
    } else {
        warn!(video_id = %video_id, "Source has no audio stream, skipping audio extraction");
        None
    };

    if !video_path.exists() {
        return Err(MediaError::ffmpeg_failed(
            "Normalization produced no output",
            None,
            None,
        ));
    }

    let normalized = probe_video(&video_path).await?;
    let duration = if normalized.duration > 0.0 {
        normalized.duration
    } else {
        source.duration
    };

    info!(video_id = %video_id, "Video normalized, duration {:.2}s", duration);

    Ok(NormalizedVideo {
        video_path,
        audio_path,
        duration,
    })
}
