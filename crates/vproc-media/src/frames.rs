//! Representative frame extraction.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use vproc_models::{Frame, Scene, VideoId};

use crate::command::{check_ffmpeg, FfmpegCommand, FfmpegRunner};
use crate::dedup::dedupe_frames;
use crate::error::{MediaError, MediaResult};
use crate::paths::DataLayout;
use crate::phash::phash_file;

/// Options for frame extraction.
#[derive(Debug, Clone)]
pub struct FrameExtractorConfig {
    /// Maximum frames kept per video after deduplication
    pub max_frames: usize,
    /// Hamming distance at or below which frames are duplicates
    pub dedup_threshold: u32,
}

impl Default for FrameExtractorConfig {
    fn default() -> Self {
        Self {
            max_frames: 50,
            dedup_threshold: crate::dedup::DEFAULT_DEDUP_THRESHOLD,
        }
    }
}

/// File name of the frame sampled from a scene.
pub fn frame_file_name(scene_idx: u32) -> String {
    format!("scene_{:03}.jpg", scene_idx)
}

/// Build the command grabbing one frame at `timestamp`.
pub fn frame_command(video_path: &Path, output: &Path, timestamp: f64) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output)
        .seek(timestamp)
        .single_frame()
        .video_codec("mjpeg")
        .output_args(["-q:v", "2", "-f", "image2"])
}

/// Extract the midpoint frame of every scene, hash and deduplicate.
///
/// A scene whose frame cannot be grabbed is skipped with a warning. Frames
/// that cannot be hashed keep an empty hash and are dropped by dedup.
pub async fn extract_frames(
    runner: &FfmpegRunner,
    layout: &DataLayout,
    config: &FrameExtractorConfig,
    video_path: &Path,
    scenes: &[Scene],
    video_id: &VideoId,
) -> MediaResult<Vec<Frame>> {
    check_ffmpeg()?;

    let frames_dir = layout.frames_dir(video_id);
    tokio::fs::create_dir_all(&frames_dir).await?;

    info!(
        video_id = %video_id,
        "Extracting frames for {} scenes into {}",
        scenes.len(),
        frames_dir.display()
    );

    let mut frames = Vec::with_capacity(scenes.len());
    for scene in scenes {
        let output = frames_dir.join(frame_file_name(scene.idx));
        let timestamp = scene.midpoint();

        match runner.run(&frame_command(video_path, &output, timestamp)).await {
            Ok(()) if output.exists() => {}
            Ok(()) => {
                warn!(video_id = %video_id, scene_idx = scene.idx, "FFmpeg produced no frame, skipping scene");
                continue;
            }
            Err(MediaError::Cancelled) => return Err(MediaError::Cancelled),
            Err(e) => {
                warn!(video_id = %video_id, scene_idx = scene.idx, "Frame extraction failed: {}", e);
                continue;
            }
        }

        let phash = hash_frame(output.clone()).await.unwrap_or_else(|e| {
            warn!(video_id = %video_id, scene_idx = scene.idx, "Frame hashing failed: {}", e);
            String::new()
        });

        frames.push(Frame::new(
            scene.idx,
            phash,
            output.to_string_lossy().to_string(),
            timestamp,
        ));
    }

    let extracted = frames.len();
    let mut kept = dedupe_frames(frames, config.dedup_threshold);
    kept.truncate(config.max_frames);

    debug!(
        video_id = %video_id,
        extracted,
        kept = kept.len(),
        "Frame dedup completed"
    );
    info!(video_id = %video_id, "Extracted {} unique frames", kept.len());

    Ok(kept)
}

/// Hash on a blocking thread; decoding and the DCT are CPU bound.
async fn hash_frame(path: PathBuf) -> MediaResult<String> {
    tokio::task::spawn_blocking(move || phash_file(&path))
        .await
        .map_err(|e| MediaError::Hashing(format!("hash task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_file_name() {
        assert_eq!(frame_file_name(0), "scene_000.jpg");
        assert_eq!(frame_file_name(42), "scene_042.jpg");
    }

    #[test]
    fn test_frame_command_seeks_before_input() {
        let args = frame_command(Path::new("v.mp4"), Path::new("scene_001.jpg"), 7.25).build_args();
        let ss = args.iter().position(|a| a == "-ss").unwrap();
        let input = args.iter().position(|a| a == "-i").unwrap();
        assert!(ss < input);
        assert_eq!(args[ss + 1], "7.250");
        assert!(args.windows(2).any(|w| w[0] == "-vframes" && w[1] == "1"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "image2"));
    }

    #[tokio::test]
    async fn test_hash_frame_missing_file_is_error() {
        let result = hash_frame(PathBuf::from("/nonexistent/frame.jpg")).await;
        assert!(matches!(result, Err(MediaError::Hashing(_))));
    }
}
