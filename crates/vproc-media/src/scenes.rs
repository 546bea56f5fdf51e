//! Scene boundary detection.
//!
//! Uses FFmpeg's scene-change score (`select='gt(scene,T)'`) and reads the
//! timestamps of selected frames from `showinfo` output. Each selected frame
//! is a cut; the cuts split `[0, duration]` into contiguous scenes.

use std::path::Path;
use tracing::{debug, info};

use vproc_models::{validate_scenes, Scene, VideoId};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::probe_video;

/// Configuration for scene detection.
#[derive(Debug, Clone)]
pub struct SceneDetectorConfig {
    /// Scene-change score above which a frame starts a new scene (0.0-1.0)
    pub threshold: f64,
    /// Scenes shorter than this (seconds) are merged into their predecessor
    pub min_scene_len: f64,
}

impl Default for SceneDetectorConfig {
    fn default() -> Self {
        Self {
            threshold: 0.4,
            min_scene_len: 0.1,
        }
    }
}

/// Detect scenes in a (normalized) video.
pub async fn detect_scenes(
    runner: &FfmpegRunner,
    config: &SceneDetectorConfig,
    video_path: &Path,
    video_id: &VideoId,
) -> MediaResult<Vec<Scene>> {
    let info = probe_video(video_path).await?;
    if info.duration <= 0.0 {
        return Err(MediaError::invalid_video(format!(
            "{} has no measurable duration",
            video_path.display()
        )));
    }

    info!(video_id = %video_id, "Detecting scenes: {}", video_path.display());

    let cmd = FfmpegCommand::analyze(video_path)
        .video_filter(format!("select='gt(scene,{})',showinfo", config.threshold))
        .log_level("info");
    let stderr = runner.run_capture(&cmd).await?;

    let cuts = parse_showinfo_timestamps(&stderr);
    debug!(video_id = %video_id, "Found {} candidate cuts", cuts.len());

    let scenes = scenes_from_cuts(&cuts, info.duration, config.min_scene_len);
    validate_scenes(&scenes).map_err(|e| MediaError::scene_detection(e.to_string()))?;

    info!(video_id = %video_id, "Scene detection completed: {} scenes", scenes.len());
    Ok(scenes)
}

/// Extract `pts_time:` values from `showinfo` log lines.
pub fn parse_showinfo_timestamps(output: &str) -> Vec<f64> {
    output
        .lines()
        .filter(|line| line.contains("showinfo"))
        .filter_map(|line| line.split("pts_time:").nth(1))
        .filter_map(|rest| rest.split_whitespace().next())
        .filter_map(|value| value.parse::<f64>().ok())
        .filter(|t| t.is_finite())
        .collect()
}

/// Turn cut timestamps into contiguous scenes covering `[0, duration]`.
///
/// Cuts outside `(0, duration)` are ignored; boundaries closer than
/// `min_scene_len` to the previous one are dropped.
pub fn scenes_from_cuts(cuts: &[f64], duration: f64, min_scene_len: f64) -> Vec<Scene> {
    if duration <= 0.0 {
        return Vec::new();
    }

    let mut sorted: Vec<f64> = cuts
        .iter()
        .copied()
        .filter(|t| *t > 0.0 && *t < duration)
        .collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut boundaries = vec![0.0];
    for cut in sorted {
        let last = boundaries[boundaries.len() - 1];
        if cut - last >= min_scene_len {
            boundaries.push(cut);
        }
    }

    // The final scene must also meet the minimum length.
    if boundaries.len() > 1 && duration - boundaries[boundaries.len() - 1] < min_scene_len {
        boundaries.pop();
    }
    boundaries.push(duration);

    boundaries
        .windows(2)
        .enumerate()
        .map(|(i, w)| Scene::new(i as u32, w[0], w[1]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_showinfo() {
        let stderr = "\
[Parsed_showinfo_1 @ 0x1] n:   0 pts:  61440 pts_time:4.8     duration:512
[Parsed_showinfo_1 @ 0x1] n:   1 pts: 153600 pts_time:12.0    duration:512
frame=   2 fps=0.0 q=-0.0 Lsize=N/A time=00:00:20.00
[Parsed_showinfo_1 @ 0x1] color_range:tv";
        assert_eq!(parse_showinfo_timestamps(stderr), vec![4.8, 12.0]);
    }

    #[test]
    fn test_no_cuts_yields_single_scene() {
        let scenes = scenes_from_cuts(&[], 30.0, 0.1);
        assert_eq!(scenes, vec![Scene::new(0, 0.0, 30.0)]);
    }

    #[test]
    fn test_cuts_split_contiguously() {
        let scenes = scenes_from_cuts(&[12.0, 4.8], 20.0, 0.1);
        assert_eq!(
            scenes,
            vec![
                Scene::new(0, 0.0, 4.8),
                Scene::new(1, 4.8, 12.0),
                Scene::new(2, 12.0, 20.0),
            ]
        );
        assert!(validate_scenes(&scenes).is_ok());
    }

    #[test]
    fn test_close_cuts_are_merged() {
        let scenes = scenes_from_cuts(&[5.0, 5.05, 9.98], 10.0, 0.1);
        assert_eq!(scenes, vec![Scene::new(0, 0.0, 5.0), Scene::new(1, 5.0, 10.0)]);
    }

    #[test]
    fn test_out_of_range_cuts_ignored() {
        let scenes = scenes_from_cuts(&[0.0, -1.0, 15.0], 10.0, 0.1);
        assert_eq!(scenes.len(), 1);
        assert!(scenes_from_cuts(&[1.0], 0.0, 0.1).is_empty());
    }
}
