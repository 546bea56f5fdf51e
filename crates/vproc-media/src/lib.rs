//! FFmpeg CLI wrapper for the video processing pipeline.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with timeout and cancellation
//! - Probing, normalization and audio extraction
//! - Scene detection from FFmpeg's scene-change score
//! - Frame extraction with DCT perceptual hashing and near-duplicate removal
//! - Subtitle output for transcripts

pub mod command;
pub mod dedup;
pub mod error;
pub mod frames;
pub mod normalize;
pub mod paths;
pub mod phash;
pub mod probe;
pub mod scenes;
pub mod srt;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use dedup::{dedupe_frames, hamming_distance, DEFAULT_DEDUP_THRESHOLD};
pub use error::{MediaError, MediaResult};
pub use frames::{extract_frames, FrameExtractorConfig};
pub use normalize::{normalize_video, NormalizedVideo};
pub use paths::{DataLayout, DEFAULT_DATA_DIR};
pub use phash::{phash_file, phash_image};
pub use probe::{get_duration, probe_video, VideoInfo};
pub use scenes::{detect_scenes, SceneDetectorConfig};
pub use srt::{format_timecode, write_srt};
