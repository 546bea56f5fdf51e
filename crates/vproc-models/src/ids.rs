//! Deterministic identifiers for derived entities.
//!
//! IDs are derived from `(video_id, ordinal)` so that re-running a job writes
//! to the same keys instead of creating duplicates.

use crate::VideoId;

pub fn scene_id(video_id: &VideoId, idx: usize) -> String {
    format!("{}_scene_{:03}", video_id, idx)
}

pub fn frame_id(video_id: &VideoId, idx: usize) -> String {
    format!("{}_frame_{:03}", video_id, idx)
}

pub fn segment_id(video_id: &VideoId, idx: usize) -> String {
    format!("{}_segment_{:03}", video_id, idx)
}

pub fn caption_id(frame_id: &str) -> String {
    format!("{}_caption", frame_id)
}
