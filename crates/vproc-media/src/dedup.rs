//! Near-duplicate frame filtering by perceptual hash.

use vproc_models::Frame;

/// Default Hamming distance at or below which two frames are duplicates.
pub const DEFAULT_DEDUP_THRESHOLD: u32 = 6;

/// Hamming distance between two hash strings.
///
/// Equal-length hex strings are compared bit by bit; other equal-length
/// strings by differing characters. Hashes of different lengths are never
/// comparable and return `None`.
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    if a.len() != b.len() {
        return None;
    }

    let distance = a
        .chars()
        .zip(b.chars())
        .map(|(x, y)| match (x.to_digit(16), y.to_digit(16)) {
            (Some(dx), Some(dy)) => (dx ^ dy).count_ones(),
            _ => u32::from(x != y),
        })
        .sum();
    Some(distance)
}

/// Drop near-duplicate frames, keeping the first one seen in scene order.
///
/// Frames are stable-sorted by scene index, frames without a hash are
/// dropped, and each remaining frame is kept only if its distance to every
/// already-kept hash is greater than `threshold`. The result depends on
/// input order.
pub fn dedupe_frames(mut frames: Vec<Frame>, threshold: u32) -> Vec<Frame> {
    frames.sort_by_key(|f| f.scene_idx);

    let mut kept: Vec<Frame> = Vec::with_capacity(frames.len());
    for frame in frames {
        if frame.phash.is_empty() {
            continue;
        }

        let duplicate = kept.iter().any(|seen| {
            hamming_distance(&frame.phash, &seen.phash)
                .map(|d| d <= threshold)
                .unwrap_or(false)
        });

        if !duplicate {
            kept.push(frame);
        }
    }
    kept
}
