//! Subtitle file output for transcripts.

use std::fmt::Write as _;
use std::path::PathBuf;

use vproc_models::{TranscriptSegment, VideoId};

use crate::error::MediaResult;
use crate::paths::DataLayout;

/// Format seconds as `HH:MM:SS.mmm`.
pub fn format_timecode(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let secs = (total_ms % 60_000) / 1000;
    let millis = total_ms % 1000;
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

/// Render segments as numbered subtitle cues.
pub fn render_srt(segments: &[TranscriptSegment]) -> String {
    let mut out = String::new();
    for (i, seg) in segments.iter().enumerate() {
        let _ = writeln!(out, "{}", i + 1);
        let _ = writeln!(
            out,
            "{} --> {}",
            format_timecode(seg.t_start),
            format_timecode(seg.t_end)
        );
        let _ = writeln!(out, "{}", seg.text.trim());
        out.push('\n');
    }
    out
}

/// Write `{data}/subs/{video_id}.srt` and return its path.
pub async fn write_srt(
    layout: &DataLayout,
    video_id: &VideoId,
    segments: &[TranscriptSegment],
) -> MediaResult<PathBuf> {
    let dir = layout.subs_dir();
    tokio::fs::create_dir_all(&dir).await?;

    let path = dir.join(format!("{}.srt", video_id));
    tokio::fs::write(&path, render_srt(segments)).await?;
    Ok(path)
}
