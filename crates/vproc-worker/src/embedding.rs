//! Embedding of transcript segments and frame captions.

use tracing::debug;

use vproc_ml_client::chunk_text_by_tokens;
use vproc_models::{FrameAnalysis, Scene, TranscriptSegment};

use crate::error::WorkerResult;
use crate::stages::Embedder;

/// Chunk size for scene transcripts, in tokens.
pub const TRANSCRIPT_CHUNK_TOKENS: usize = 500;
/// Overlap between consecutive transcript chunks, in tokens.
pub const TRANSCRIPT_CHUNK_OVERLAP: usize = 50;

/// Indices of the segments overlapping each scene, in scene order.
pub fn group_segments_by_scene(segments: &[TranscriptSegment], scenes: &[Scene]) -> Vec<Vec<usize>> {
    scenes
        .iter()
        .map(|scene| {
            segments
                .iter()
                .enumerate()
                .filter(|(_, seg)| scene.overlaps(seg.t_start, seg.t_end))
                .map(|(i, _)| i)
                .collect()
        })
        .collect()
}

/// Compute one embedding per transcript segment.
///
/// Segment text is pooled per scene and chunked; each segment takes the
/// first chunk embedding of the first scene it overlaps. Segments outside
/// every scene are embedded from their own text. Segments with no usable
/// text get `None`.
pub async fn embed_transcript(
    embedder: &dyn Embedder,
    segments: &[TranscriptSegment],
    scenes: &[Scene],
) -> WorkerResult<Vec<Option<Vec<f32>>>> {
    let mut embeddings: Vec<Option<Vec<f32>>> = vec![None; segments.len()];
    let mut covered = vec![false; segments.len()];

    for (scene, members) in scenes.iter().zip(group_segments_by_scene(segments, scenes)) {
        if members.is_empty() {
            continue;
        }
        for &i in &members {
            covered[i] = true;
        }

        let text = members
            .iter()
            .map(|&i| segments[i].text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let mut chunk_embeddings = Vec::new();
        for chunk in chunk_text_by_tokens(&text, TRANSCRIPT_CHUNK_TOKENS, TRANSCRIPT_CHUNK_OVERLAP) {
            chunk_embeddings.push(embedder.embed(&chunk).await?);
        }
        debug!(
            scene_idx = scene.idx,
            "Embedded {} transcript chunks for {} segments",
            chunk_embeddings.len(),
            members.len()
        );

        let Some(first) = chunk_embeddings.into_iter().next() else {
            continue;
        };
        for &i in &members {
            if embeddings[i].is_none() {
                embeddings[i] = Some(first.clone());
            }
        }
    }

    for (i, segment) in segments.iter().enumerate() {
        if covered[i] {
            continue;
        }
        let text = segment.text.trim();
        if !text.is_empty() {
            embeddings[i] = Some(embedder.embed(text).await?);
        }
    }

    Ok(embeddings)
}

/// Embed a caption, or `None` when it has no caption text.
pub async fn embed_caption(
    embedder: &dyn Embedder,
    analysis: &FrameAnalysis,
) -> WorkerResult<Option<Vec<f32>>> {
    if analysis.caption.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(embedder.embed(&analysis.embedding_text()).await?))
}
