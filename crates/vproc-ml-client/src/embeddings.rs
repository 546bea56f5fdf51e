//! Text embeddings and the chunking used to feed them.

use serde::{Deserialize, Serialize};
use tracing::debug;

use vproc_models::EMBEDDING_DIMENSIONS;

use crate::client::MlClient;
use crate::error::{MlError, MlResult};

/// Rough characters-per-token ratio used for chunk sizing.
pub const CHARS_PER_TOKEN: usize = 4;

/// How far back from a window's end to look for a sentence break.
pub const SENTENCE_LOOKBACK_CHARS: usize = 100;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl MlClient {
    /// Embed a piece of text. The returned vector always has
    /// [`EMBEDDING_DIMENSIONS`] entries.
    pub async fn embed(&self, text: &str) -> MlResult<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: text,
            dimensions: EMBEDDING_DIMENSIONS,
        };

        let response: EmbeddingResponse = self.post_json("embeddings", &request).await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| MlError::InvalidResponse("embedding reply has no data".to_string()))?;

        if embedding.len() != EMBEDDING_DIMENSIONS {
            return Err(MlError::InvalidResponse(format!(
                "expected {} embedding dimensions, got {}",
                EMBEDDING_DIMENSIONS,
                embedding.len()
            )));
        }

        debug!("Embedded {} chars", text.len());
        Ok(embedding)
    }
}

/// Split text into windows of roughly `max_tokens` tokens, each overlapping
/// the previous one by `overlap_tokens`.
///
/// A window prefers to end just after `.`, `!` or `?` when one falls in its
/// last [`SENTENCE_LOOKBACK_CHARS`] characters. Chunks are trimmed and empty
/// chunks are dropped.
pub fn chunk_text_by_tokens(text: &str, max_tokens: usize, overlap_tokens: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let max_chars = (max_tokens * CHARS_PER_TOKEN).max(1);
    let overlap_chars = (overlap_tokens * CHARS_PER_TOKEN).min(max_chars - 1);

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let mut end = (start + max_chars).min(chars.len());

        if end < chars.len() {
            let floor = end.saturating_sub(SENTENCE_LOOKBACK_CHARS).max(start + 1);
            if let Some(pos) = (floor..end)
                .rev()
                .find(|&i| matches!(chars[i], '.' | '!' | '?'))
            {
                end = pos + 1;
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= chars.len() {
            break;
        }

        // Always move forward, even when the overlap would cover the whole window.
        let next = end.saturating_sub(overlap_chars);
        start = if next > start { next } else { end };
    }

    chunks
}
