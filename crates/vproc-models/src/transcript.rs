//! Transcript segments.

use serde::{Deserialize, Serialize};

/// A timed piece of transcribed speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub t_start: f64,
    pub t_end: f64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl TranscriptSegment {
    pub fn new(t_start: f64, t_end: f64, text: impl Into<String>) -> Self {
        Self {
            t_start,
            t_end,
            text: text.into(),
            embedding: None,
        }
    }
}
