//! Speech-to-text.

use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::info;

use vproc_models::TranscriptSegment;

use crate::client::MlClient;
use crate::error::{MlError, MlResult};

#[derive(Debug, Deserialize)]
pub struct TranscriptionResponse {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub segments: Vec<ResponseSegment>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseSegment {
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub text: String,
}

/// Turn an API reply into transcript segments.
///
/// Text is trimmed and empty segments dropped. A reply with text but no
/// segments becomes one segment spanning `[0, duration]`.
pub fn segments_from_response(
    response: TranscriptionResponse,
    duration_hint: Option<f64>,
) -> Vec<TranscriptSegment> {
    let segments: Vec<TranscriptSegment> = response
        .segments
        .into_iter()
        .filter_map(|s| {
            let text = s.text.trim();
            (!text.is_empty()).then(|| TranscriptSegment::new(s.start, s.end, text))
        })
        .collect();

    if !segments.is_empty() {
        return segments;
    }

    let text = response.text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let duration = response.duration.or(duration_hint).unwrap_or(0.0);
    vec![TranscriptSegment::new(0.0, duration, text)]
}

fn audio_mime(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("m4a") => "audio/mp4",
        Some("mp4") => "video/mp4",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

impl MlClient {
    /// Transcribe an audio (or video) file into timed segments.
    pub async fn transcribe(
        &self,
        audio_path: &Path,
        duration_hint: Option<f64>,
    ) -> MlResult<Vec<TranscriptSegment>> {
        let bytes = tokio::fs::read(audio_path).await?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();
        let mime = audio_mime(audio_path);
        let url = self.url("audio/transcriptions");

        info!("Transcribing {} ({} bytes)", audio_path.display(), bytes.len());

        let response = self
            .with_retry(|| async {
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.clone())
                    .mime_str(mime)
                    .map_err(|e| MlError::RequestFailed(e.to_string()))?;
                let form = Form::new()
                    .part("file", part)
                    .text("model", self.config.transcription_model.clone())
                    .text("response_format", "verbose_json")
                    .text("timestamp_granularities[]", "segment");

                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .multipart(form)
                    .send()
                    .await
                    .map_err(|e| self.map_transport(e))?;
                Self::check_status(response).await
            })
            .await?;

        let bytes = response.bytes().await?;
        let parsed: TranscriptionResponse = serde_json::from_slice(&bytes)
            .map_err(|e| MlError::InvalidResponse(format!("transcription: {}", e)))?;

        let segments = segments_from_response(parsed, duration_hint);
        info!("Transcription returned {} segments", segments.len());
        Ok(segments)
    }
}
