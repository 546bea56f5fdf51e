//! Frame analysis with a vision-capable chat model.

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use vproc_models::FrameAnalysis;

use crate::client::MlClient;
use crate::error::{MlError, MlResult};

const VISION_PROMPT: &str = "Describe this video frame. Return a one or two sentence caption, \
every visible control (buttons, switches, dials, gauges, sliders) with its label, kind, current \
reading and units, and any legible on-screen text with a confidence between 0 and 1.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// JSON schema the model must answer with.
pub fn frame_analysis_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "caption": { "type": "string" },
            "controls": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "label": { "type": "string" },
                        "kind": { "type": "string" },
                        "reading": { "type": "string" },
                        "units": { "type": "string" }
                    },
                    "required": ["label", "kind", "reading", "units"],
                    "additionalProperties": false
                }
            },
            "text_on_screen": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "text": { "type": "string" },
                        "confidence": { "type": "number" }
                    },
                    "required": ["text", "confidence"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["caption", "controls", "text_on_screen"],
        "additionalProperties": false
    })
}

fn image_mime(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Build the chat completion request for one image.
pub fn vision_request(model: &str, data_url: &str) -> Value {
    json!({
        "model": model,
        "temperature": 0.1,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": VISION_PROMPT },
                { "type": "image_url", "image_url": { "url": data_url } }
            ]
        }],
        "response_format": {
            "type": "json_schema",
            "json_schema": {
                "name": "frame_analysis",
                "strict": true,
                "schema": frame_analysis_schema()
            }
        }
    })
}

impl MlClient {
    /// Analyze one frame image.
    pub async fn analyze_frame(&self, image_path: &Path) -> MlResult<FrameAnalysis> {
        let bytes = tokio::fs::read(image_path).await?;
        let data_url = format!("data:{};base64,{}", image_mime(image_path), STANDARD.encode(&bytes));

        debug!("Analyzing frame {}", image_path.display());

        let request = vision_request(&self.config.vision_model, &data_url);
        let response: ChatResponse = self.post_json("chat/completions", &request).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| MlError::InvalidResponse("vision reply has no content".to_string()))?;

        serde_json::from_str(&content)
            .map_err(|e| MlError::InvalidResponse(format!("vision reply is not an analysis: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::test_client;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn frame_file() -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene_000.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        (dir, path)
    }

    #[test]
    fn test_request_shape() {
        let request = vision_request("gpt-4o", "data:image/jpeg;base64,AAAA");
        assert_eq!(request["model"], "gpt-4o");
        assert_eq!(request["temperature"], 0.1);
        assert_eq!(request["response_format"]["type"], "json_schema");
        assert_eq!(
            request["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/jpeg;base64,AAAA"
        );
    }

    #[tokio::test]
    async fn test_analyze_frame_parses_content() {
        let server = MockServer::start().await;
        let content = json!({
            "caption": "A control panel",
            "controls": [{"label": "Throttle", "kind": "lever", "reading": "40", "units": "%"}],
            "text_on_screen": [{"text": "ENGINE 1", "confidence": 0.92}]
        })
        .to_string();
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"role": "assistant", "content": content}}]
            })))
            .mount(&server)
            .await;

        let (_dir, frame) = frame_file();
        let analysis = test_client(&server.uri(), 0).analyze_frame(&frame).await.unwrap();
        assert_eq!(analysis.caption, "A control panel");
        assert_eq!(analysis.controls[0].label, "Throttle");
        assert_eq!(analysis.text_on_screen[0].text, "ENGINE 1");
    }

    #[tokio::test]
    async fn test_non_json_content_is_invalid_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "I cannot see the image"}}]
            })))
            .mount(&server)
            .await;

        let (_dir, frame) = frame_file();
        let err = test_client(&server.uri(), 0)
            .analyze_frame(&frame)
            .await
            .unwrap_err();
        assert!(err.is_invalid_response());
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let (_dir, frame) = frame_file();
        let err = test_client(&server.uri(), 1)
            .analyze_frame(&frame)
            .await
            .unwrap_err();
        assert!(matches!(err, MlError::ServiceUnavailable(_)));
    }
}
