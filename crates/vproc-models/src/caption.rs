//! Vision analysis output and frame captions.

use serde::{Deserialize, Serialize};

/// A control (button, dial, gauge...) visible in a frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ControlItem {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub reading: String,
    #[serde(default)]
    pub units: String,
}

/// Text detected on screen.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenText {
    #[serde(default)]
    pub text: String,
    /// Confidence in `[0, 1]`
    #[serde(default)]
    pub confidence: f64,
}

/// Structured description of one frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameAnalysis {
    pub caption: String,
    #[serde(default)]
    pub controls: Vec<ControlItem>,
    #[serde(default)]
    pub text_on_screen: Vec<ScreenText>,
}

impl FrameAnalysis {
    /// Placeholder used when a frame could not be analyzed.
    pub fn placeholder(reason: impl std::fmt::Display) -> Self {
        Self {
            caption: format!("Analysis failed: {}", reason),
            controls: Vec::new(),
            text_on_screen: Vec::new(),
        }
    }

    /// Text fed to the embedder for this frame.
    pub fn embedding_text(&self) -> String {
        let mut text = format!("Caption: {}", self.caption);

        if !self.controls.is_empty() {
            let controls = self
                .controls
                .iter()
                .map(|c| format!("{} ({}): {} {}", c.label, c.kind, c.reading, c.units))
                .collect::<Vec<_>>()
                .join("; ");
            text.push_str(" Controls: ");
            text.push_str(&controls);
        }

        if !self.text_on_screen.is_empty() {
            let screen = self
                .text_on_screen
                .iter()
                .map(|t| t.text.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            text.push_str(" Text on screen: ");
            text.push_str(&screen);
        }

        text
    }
}

/// A persisted caption for one stored frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameCaption {
    pub frame_id: String,
    pub analysis: FrameAnalysis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}
