//! Pipeline stages and processing results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One named step of the fixed pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalize,
    Transcribe,
    Scenes,
    Frames,
    Vision,
    Embeddings,
}

impl Stage {
    /// Every stage in pipeline order.
    pub const ORDER: [Stage; 6] = [
        Stage::Normalize,
        Stage::Transcribe,
        Stage::Scenes,
        Stage::Frames,
        Stage::Vision,
        Stage::Embeddings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Normalize => "normalize",
            Stage::Transcribe => "transcribe",
            Stage::Scenes => "scenes",
            Stage::Frames => "frames",
            Stage::Vision => "vision",
            Stage::Embeddings => "embeddings",
        }
    }

    /// Scene detection and frame extraction cannot be disabled.
    pub fn is_mandatory(&self) -> bool {
        matches!(self, Stage::Scenes | Stage::Frames)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one orchestration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub success: bool,
    /// Stages that finished (and were persisted) before termination, in order
    pub stages_completed: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
}

impl ProcessingResult {
    pub fn succeeded(stages_completed: Vec<Stage>) -> Self {
        Self {
            success: true,
            stages_completed,
            error: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn failed(stages_completed: Vec<Stage>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            stages_completed,
            error: Some(error.into()),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    pub fn processing_time_sec(&self) -> f64 {
        self.metrics
            .get("processing_time_sec")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    }

    pub fn failed_at_stage(&self) -> Option<&str> {
        self.metrics.get("failed_at_stage").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_is_sorted() {
        let mut sorted = Stage::ORDER;
        sorted.sort();
        assert_eq!(sorted, Stage::ORDER);
    }

    #[test]
    fn test_stage_serializes_as_name() {
        let json = serde_json::to_string(&Stage::Embeddings).unwrap();
        assert_eq!(json, "\"embeddings\"");
        assert!(Stage::Scenes.is_mandatory());
        assert!(!Stage::Vision.is_mandatory());
    }

    #[test]
    fn test_result_metrics() {
        let result = ProcessingResult::failed(vec![Stage::Normalize], "boom")
            .with_metric("processing_time_sec", 1.5)
            .with_metric("failed_at_stage", "transcribe");
        assert!(!result.success);
        assert_eq!(result.processing_time_sec(), 1.5);
        assert_eq!(result.failed_at_stage(), Some("transcribe"));
    }
}
