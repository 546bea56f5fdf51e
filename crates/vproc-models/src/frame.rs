//! Candidate frames sampled from scenes.

use serde::{Deserialize, Serialize};

/// A visual sample taken from one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Index of the owning scene
    pub scene_idx: u32,
    /// Perceptual hash, 64 bits as 16 hex characters (empty if hashing failed)
    #[serde(default)]
    pub phash: String,
    /// Path of the extracted image
    pub path: String,
    /// Timestamp of the sample in seconds
    #[serde(default)]
    pub timestamp: f64,
}

impl Frame {
    pub fn new(scene_idx: u32, phash: impl Into<String>, path: impl Into<String>, timestamp: f64) -> Self {
        Self {
            scene_idx,
            phash: phash.into(),
            path: path.into(),
            timestamp,
        }
    }
}
