//! Scene boundaries.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// A time interval of the video between two shot boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// 0-based, contiguous index
    pub idx: u32,
    /// Start time in seconds
    pub t_start: f64,
    /// End time in seconds
    pub t_end: f64,
}

impl Scene {
    pub fn new(idx: u32, t_start: f64, t_end: f64) -> Self {
        Self { idx, t_start, t_end }
    }

    pub fn duration(&self) -> f64 {
        self.t_end - self.t_start
    }

    pub fn midpoint(&self) -> f64 {
        (self.t_start + self.t_end) / 2.0
    }

    /// Whether `[start, end)` intersects this scene with positive length.
    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        start < self.t_end && end > self.t_start
    }
}

/// Check that scenes are contiguously indexed, non-empty and ordered.
///
/// Touching boundaries (`scene[i].t_start == scene[i-1].t_end`) are allowed.
pub fn validate_scenes(scenes: &[Scene]) -> ModelResult<()> {
    for (i, scene) in scenes.iter().enumerate() {
        if scene.idx as usize != i {
            return Err(ModelError::invalid_scene(
                scene.idx,
                format!("expected index {}", i),
            ));
        }
        if scene.t_start < 0.0 {
            return Err(ModelError::invalid_scene(scene.idx, "negative start time"));
        }
        if scene.t_end <= scene.t_start {
            return Err(ModelError::invalid_scene(scene.idx, "end must be after start"));
        }
        if i > 0 && scene.t_start < scenes[i - 1].t_end {
            return Err(ModelError::invalid_scene(
                scene.idx,
                "overlaps the previous scene",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_touching_scenes() {
        let scenes = vec![
            Scene::new(0, 0.0, 2.5),
            Scene::new(1, 2.5, 4.0),
            Scene::new(2, 4.5, 9.0),
        ];
        assert!(validate_scenes(&scenes).is_ok());
    }

    #[test]
    fn test_validate_rejects_overlap_and_empty() {
        let overlapping = vec![Scene::new(0, 0.0, 3.0), Scene::new(1, 2.0, 4.0)];
        assert!(validate_scenes(&overlapping).is_err());

        let empty = vec![Scene::new(0, 1.0, 1.0)];
        assert!(validate_scenes(&empty).is_err());

        let gap_in_index = vec![Scene::new(0, 0.0, 1.0), Scene::new(2, 1.0, 2.0)];
        assert!(validate_scenes(&gap_in_index).is_err());
    }

    #[test]
    fn test_overlap() {
        let scene = Scene::new(0, 10.0, 20.0);
        assert!(scene.overlaps(5.0, 11.0));
        assert!(scene.overlaps(19.0, 25.0));
        assert!(!scene.overlaps(20.0, 25.0));
        assert!(!scene.overlaps(0.0, 10.0));
        assert_eq!(scene.midpoint(), 15.0);
    }
}
