//! On-disk layout under the data directory.

use std::path::{Path, PathBuf};

use vproc_models::VideoId;

/// Default data directory.
pub const DEFAULT_DATA_DIR: &str = "/app/data";

/// Resolves stored paths and output locations relative to a data directory.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a stored source path.
    ///
    /// Absolute paths are returned unchanged; relative paths are joined under
    /// the root.
    pub fn resolve_video_path(&self, stored_path: &str) -> PathBuf {
        let path = Path::new(stored_path);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.root.join(path)
    }

    /// `{root}/processed/{video_id}`
    pub fn processed_dir(&self, video_id: &VideoId) -> PathBuf {
        self.root.join("processed").join(video_id.as_str())
    }

    /// `{root}/frames/{video_id}`
    pub fn frames_dir(&self, video_id: &VideoId) -> PathBuf {
        self.root.join("frames").join(video_id.as_str())
    }

    /// `{root}/subs`
    pub fn subs_dir(&self) -> PathBuf {
        self.root.join("subs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_paths_join_root() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.resolve_video_path("uploads/v1.mp4"),
            PathBuf::from("/data/uploads/v1.mp4")
        );
    }

    #[test]
    fn test_absolute_paths_are_kept() {
        let layout = DataLayout::new("/data");
        assert_eq!(
            layout.resolve_video_path("/mnt/videos/v1.mp4"),
            PathBuf::from("/mnt/videos/v1.mp4")
        );
    }

    #[test]
    fn test_output_dirs() {
        let layout = DataLayout::new("/data");
        let video = VideoId::from("v9");
        assert_eq!(layout.processed_dir(&video), PathBuf::from("/data/processed/v9"));
        assert_eq!(layout.frames_dir(&video), PathBuf::from("/data/frames/v9"));
        assert_eq!(layout.subs_dir(), PathBuf::from("/data/subs"));
    }
}
