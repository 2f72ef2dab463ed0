//! Image classification and stream directory discovery.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::WatcherConfig;

/// Decides whether a path names a supported still image, by extension.
#[derive(Debug, Clone)]
pub struct ImageClassifier {
    formats: Vec<String>,
}

impl ImageClassifier {
    /// Create a classifier accepting the configured formats.
    pub fn new(config: &WatcherConfig) -> Self {
        Self {
            formats: config
                .supported_formats
                .iter()
                .map(|fmt| fmt.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Check if a file has a supported image extension.
    ///
    /// Purely lexical: the filesystem is not consulted, so a directory named
    /// `shots.png` still passes. Callers check `is_dir` first.
    pub fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext_lower = ext.to_lowercase();
                self.formats.iter().any(|fmt| *fmt == ext_lower)
            })
            .unwrap_or(false)
    }
}

impl Default for ImageClassifier {
    fn default() -> Self {
        Self::new(&WatcherConfig::default())
    }
}

/// List the stream directories that already exist directly under `root`.
pub fn discover_stream_dirs(root: &Path) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();

    // Sort by path for deterministic ordering
    dirs.sort();
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_supported_extensions_any_case() {
        let classifier = ImageClassifier::default();
        for ext in ["jpg", "jpeg", "png", "gif", "bmp", "tiff"] {
            assert!(classifier.is_image(Path::new(&format!("frame.{ext}"))), "{ext}");
            let upper = ext.to_uppercase();
            assert!(classifier.is_image(Path::new(&format!("frame.{upper}"))), "{upper}");
        }
        assert!(classifier.is_image(Path::new("frame.JpEg")));
    }

    #[test]
    fn test_rejects_other_files() {
        let classifier = ImageClassifier::default();
        assert!(!classifier.is_image(Path::new("notes.txt")));
        assert!(!classifier.is_image(Path::new("clip.mp4")));
        assert!(!classifier.is_image(Path::new("frame")));
        assert!(!classifier.is_image(Path::new(".jpg")));
    }

    #[test]
    fn test_rejects_directory_path() {
        let dir = tempfile::tempdir().unwrap();
        let classifier = ImageClassifier::default();
        assert!(!classifier.is_image(dir.path()));
    }

    #[test]
    fn test_dotted_config_formats() {
        let config = WatcherConfig {
            supported_formats: vec![".WEBP".to_string()],
            ..Default::default()
        };
        let classifier = ImageClassifier::new(&config);
        assert!(classifier.is_image(Path::new("a.webp")));
        assert!(!classifier.is_image(Path::new("a.jpg")));
    }

    #[test]
    fn test_discover_stream_dirs() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("lobby")).unwrap();
        std::fs::create_dir(root.path().join("dock")).unwrap();
        std::fs::create_dir_all(root.path().join("dock").join("nested")).unwrap();
        std::fs::write(root.path().join("stray.jpg"), b"x").unwrap();

        let dirs = discover_stream_dirs(root.path());
        assert_eq!(
            dirs,
            vec![root.path().join("dock"), root.path().join("lobby")]
        );
    }
}
