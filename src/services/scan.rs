//! Import folder scanning
//!
//! Walks a drop folder and reports every video file as a folder-relative
//! path. Submission of discovery work is the caller's concern.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

const VIDEO_EXTENSIONS: &[&str] = &[
    "mkv", "mp4", "avi", "ogm", "wmv", "m4v", "mov", "webm", "ts", "flv",
];

/// Whether a path looks like a video file by extension
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Walks import folders for video files
#[derive(Debug, Default)]
pub struct ImportScanner;

impl ImportScanner {
    /// All video files under `root`, as root-relative paths in walk order
    pub fn scan(&self, root: &Path) -> Result<Vec<String>> {
        let mut found = Vec::new();

        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.with_context(|| format!("Failed to walk {}", root.display()))?;
            if !entry.file_type().is_file() || !is_video_file(entry.path()) {
                continue;
            }

            let relative = entry
                .path()
                .strip_prefix(root)
                .with_context(|| format!("Path {} escapes scan root", entry.path().display()))?;
            found.push(relative.to_string_lossy().replace('\\', "/"));
        }

        debug!(root = %root.display(), files = found.len(), "Import folder scanned");
        Ok(found)
    }
}
