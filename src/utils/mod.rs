//! Filesystem helpers shared by detection and discovery.

pub mod category;

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File names never tracked, wherever they appear.
pub const IGNORED_FILES: &[&str] = &[".DS_Store"];

/// Collect all files from a directory recursively, sorted.
pub fn collect_all_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let name = e.file_name().to_str().unwrap_or_default();
            !IGNORED_FILES.contains(&name)
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Express `path` relative to `root`.
///
/// Already-relative paths are returned as given; absolute paths outside
/// the root yield `None`.
pub fn relativize(root: &Path, path: &Path) -> Option<PathBuf> {
    if path.is_relative() {
        return Some(path.to_path_buf());
    }
    path.strip_prefix(root)
        .ok()
        .map(Path::to_path_buf)
        .or_else(|| {
            let root = root.canonicalize().ok()?;
            path.strip_prefix(root).ok().map(Path::to_path_buf)
        })
}
