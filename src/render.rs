//! The boundary between the engine and the page renderer.
//!
//! Discovery hands the engine a list of [`SourceEntry`]s. For each entry in
//! the rebuild plan the orchestrator calls [`Renderer::render`] with a fresh
//! [`RenderContext`]; everything the renderer reads or references through the
//! context becomes a dependency edge of the output.

use crate::{
    deps::{DependencyTracker, OutputId, TargetKey},
    output::{FullOutput, Taxonomies},
    store::{FileRecord, FileStat},
};
use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::{
    fs,
    path::{Path, PathBuf},
};

// ============================================================================
// Discovery
// ============================================================================

/// Metadata discovery knows without rendering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticMeta {
    /// Content version (a family member of versioned docs).
    pub version: Option<String>,
    pub taxonomies: Taxonomies,
}

/// One discovered source and the output it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    /// Source path relative to the site root.
    pub source: PathBuf,
    pub output: OutputId,
    pub meta: StaticMeta,
}

impl SourceEntry {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<OutputId>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            meta: StaticMeta::default(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.meta.version = Some(version.into());
        self
    }

    pub fn with_terms<I, S>(mut self, taxonomy: impl Into<String>, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meta
            .taxonomies
            .entry(taxonomy.into())
            .or_default()
            .extend(terms.into_iter().map(Into::into));
        self
    }

    pub fn is_versioned(&self) -> bool {
        self.meta.version.is_some()
    }
}

// ============================================================================
// Renderer
// ============================================================================

/// Produces a [`FullOutput`] from a source entry.
///
/// Implementations must be thread-safe: the orchestrator renders on a pool.
pub trait Renderer: Send + Sync {
    fn render(&self, ctx: &RenderContext<'_>) -> Result<FullOutput>;

    /// Re-render an unchanged output whose proxy needs a non-cached field.
    ///
    /// Edges and file hashes observed here are discarded: the output is not
    /// in the rebuild plan, so its recorded state stays authoritative.
    fn load(&self, entry: &SourceEntry, root: &Path) -> Result<FullOutput> {
        self.render(&RenderContext::new(entry, root))
    }
}

/// What one render task observed besides its output.
#[derive(Debug, Default)]
pub struct Observation {
    pub edges: FxHashSet<TargetKey>,
    /// Hashes of every file read through the context, stat taken before read.
    pub files: Vec<FileRecord>,
}

impl Observation {
    /// The record of `path`, if it was read during the render.
    pub fn file(&self, path: &Path) -> Option<&FileRecord> {
        self.files.iter().find(|r| r.path == path)
    }
}

/// Per-task context handed to [`Renderer::render`].
pub struct RenderContext<'a> {
    entry: &'a SourceEntry,
    root: &'a Path,
    tracker: DependencyTracker,
    files: Mutex<Vec<FileRecord>>,
}

impl<'a> RenderContext<'a> {
    pub fn new(entry: &'a SourceEntry, root: &'a Path) -> Self {
        Self {
            entry,
            root,
            tracker: DependencyTracker::new(),
            files: Mutex::new(Vec::new()),
        }
    }

    pub fn entry(&self) -> &SourceEntry {
        self.entry
    }

    pub fn root(&self) -> &Path {
        self.root
    }

    /// Edge collector for references that are not read through the context
    /// (taxonomy lookups, config keys, links to other outputs).
    pub fn deps(&self) -> &DependencyTracker {
        &self.tracker
    }

    /// Read the entry's source and record the hash of exactly the bytes read.
    pub fn read_source(&self) -> Result<String> {
        self.read_tracked(&self.entry.source)
            .with_context(|| format!("failed to read source `{}`", self.entry.source.display()))
    }

    /// Read a file-backed dependency and record both the edge and its hash.
    ///
    /// The edge is recorded even when the read fails, so a missing include
    /// still ties the page to the path.
    pub fn read_dependency(&self, target: TargetKey) -> Result<String> {
        let Some(path) = target.path().map(Path::to_path_buf) else {
            bail!("`{target}` does not name a file");
        };
        self.tracker.record(target.clone());
        self.read_tracked(&path)
            .with_context(|| format!("failed to read dependency `{target}`"))
    }

    fn read_tracked(&self, path: &Path) -> Result<String> {
        let full = self.root.join(path);
        let stat = FileStat::of(&full);
        let bytes = fs::read(&full)?;
        let record = FileRecord::from_read(path.to_path_buf(), stat, &bytes);
        let text = String::from_utf8(bytes).context("not valid UTF-8")?;

        let mut files = self.files.lock();
        files.retain(|r| r.path != record.path);
        files.push(record);
        Ok(text)
    }

    pub fn finish(self) -> Observation {
        Observation {
            edges: self.tracker.into_targets(),
            files: self.files.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::is_not_found, store::ContentHash};
    use tempfile::TempDir;

    #[test]
    fn test_entry_builders() {
        let entry = SourceEntry::new("content/v2/a.md", "v2/a")
            .with_version("v2")
            .with_terms("tags", ["x", "y"]);
        assert!(entry.is_versioned());
        assert_eq!(entry.meta.taxonomies["tags"], vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_context_records_reads() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("templates")).unwrap();
        fs::write(dir.path().join("a.md"), "body").unwrap();
        fs::write(dir.path().join("templates/p.html"), "partial").unwrap();

        let entry = SourceEntry::new("a.md", "a");
        let ctx = RenderContext::new(&entry, dir.path());
        assert_eq!(ctx.read_source().unwrap(), "body");
        let partial = TargetKey::Partial("templates/p.html".into());
        assert_eq!(ctx.read_dependency(partial.clone()).unwrap(), "partial");
        ctx.deps().taxonomy("tags", "x");

        let seen = ctx.finish();
        assert_eq!(seen.edges.len(), 2);
        assert!(seen.edges.contains(&partial));
        assert_eq!(
            seen.file(Path::new("a.md")).unwrap().content_hash,
            ContentHash::from_bytes(b"body")
        );
        assert!(seen.file(Path::new("templates/p.html")).is_some());
    }

    #[test]
    fn test_missing_dependency_keeps_edge() {
        let dir = TempDir::new().unwrap();
        let entry = SourceEntry::new("a.md", "a");
        let ctx = RenderContext::new(&entry, dir.path());

        let err = ctx.read_dependency(TargetKey::Partial("gone.html".into())).unwrap_err();
        assert!(is_not_found(&err));
        assert!(ctx.read_dependency(TargetKey::Config("title".into())).is_err());

        let seen = ctx.finish();
        assert_eq!(seen.edges.len(), 1);
        assert!(seen.files.is_empty());
    }
}
