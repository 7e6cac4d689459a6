//! Change detection against the content hash store.
//!
//! Each candidate path is classified with a two-tier check: a stat whose
//! size and mtime match the stored record means unchanged without reading
//! the file; anything else is hashed and compared by digest.
//!
//! # Entry Modes
//!
//! | Mode                             | Candidates                                        |
//! |----------------------------------|---------------------------------------------------|
//! | [`detect`](ChangeDetector::detect)        | tracked paths, referenced paths, discovery sources, shared roots, config |
//! | [`detect_paths`](ChangeDetector::detect_paths) | only the given paths (directories expand)      |

use crate::{
    store::{ContentHashStore, FileRecord, FileStat},
    utils::{collect_all_files, relativize},
};
use rayon::prelude::*;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

/// Raw result of change detection. Paths are root-relative.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Paths whose digest differs from the store, including new paths.
    pub changed: BTreeSet<PathBuf>,
    /// Subset of `changed` the store has never seen.
    pub added: BTreeSet<PathBuf>,
    /// Tracked paths that no longer exist.
    pub deleted: BTreeSet<PathBuf>,
    /// The site config file changed, appeared or disappeared.
    pub config_changed: bool,
    /// Fresh records for every path in `changed`.
    pub hashed: Vec<FileRecord>,
    /// Files whose mtime moved but whose digest did not.
    pub touched: Vec<FileRecord>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty() && !self.config_changed
    }

    /// Changed and deleted paths together, sorted.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.changed.union(&self.deleted).map(PathBuf::as_path)
    }
}

#[derive(Debug)]
enum Status {
    Unchanged,
    Touched(FileRecord),
    Added(FileRecord),
    Modified(FileRecord),
    Deleted(PathBuf),
    /// Missing and never tracked.
    Absent,
}

pub struct ChangeDetector<'a> {
    root: &'a Path,
    store: &'a ContentHashStore,
    config_file: &'a Path,
    shared: &'a [PathBuf],
    /// Paths outputs depend on; may not exist yet.
    referenced: BTreeSet<PathBuf>,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(
        root: &'a Path,
        store: &'a ContentHashStore,
        config_file: &'a Path,
        shared: &'a [PathBuf],
    ) -> Self {
        Self {
            root,
            store,
            config_file,
            shared,
            referenced: BTreeSet::new(),
        }
    }

    /// Also examine `paths` on a full scan, so a dependency that was
    /// missing when it was recorded is reported once it appears.
    pub fn with_referenced(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.referenced.extend(paths);
        self
    }

    /// Full scan: every tracked or referenced path, every discovered source,
    /// every file under a shared root, and the config file.
    pub fn detect<'s>(&self, sources: impl IntoIterator<Item = &'s Path>) -> ChangeSet {
        let mut candidates: BTreeSet<PathBuf> = self.store.paths().map(Path::to_path_buf).collect();
        candidates.extend(self.referenced.iter().cloned());
        candidates.extend(sources.into_iter().map(Path::to_path_buf));
        candidates.insert(self.config_file.to_path_buf());
        for shared in self.shared {
            candidates.extend(self.files_under(shared));
        }
        self.classify_all(candidates)
    }

    /// Examine only `paths` (absolute or root-relative).
    ///
    /// A directory expands to the files under it; tracked paths below any
    /// given path are included so removed directories report deletions.
    /// Paths outside the root are ignored.
    pub fn detect_paths(&self, paths: &[PathBuf]) -> ChangeSet {
        let mut candidates = BTreeSet::new();
        for path in paths {
            let Some(rel) = relativize(self.root, path) else {
                continue;
            };
            if self.root.join(&rel).is_dir() {
                candidates.extend(self.files_under(&rel));
            } else {
                candidates.insert(rel.clone());
            }
            candidates.extend(
                self.store
                    .paths()
                    .filter(|tracked| tracked.starts_with(&rel))
                    .map(Path::to_path_buf),
            );
        }
        self.classify_all(candidates)
    }

    fn files_under(&self, dir: &Path) -> Vec<PathBuf> {
        collect_all_files(&self.root.join(dir))
            .into_iter()
            .filter_map(|file| relativize(self.root, &file))
            .collect()
    }

    fn classify_all(&self, candidates: BTreeSet<PathBuf>) -> ChangeSet {
        let statuses: Vec<Status> = candidates
            .into_par_iter()
            .map(|path| self.classify(path))
            .collect();

        let mut set = ChangeSet::default();
        for status in statuses {
            match status {
                Status::Unchanged | Status::Absent => {}
                Status::Touched(record) => set.touched.push(record),
                Status::Added(record) => {
                    set.added.insert(record.path.clone());
                    set.changed.insert(record.path.clone());
                    set.hashed.push(record);
                }
                Status::Modified(record) => {
                    set.changed.insert(record.path.clone());
                    set.hashed.push(record);
                }
                Status::Deleted(path) => {
                    set.deleted.insert(path);
                }
            }
        }
        set.config_changed = set.changed.contains(self.config_file) || set.deleted.contains(self.config_file);
        set
    }

    fn classify(&self, path: PathBuf) -> Status {
        let stored = self.store.get(&path);
        let gone = |path| if stored.is_some() { Status::Deleted(path) } else { Status::Absent };

        let Some(stat) = FileStat::of(&self.root.join(&path)) else {
            return gone(path);
        };
        if stored.is_some_and(|record| record.matches_stat(&stat)) {
            return Status::Unchanged;
        }
        // Removed between stat and read counts as removed
        let Ok(fresh) = FileRecord::hash_file(self.root, &path) else {
            return gone(path);
        };
        match stored {
            None => Status::Added(fresh),
            Some(record) if record.content_hash == fresh.content_hash => Status::Touched(fresh),
            Some(_) => Status::Modified(fresh),
        }
    }
}
