//! Content-addressable record of every tracked input file.
//!
//! Each tracked file (content source, template, partial, data file, the site
//! config) has exactly one [`FileRecord`] holding its BLAKE3 digest, size and
//! the mtime observed when it was hashed.
//!
//! # Freshness Check
//!
//! ```text
//! stat(path) ──► size + mtime equal to record? ──yes──► unchanged (no read)
//!                         │
//!                         no
//!                         ▼
//!                 hash(path) == record.hash? ──yes──► unchanged (touched only)
//!                         │
//!                         no
//!                         ▼
//!                      changed
//! ```
//!
//! Comparison is always hash-based. The mtime is only a pre-filter, so
//! touching a file without modifying it never triggers a rebuild.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

// ============================================================================
// Content Hash
// ============================================================================

/// 256-bit BLAKE3 digest of a file's bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash a byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex form (64 chars).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

// ============================================================================
// File Stat / Record
// ============================================================================

/// Cheap metadata used as the freshness pre-filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: Option<SystemTime>,
}

impl FileStat {
    /// Stat a regular file. Returns `None` if it is missing or not a file.
    pub fn of(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        if !meta.is_file() {
            return None;
        }
        Some(Self {
            size: meta.len(),
            mtime: meta.modified().ok(),
        })
    }
}

/// Last-seen state of one tracked input file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path relative to the site root.
    pub path: PathBuf,
    pub content_hash: ContentHash,
    pub size: u64,
    /// File mtime at hashing time. `None` disables the pre-filter for this file.
    pub observed_at: Option<SystemTime>,
}

impl FileRecord {
    /// Build a record from bytes that were just read, using a stat taken
    /// *before* the read.
    ///
    /// Pairing an older mtime with newer bytes can only cause an extra rehash
    /// later, never a missed change.
    pub fn from_read(path: PathBuf, stat: Option<FileStat>, bytes: &[u8]) -> Self {
        Self {
            path,
            content_hash: ContentHash::from_bytes(bytes),
            size: bytes.len() as u64,
            observed_at: stat.and_then(|s| s.mtime),
        }
    }

    /// Stat then read and hash `root.join(path)`.
    pub fn hash_file(root: &Path, path: &Path) -> io::Result<Self> {
        let full = root.join(path);
        let stat = FileStat::of(&full);
        let bytes = fs::read(&full)?;
        Ok(Self::from_read(path.to_path_buf(), stat, &bytes))
    }

    /// True when size and mtime both match, meaning hashing can be skipped.
    pub fn matches_stat(&self, stat: &FileStat) -> bool {
        self.size == stat.size && self.observed_at.is_some() && self.observed_at == stat.mtime
    }
}

// ============================================================================
// Store
// ============================================================================

/// Maps tracked file path to its [`FileRecord`].
#[derive(Debug, Clone, Default)]
pub struct ContentHashStore {
    records: FxHashMap<PathBuf, FileRecord>,
}

impl ContentHashStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from persisted records.
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        Self {
            records: records.into_iter().map(|r| (r.path.clone(), r)).collect(),
        }
    }

    /// Stored digest of `path`, if tracked.
    pub fn hash_of(&self, path: &Path) -> Option<ContentHash> {
        self.records.get(path).map(|r| r.content_hash)
    }

    pub fn get(&self, path: &Path) -> Option<&FileRecord> {
        self.records.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.records.contains_key(path)
    }

    /// Store a digest without an mtime.
    ///
    /// The next freshness check for this path always hashes. Prefer
    /// [`record`](Self::record) when a stat is available.
    pub fn update(&mut self, path: &Path, digest: ContentHash, size: u64) {
        self.record(FileRecord {
            path: path.to_path_buf(),
            content_hash: digest,
            size,
            observed_at: None,
        });
    }

    /// Insert or replace a full record.
    pub fn record(&mut self, record: FileRecord) {
        self.records.insert(record.path.clone(), record);
    }

    /// True if `live` differs from the stored digest or the path is untracked.
    pub fn has_changed(&self, path: &Path, live: ContentHash) -> bool {
        self.hash_of(path) != Some(live)
    }

    pub fn remove(&mut self, path: &Path) -> Option<FileRecord> {
        self.records.remove(path)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// All tracked paths (unordered).
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.records.keys().map(PathBuf::as_path)
    }

    /// Records sorted by path, for deterministic persistence.
    pub fn to_records(&self) -> Vec<FileRecord> {
        let mut records: Vec<_> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.path.cmp(&b.path));
        records
    }
}
