//! Persistence of the engine's incremental state.
//!
//! One file per site root holds the content hash store, the forward
//! dependency index and the per-output cached metadata.
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────┬───────────────────┬─────────────────────────────┐
//! │ MagicHeader  │ BLAKE3(compressed)│ zlib(bincode(Payload))      │
//! │ 44 bytes     │ 32 bytes          │ rest of file                │
//! └──────────────┴───────────────────┴─────────────────────────────┘
//! ```
//!
//! Loading is all-or-nothing. Any mismatch or decode failure is a cache
//! miss, never a partial or guessed state.

mod error;
pub mod header;

pub use error::CacheError;
pub use header::MagicHeader;

use crate::{
    deps::{DependencyGraph, GraphSnapshot, OutputId},
    log,
    output::CachedMetadata,
    store::{ContentHash, ContentHashStore, FileRecord},
};
use flate2::{Compression, read::ZlibDecoder, write::ZlibEncoder};
use header::HEADER_LEN;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

const CHECKSUM_LEN: usize = 32;

/// Everything carried from one build to the next.
#[derive(Debug, Default)]
pub struct CacheState {
    pub hashes: ContentHashStore,
    pub graph: DependencyGraph,
    pub outputs: FxHashMap<OutputId, CachedMetadata>,
}

/// Serialized form. Sorted so identical state encodes to identical bytes.
#[derive(Serialize, Deserialize)]
struct Payload {
    files: Vec<FileRecord>,
    edges: GraphSnapshot,
    outputs: Vec<CachedMetadata>,
}

impl Payload {
    fn from_state(state: &CacheState) -> Self {
        let mut outputs: Vec<_> = state.outputs.values().cloned().collect();
        outputs.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            files: state.hashes.to_records(),
            edges: state.graph.snapshot(),
            outputs,
        }
    }

    fn into_state(self) -> CacheState {
        CacheState {
            hashes: ContentHashStore::from_records(self.files),
            graph: DependencyGraph::from_snapshot(self.edges),
            outputs: self.outputs.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone)]
pub struct CacheStore {
    path: PathBuf,
    header: MagicHeader,
    level: u32,
}

impl CacheStore {
    /// Cache at `path`, compressed at zlib `level` (0-9).
    pub fn new(path: impl Into<PathBuf>, level: u32) -> Self {
        Self {
            path: path.into(),
            header: MagicHeader::current(),
            level: level.min(9),
        }
    }

    /// Override the expected header (tests simulate engine upgrades with it).
    pub fn with_header(mut self, header: MagicHeader) -> Self {
        self.header = header;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached state, or `None` if it is absent or unusable.
    pub fn load(&self) -> Option<CacheState> {
        match self.try_load() {
            Ok(state) => Some(state),
            Err(err) if err.is_missing() => None,
            Err(err) => {
                log!("cache"; "discarding cache: {err}");
                None
            }
        }
    }

    pub fn try_load(&self) -> Result<CacheState, CacheError> {
        let bytes = fs::read(&self.path).map_err(CacheError::io(&self.path))?;
        self.decode(&bytes)
    }

    fn decode(&self, bytes: &[u8]) -> Result<CacheState, CacheError> {
        MagicHeader::parse(bytes, &self.path)?.validate(&self.header, &self.path)?;

        let rest = &bytes[HEADER_LEN..];
        if rest.len() < CHECKSUM_LEN {
            return Err(CacheError::InvalidHeader {
                path: self.path.clone(),
                reason: "missing payload checksum".into(),
            });
        }
        let (stored, compressed) = rest.split_at(CHECKSUM_LEN);
        let actual = ContentHash::from_bytes(compressed);
        if actual.as_bytes().as_slice() != stored {
            return Err(CacheError::ChecksumMismatch {
                path: self.path.clone(),
                expected: hex::encode(stored),
                actual: actual.to_hex(),
            });
        }

        let mut raw = Vec::new();
        ZlibDecoder::new(compressed)
            .read_to_end(&mut raw)
            .map_err(CacheError::serialization)?;
        let (payload, read): (Payload, usize) =
            bincode::serde::decode_from_slice(&raw, bincode::config::standard())
                .map_err(CacheError::serialization)?;
        if read != raw.len() {
            return Err(CacheError::serialization("trailing bytes after payload"));
        }
        Ok(payload.into_state())
    }

    fn encode(&self, state: &CacheState) -> Result<Vec<u8>, CacheError> {
        let raw = bincode::serde::encode_to_vec(Payload::from_state(state), bincode::config::standard())
            .map_err(CacheError::serialization)?;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(&raw).map_err(CacheError::serialization)?;
        let compressed = encoder.finish().map_err(CacheError::serialization)?;

        let mut out = Vec::with_capacity(HEADER_LEN + CHECKSUM_LEN + compressed.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(ContentHash::from_bytes(&compressed).as_bytes());
        out.extend_from_slice(&compressed);
        Ok(out)
    }

    /// Write `state` atomically: temp sibling, fsync, rename.
    ///
    /// A crash at any point leaves either the previous cache or the new one.
    pub fn save(&self, state: &CacheState) -> Result<(), CacheError> {
        let bytes = self.encode(state)?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(CacheError::io(dir))?;
        }

        let tmp = self.temp_path();
        let written = write_synced(&tmp, &bytes).and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(err) = written {
            fs::remove_file(&tmp).ok();
            return Err(CacheError::io(&self.path)(err));
        }
        Ok(())
    }

    /// Delete the cache file. A missing file is not an error.
    pub fn remove(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(CacheError::io(&self.path)(err)),
            _ => Ok(()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::TargetKey;
    use crate::output::{FullOutput, MetaValue};
    use tempfile::TempDir;

    fn sample_state() -> CacheState {
        let mut hashes = ContentHashStore::new();
        hashes.record(FileRecord::from_read("content/a.md".into(), None, b"a"));
        hashes.record(FileRecord::from_read("templates/p.html".into(), None, b"p"));

        let graph = DependencyGraph::new();
        graph.record_edges(&"a".into(), [TargetKey::Partial("templates/p.html".into())]);
        graph.record_edges(&"c".into(), [TargetKey::taxonomy("tags", "x")]);

        let mut out = FullOutput::new("a", "content/a.md");
        out.title = "A".into();
        out.extra.insert("weight".into(), MetaValue::Float(0.5));
        let meta = out.cached_metadata();

        CacheState {
            hashes,
            graph,
            outputs: [(meta.id.clone(), meta)].into_iter().collect(),
        }
    }

    fn store(dir: &TempDir) -> CacheStore {
        CacheStore::new(dir.path().join(".kiln/build.cache"), 6)
    }

    #[test]
    fn test_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        let state = sample_state();
        cache.save(&state).unwrap();

        let loaded = cache.load().unwrap();
        assert_eq!(loaded.hashes.to_records(), state.hashes.to_records());
        assert_eq!(loaded.graph.snapshot(), state.graph.snapshot());
        assert!(loaded.graph.is_consistent());
        assert_eq!(loaded.outputs, state.outputs);
        assert!(!cache.temp_path().exists());
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        assert_eq!(cache.encode(&sample_state()).unwrap(), cache.encode(&sample_state()).unwrap());
    }

    #[test]
    fn test_missing_is_silent_miss() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        assert!(cache.load().is_none());
        assert!(cache.try_load().unwrap_err().is_missing());
        assert!(cache.remove().is_ok());
    }

    #[test]
    fn test_version_bump_is_miss() {
        let dir = TempDir::new().unwrap();
        store(&dir).save(&sample_state()).unwrap();

        let bumped = store(&dir).with_header(MagicHeader {
            format_version: header::FORMAT_VERSION + 1,
            ..MagicHeader::current()
        });
        assert!(matches!(bumped.try_load(), Err(CacheError::VersionMismatch { .. })));
        assert!(bumped.load().is_none());

        let other_engine = store(&dir).with_header(MagicHeader {
            fingerprint: [1; 32],
            ..MagicHeader::current()
        });
        assert!(matches!(
            other_engine.try_load(),
            Err(CacheError::FingerprintMismatch { .. })
        ));
    }

    #[test]
    fn test_corruption_is_miss() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        cache.save(&sample_state()).unwrap();
        let good = fs::read(cache.path()).unwrap();

        // Flipped payload byte
        let mut flipped = good.clone();
        let last = flipped.len() - 1;
        flipped[last] ^= 0xff;
        fs::write(cache.path(), &flipped).unwrap();
        assert!(matches!(cache.try_load(), Err(CacheError::ChecksumMismatch { .. })));

        // Truncated inside the checksum
        fs::write(cache.path(), &good[..HEADER_LEN + 10]).unwrap();
        assert!(cache.load().is_none());

        // Truncated inside the header
        fs::write(cache.path(), &good[..20]).unwrap();
        assert!(matches!(cache.try_load(), Err(CacheError::InvalidHeader { .. })));
    }

    #[test]
    fn test_remove() {
        let dir = TempDir::new().unwrap();
        let cache = store(&dir);
        cache.save(&CacheState::default()).unwrap();
        assert!(cache.load().is_some());
        cache.remove().unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_save_failure_reports_io() {
        let dir = TempDir::new().unwrap();
        // Parent "directory" is a regular file
        fs::write(dir.path().join("blocker"), "x").unwrap();
        let cache = CacheStore::new(dir.path().join("blocker/build.cache"), 6);
        assert!(matches!(cache.save(&CacheState::default()), Err(CacheError::Io { .. })));
    }
}
