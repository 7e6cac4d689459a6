//! Error types for cache operations.
//!
//! Loading never propagates these past [`CacheStore::load`](super::CacheStore::load):
//! every variant means "no usable cache" and degrades to a full rebuild.

use std::{io, path::PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("invalid cache header in {}: {reason}", .path.display())]
    InvalidHeader { path: PathBuf, reason: String },

    #[error("cache format version mismatch in {}: expected {expected}, got {actual}", .path.display())]
    VersionMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },

    /// Written by a different engine build or platform.
    #[error("cache written by a different engine build: {}", .path.display())]
    FingerprintMismatch { path: PathBuf },

    #[error("checksum mismatch in {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("cache serialization error: {reason}")]
    Serialization { reason: String },
}

impl CacheError {
    pub(super) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }

    pub(super) fn serialization(err: impl ToString) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }

    /// True if there simply was no cache file.
    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}
