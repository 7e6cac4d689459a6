//! Fixed-size header at the start of the cache file.
//!
//! ```text
//! offset  size  field
//! 0       8     magic  b"KILNCACH"
//! 8       4     format version (u32 LE)
//! 12      32    engine fingerprint
//! ```

use super::CacheError;
use std::path::Path;

pub const MAGIC: [u8; 8] = *b"KILNCACH";

/// Increment on any change to the header, payload layout or codec.
pub const FORMAT_VERSION: u32 = 1;

pub const HEADER_LEN: usize = MAGIC.len() + 4 + 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicHeader {
    pub format_version: u32,
    pub fingerprint: [u8; 32],
}

impl MagicHeader {
    /// Header for caches written by this engine build.
    pub fn current() -> Self {
        Self {
            format_version: FORMAT_VERSION,
            fingerprint: engine_fingerprint(),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..8].copy_from_slice(&MAGIC);
        out[8..12].copy_from_slice(&self.format_version.to_le_bytes());
        out[12..].copy_from_slice(&self.fingerprint);
        out
    }

    /// Parse the header at the start of `bytes`. Only the magic is checked.
    pub fn parse(bytes: &[u8], path: &Path) -> Result<Self, CacheError> {
        let invalid = |reason: &str| CacheError::InvalidHeader {
            path: path.to_path_buf(),
            reason: reason.to_owned(),
        };
        let header = bytes.get(..HEADER_LEN).ok_or_else(|| invalid("file too short"))?;
        if header[..8] != MAGIC {
            return Err(invalid("missing magic bytes"));
        }

        let mut version = [0u8; 4];
        version.copy_from_slice(&header[8..12]);
        let mut fingerprint = [0u8; 32];
        fingerprint.copy_from_slice(&header[12..]);
        Ok(Self {
            format_version: u32::from_le_bytes(version),
            fingerprint,
        })
    }

    /// Check a parsed header against the expected one.
    pub fn validate(&self, expected: &Self, path: &Path) -> Result<(), CacheError> {
        if self.format_version != expected.format_version {
            return Err(CacheError::VersionMismatch {
                path: path.to_path_buf(),
                expected: expected.format_version,
                actual: self.format_version,
            });
        }
        if self.fingerprint != expected.fingerprint {
            return Err(CacheError::FingerprintMismatch {
                path: path.to_path_buf(),
            });
        }
        Ok(())
    }
}

/// BLAKE3 over everything that changes the meaning of cached bytes.
fn engine_fingerprint() -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(env!("CARGO_PKG_NAME").as_bytes());
    hasher.update(&[0]);
    hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
    hasher.update(&[0]);
    hasher.update(std::env::consts::ARCH.as_bytes());
    hasher.update(&[0]);
    hasher.update(std::env::consts::OS.as_bytes());
    hasher.update(&usize::BITS.to_le_bytes());
    hasher.update(&FORMAT_VERSION.to_le_bytes());
    *hasher.finalize().as_bytes()
}
