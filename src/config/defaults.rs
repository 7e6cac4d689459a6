//! Default values for configuration fields.
//!
//! These functions are used by serde for default deserialization.

pub fn r#true() -> bool {
    true
}

// ============================================================================
// [build] Section Defaults
// ============================================================================

pub mod build {
    use std::path::PathBuf;

    pub fn root() -> Option<PathBuf> {
        None
    }

    pub fn content() -> PathBuf {
        "content".into()
    }

    pub fn templates() -> PathBuf {
        "templates".into()
    }

    pub fn assets() -> PathBuf {
        "assets".into()
    }

    pub fn data() -> PathBuf {
        "data".into()
    }

    pub fn config_file() -> PathBuf {
        "site.toml".into()
    }

    pub fn shared() -> Vec<PathBuf> {
        Vec::new()
    }

    /// `0` means one worker per available core.
    pub fn workers() -> usize {
        0
    }

    pub fn max_cascade_depth() -> usize {
        16
    }
}

// ============================================================================
// [cache] Section Defaults
// ============================================================================

pub mod cache {
    use std::path::PathBuf;

    pub fn dir() -> PathBuf {
        ".kiln".into()
    }

    pub fn file() -> PathBuf {
        "build.cache".into()
    }

    pub fn compression() -> u32 {
        6
    }
}
