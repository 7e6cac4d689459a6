//! `[cache]` section configuration.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[cache]` section in kiln.toml.
///
/// # Example
/// ```toml
/// [cache]
/// enable = true
/// dir = ".kiln"
/// file = "build.cache"
/// compression = 6
/// ```
///
/// With `enable = false` every build is a full rebuild and nothing is
/// persisted.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub enable: bool,

    /// Cache directory, relative to the site root.
    #[serde(default = "defaults::cache::dir")]
    #[educe(Default = defaults::cache::dir())]
    pub dir: PathBuf,

    /// Cache file name inside `dir`.
    #[serde(default = "defaults::cache::file")]
    #[educe(Default = defaults::cache::file())]
    pub file: PathBuf,

    /// zlib level, 0 (store) to 9 (best).
    #[serde(default = "defaults::cache::compression")]
    #[educe(Default = defaults::cache::compression())]
    pub compression: u32,
}
