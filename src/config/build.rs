//! `[build]` section configuration.
//!
//! Site layout and build-engine tuning. Every directory is relative to
//! `root`, matching the root-relative paths used in cache records and
//! dependency keys.

use super::defaults;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// `[build]` section in kiln.toml.
///
/// # Example
/// ```toml
/// [build]
/// content = "content"
/// templates = "templates"
/// shared = ["content/shared"]   # edits here rebuild every versioned page
/// workers = 0                   # one per core
/// max_cascade_depth = 16
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Site root directory. Defaults to the directory holding kiln.toml.
    #[serde(default = "defaults::build::root")]
    #[educe(Default = defaults::build::root())]
    pub root: Option<PathBuf>,

    /// Content source directory.
    #[serde(default = "defaults::build::content")]
    #[educe(Default = defaults::build::content())]
    pub content: PathBuf,

    /// Template and partial directory.
    #[serde(default = "defaults::build::templates")]
    #[educe(Default = defaults::build::templates())]
    pub templates: PathBuf,

    /// Static assets directory.
    #[serde(default = "defaults::build::assets")]
    #[educe(Default = defaults::build::assets())]
    pub assets: PathBuf,

    /// Data files (JSON/TOML/YAML) readable from templates.
    #[serde(default = "defaults::build::data")]
    #[educe(Default = defaults::build::data())]
    pub data: PathBuf,

    /// The site configuration file. Any change to it forces a full rebuild.
    #[serde(default = "defaults::build::config_file")]
    #[educe(Default = defaults::build::config_file())]
    pub config_file: PathBuf,

    /// Roots of content shared across every content version.
    #[serde(default = "defaults::build::shared")]
    #[educe(Default = defaults::build::shared())]
    pub shared: Vec<PathBuf>,

    /// Render worker count (`0` = available parallelism).
    #[serde(default = "defaults::build::workers")]
    #[educe(Default = defaults::build::workers())]
    pub workers: usize,

    /// Bound on transitive cascade expansion.
    #[serde(default = "defaults::build::max_cascade_depth")]
    #[educe(Default = defaults::build::max_cascade_depth())]
    pub max_cascade_depth: usize,

    /// Show a progress bar while rendering.
    #[serde(default = "defaults::r#true")]
    #[educe(Default = true)]
    pub progress: bool,
}
