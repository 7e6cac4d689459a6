//! Engine configuration management for `kiln.toml`.
//!
//! # Sections
//!
//! | Section     | Purpose                                          |
//! |-------------|--------------------------------------------------|
//! | `[build]`   | Site layout, shared roots, workers, cascade bound |
//! | `[cache]`   | Build cache location and compression             |
//!
//! # Example
//!
//! ```toml
//! [build]
//! content = "content"
//! config_file = "site.toml"
//! shared = ["content/shared"]
//!
//! [cache]
//! dir = ".kiln"
//! compression = 6
//! ```

mod build;
mod cache;
pub mod defaults;
mod error;

pub use build::BuildConfig;
pub use cache::CacheConfig;
pub use error::ConfigError;

use crate::cascade::CascadePolicy;
use educe::Educe;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    num::NonZeroUsize,
    path::{Component, Path, PathBuf},
    thread,
};

/// Root configuration structure representing kiln.toml.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl EngineConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from file path.
    ///
    /// Without an explicit `[build] root`, the directory holding the file
    /// is the site root.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        let mut config = Self::from_str(&content)?;
        config.config_path = normalize_path(path);

        let parent = config.config_path.parent().map(Path::to_path_buf);
        match (config.build.root.take(), parent) {
            (Some(root), Some(parent)) if root.is_relative() => config.set_root(&parent.join(root)),
            (Some(root), _) => config.set_root(&root),
            (None, Some(parent)) => config.set_root(&parent),
            (None, None) => {}
        }
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Default configuration rooted at `root`.
    pub fn for_root(root: impl AsRef<Path>) -> Self {
        let mut config = Self::default();
        config.set_root(root.as_ref());
        config.normalize();
        config
    }

    pub fn root(&self) -> &Path {
        self.build.root.as_deref().unwrap_or(Path::new("./"))
    }

    pub fn set_root(&mut self, path: &Path) {
        self.build.root = Some(path.to_path_buf())
    }

    /// Make the root absolute and strip `./` segments from the
    /// root-relative paths, so they compare equal to detector output.
    pub fn normalize(&mut self) {
        let root = normalize_path(self.root());
        self.set_root(&root);

        let build = &mut self.build;
        for dir in [
            &mut build.content,
            &mut build.templates,
            &mut build.assets,
            &mut build.data,
            &mut build.config_file,
        ] {
            *dir = clean_relative(dir);
        }
        for shared in &mut build.shared {
            *shared = clean_relative(shared);
        }
        self.cache.dir = clean_relative(&self.cache.dir);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let build = &self.build;
        let relative = [
            ("content", &build.content),
            ("templates", &build.templates),
            ("assets", &build.assets),
            ("data", &build.data),
            ("config_file", &build.config_file),
        ];
        for (field, path) in relative {
            if !is_inside_root(path) {
                return Err(ConfigError::invalid(
                    "build",
                    field,
                    format!("`{}` must be a path inside the site root", path.display()),
                ));
            }
        }
        if let Some(shared) = build.shared.iter().find(|p| !is_inside_root(p) || p.as_os_str().is_empty()) {
            return Err(ConfigError::invalid(
                "build",
                "shared",
                format!("`{}` must be a directory inside the site root", shared.display()),
            ));
        }
        if build.max_cascade_depth == 0 {
            return Err(ConfigError::invalid("build", "max_cascade_depth", "must be at least 1"));
        }
        if self.cache.compression > 9 {
            return Err(ConfigError::invalid(
                "cache",
                "compression",
                format!("must be between 0 and 9, got {}", self.cache.compression),
            ));
        }
        if self.cache.file.as_os_str().is_empty() || self.cache.file.components().count() != 1 {
            return Err(ConfigError::invalid("cache", "file", "must be a plain file name"));
        }
        if !is_inside_root(&self.cache.dir) {
            return Err(ConfigError::invalid("cache", "dir", "must be a path inside the site root"));
        }
        Ok(())
    }

    /// Absolute path of the cache file.
    pub fn cache_path(&self) -> PathBuf {
        self.root().join(&self.cache.dir).join(&self.cache.file)
    }

    /// Resolved render worker count.
    pub fn worker_count(&self) -> usize {
        match self.build.workers {
            0 => thread::available_parallelism().map_or(1, NonZeroUsize::get),
            n => n,
        }
    }

    pub fn cascade_policy(&self) -> CascadePolicy {
        CascadePolicy {
            shared_roots: self.build.shared.clone(),
            config_file: self.build.config_file.clone(),
            max_depth: self.build.max_cascade_depth,
        }
    }
}

/// Normalize a path to absolute, using canonicalize if the path exists
fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    })
}

/// Drop `.` components and trailing separators.
fn clean_relative(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

fn is_inside_root(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
