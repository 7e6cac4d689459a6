//! File category classification for change reporting and rule dispatch.
//!
//! # File Categories
//!
//! | Category   | Invalidation                              | Example Files             |
//! |------------|-------------------------------------------|---------------------------|
//! | Config     | Full rebuild                              | `site.toml`               |
//! | Shared     | Every versioned page                      | `content/shared/*.md`     |
//! | Template   | Pages with a template/partial edge        | `templates/*.html`        |
//! | Data       | Pages with a data edge                    | `data/*.json`             |
//! | Asset      | Pages with an asset edge                  | `assets/*`                |
//! | Content    | The page itself plus cross-ref dependents | `content/**/*.md`         |
//! | Unknown    | Only through recorded edges               | anything else             |
//!
//! Paths are root-relative. Shared roots usually live inside the content
//! directory, so they are checked first.

use crate::config::BuildConfig;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileCategory {
    Config,
    Shared,
    Template,
    Data,
    Asset,
    Content,
    Unknown,
}

impl FileCategory {
    /// Get the short name for this category (used in logs)
    pub const fn name(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Shared => "shared",
            Self::Template => "templates",
            Self::Data => "data",
            Self::Asset => "assets",
            Self::Content => "content",
            Self::Unknown => "unknown",
        }
    }

    /// True if a change in this category forces a full rebuild.
    pub const fn forces_full_rebuild(self) -> bool {
        matches!(self, Self::Config)
    }
}

/// Categorize a root-relative path.
pub fn categorize_path(path: &Path, build: &BuildConfig) -> FileCategory {
    if path == build.config_file {
        FileCategory::Config
    } else if build.shared.iter().any(|root| path.starts_with(root)) {
        FileCategory::Shared
    } else if path.starts_with(&build.templates) {
        FileCategory::Template
    } else if path.starts_with(&build.data) {
        FileCategory::Data
    } else if path.starts_with(&build.assets) {
        FileCategory::Asset
    } else if path.starts_with(&build.content) {
        FileCategory::Content
    } else {
        FileCategory::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn build() -> BuildConfig {
        BuildConfig {
            shared: vec![PathBuf::from("content/shared")],
            ..BuildConfig::default()
        }
    }

    #[test]
    fn test_categorize_path() {
        let build = build();
        let cases = [
            ("site.toml", FileCategory::Config),
            ("content/shared/intro.md", FileCategory::Shared),
            ("content/posts/a.md", FileCategory::Content),
            ("templates/partials/nav.html", FileCategory::Template),
            ("data/authors.json", FileCategory::Data),
            ("assets/logo.svg", FileCategory::Asset),
            ("README.md", FileCategory::Unknown),
        ];
        for (path, expected) in cases {
            assert_eq!(categorize_path(Path::new(path), &build), expected, "{path}");
        }
    }

    #[test]
    fn test_prefix_is_component_wise() {
        // `content-old` is not under `content`
        assert_eq!(
            categorize_path(Path::new("content-old/a.md"), &build()),
            FileCategory::Unknown
        );
    }

    #[test]
    fn test_category_name() {
        assert_eq!(FileCategory::Template.name(), "templates");
        assert!(FileCategory::Config.forces_full_rebuild());
        assert!(!FileCategory::Shared.forces_full_rebuild());
    }
}
