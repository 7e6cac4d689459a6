//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read engine config `{}`", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("engine config parsing error")]
    Toml(#[from] toml::de::Error),

    #[error("[{section}.{field}] {reason}")]
    Validation {
        section: &'static str,
        field: &'static str,
        reason: String,
    },
}

impl ConfigError {
    pub(super) fn invalid(section: &'static str, field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            section,
            field,
            reason: reason.into(),
        }
    }
}
