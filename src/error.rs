//! Engine-level error types.
//!
//! Most failures in the engine are *recovered*, not returned: a corrupt cache
//! degrades to a full rebuild, a failing page is recorded in the build report.
//! The types here cover what does surface to callers.

use crate::{config::ConfigError, deps::OutputId};
use std::{io, path::PathBuf};
use thiserror::Error;

/// Failure to materialize a proxied output on first access.
///
/// Cloneable because the outcome is memoized: every later access of a lazy
/// field on the same proxy observes the same error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaterializeError {
    #[error("source `{}` of `{id}` vanished before it could be materialized", .path.display())]
    SourceVanished { id: OutputId, path: PathBuf },

    #[error("render backend dropped before `{id}` was materialized")]
    BackendGone { id: OutputId },

    #[error("failed to materialize `{id}`: {reason}")]
    Failed { id: OutputId, reason: String },
}

/// Errors constructing an orchestrator.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid engine configuration")]
    Config(#[from] ConfigError),

    #[error("failed to start render worker pool")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// True if any cause in the chain is an `io::ErrorKind::NotFound`.
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .is_some_and(|e| e.kind() == io::ErrorKind::NotFound)
    })
}
