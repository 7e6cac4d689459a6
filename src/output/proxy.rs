//! Lazy stand-in for an output that was not rebuilt.
//!
//! A proxy answers every cached field from [`CachedMetadata`] without
//! touching disk. The first access to a field that needs the full render
//! (`body`, `links`) runs the loader once; the result, success or failure,
//! is memoized for the rest of the build.

use super::{CachedMetadata, FullOutput};
use crate::{
    error::{MaterializeError, is_not_found},
    render::{Renderer, SourceEntry},
};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{OnceLock, Weak},
};

/// Produces the full output on demand.
pub type Loader = Box<dyn Fn() -> Result<FullOutput, MaterializeError> + Send + Sync>;

pub struct OutputProxy {
    meta: CachedMetadata,
    loader: Loader,
    materialized: OnceLock<Result<FullOutput, MaterializeError>>,
}

impl OutputProxy {
    pub fn new(meta: CachedMetadata, loader: Loader) -> Self {
        Self {
            meta,
            loader,
            materialized: OnceLock::new(),
        }
    }

    /// Proxy backed by `renderer`.
    ///
    /// Holds only a weak reference, so a proxy that outlives the build never
    /// keeps the render backend alive. Identity fields are taken from the
    /// discovery entry, which wins over whatever was cached.
    pub fn from_renderer(
        mut meta: CachedMetadata,
        entry: SourceEntry,
        root: PathBuf,
        renderer: Weak<dyn Renderer>,
    ) -> Self {
        meta.id = entry.output.clone();
        meta.source = entry.source.clone();

        let loader: Loader = Box::new(move || {
            let Some(renderer) = renderer.upgrade() else {
                return Err(MaterializeError::BackendGone {
                    id: entry.output.clone(),
                });
            };
            renderer.load(&entry, &root).map_err(|err| {
                if is_not_found(&err) && !root.join(&entry.source).exists() {
                    MaterializeError::SourceVanished {
                        id: entry.output.clone(),
                        path: entry.source.clone(),
                    }
                } else {
                    MaterializeError::Failed {
                        id: entry.output.clone(),
                        reason: format!("{err:#}"),
                    }
                }
            })
        });
        Self::new(meta, loader)
    }

    pub fn meta(&self) -> &CachedMetadata {
        &self.meta
    }

    pub fn source(&self) -> &Path {
        &self.meta.source
    }

    /// The full output, loading it on first call.
    pub fn full(&self) -> Result<&FullOutput, MaterializeError> {
        self.materialized
            .get_or_init(|| (self.loader)())
            .as_ref()
            .map_err(Clone::clone)
    }

    /// True once a load has succeeded.
    pub fn is_materialized(&self) -> bool {
        matches!(self.materialized.get(), Some(Ok(_)))
    }

    /// The memoized load failure, if the load was attempted and failed.
    pub fn load_error(&self) -> Option<&MaterializeError> {
        self.materialized.get().and_then(|r| r.as_ref().err())
    }
}

impl fmt::Debug for OutputProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputProxy")
            .field("id", &self.meta.id)
            .field("source", &self.meta.source)
            .field("materialized", &self.is_materialized())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn meta() -> CachedMetadata {
        let mut out = FullOutput::new("a", "content/a.md");
        out.title = "Cached".into();
        out.cached_metadata()
    }

    #[test]
    fn test_loader_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let proxy = OutputProxy::new(
            meta(),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut out = FullOutput::new("a", "content/a.md");
                out.body = "<p>hi</p>".into();
                Ok(out)
            }),
        );

        assert!(!proxy.is_materialized());
        assert_eq!(proxy.meta().title, "Cached");
        assert_eq!(calls.load(Ordering::SeqCst), 0, "construction never loads");

        assert_eq!(proxy.full().unwrap().body, "<p>hi</p>");
        assert_eq!(proxy.full().unwrap().body, "<p>hi</p>");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(proxy.is_materialized());
    }

    #[test]
    fn test_failure_is_memoized() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let proxy = OutputProxy::new(
            meta(),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(MaterializeError::Failed {
                    id: "a".into(),
                    reason: "boom".into(),
                })
            }),
        );

        let first = proxy.full().unwrap_err();
        let second = proxy.full().unwrap_err();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!proxy.is_materialized());
        assert!(proxy.load_error().is_some());
    }
}
