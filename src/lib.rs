//! Kiln - an incremental build engine for static site generators.
//!
//! Between builds the engine keeps a content hash per tracked file, a
//! dependency graph from outputs to what they read, and cached metadata per
//! output. A build detects what changed, expands that through the graph to
//! the outputs that must be re-rendered, renders those in parallel, and
//! serves every other output as a lazy proxy over its cached metadata.
//!
//! ```ignore
//! let config = EngineConfig::from_path(Path::new("kiln.toml"))?;
//! let engine = Orchestrator::new(config, Arc::new(MyRenderer))?;
//! let build = engine.build(&discover()?);
//! generator::write_sitemap(&build.outputs, "https://example.com", Path::new("public/sitemap.xml"))?;
//! ```

pub mod logger;

pub mod build;
pub mod cache;
pub mod cascade;
pub mod config;
pub mod deps;
pub mod detect;
pub mod error;
pub mod generator;
pub mod output;
pub mod render;
pub mod store;
pub mod utils;

#[cfg(test)]
mod testing;

pub use build::{Build, BuildPhase, BuildReport, FailedOutput, Orchestrator};
pub use cache::{CacheState, CacheStore};
pub use cascade::{CascadePolicy, CascadeResolver, RebuildPlan};
pub use config::EngineConfig;
pub use deps::{DependencyGraph, DependencyTracker, OutputId, TargetKey, TargetKind};
pub use detect::{ChangeDetector, ChangeSet};
pub use error::{BuildError, MaterializeError};
pub use output::{CachedMetadata, Field, FieldValue, FullOutput, Output, OutputProxy, OutputSet, OutputView};
pub use render::{RenderContext, Renderer, SourceEntry, StaticMeta};
pub use store::{ContentHash, ContentHashStore, FileRecord};
