//! Dependency graph from generated outputs back to their inputs.
//!
//! Edges are a byproduct of rendering: while a page renders, the renderer
//! reports every template, partial, config key, taxonomy term, asset and
//! cross-document reference it touched through a [`DependencyTracker`].
//!
//! # Indexes
//!
//! ```text
//! forward:  OutputId  ──► {TargetKey}     (authoritative, persisted)
//! inverse:  TargetKey ──► {OutputId}      (derived cache for "who depends on X")
//! ```
//!
//! The inverse index is always derivable from the forward index. Only the
//! forward index is persisted; the inverse is rebuilt on load.
//!
//! # Concurrency
//!
//! [`DependencyGraph::record_edges`] takes `&self` and may be called from
//! parallel render workers as long as each worker records a different
//! consumer. Both indexes are lock-sharded.

mod sharded;
pub mod tracker;

pub use tracker::DependencyTracker;

use compact_str::CompactString;
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use sharded::Sharded;
use std::{
    collections::BTreeSet,
    fmt,
    path::{Path, PathBuf},
};

// ============================================================================
// Identities
// ============================================================================

/// Identity of one generated output (a page or other generated artifact).
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputId(CompactString);

impl OutputId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(CompactString::new(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OutputId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for OutputId {
    fn from(s: String) -> Self {
        Self(CompactString::from(s))
    }
}

impl fmt::Display for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0.as_str())
    }
}

/// Which invalidation rule applies to a target key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetKind {
    Template,
    Partial,
    Config,
    Taxonomy,
    Asset,
    Data,
    CrossRef,
    Output,
}

impl TargetKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Partial => "partial",
            Self::Config => "config",
            Self::Taxonomy => "taxonomy",
            Self::Asset => "asset",
            Self::Data => "data",
            Self::CrossRef => "xref",
            Self::Output => "output",
        }
    }

    /// Kinds whose key names a file on disk.
    pub const fn is_file(self) -> bool {
        matches!(
            self,
            Self::Template | Self::Partial | Self::Asset | Self::Data | Self::CrossRef
        )
    }
}

/// Logical identity of something an output depends on.
///
/// Paths are relative to the site root, the same form the change detector
/// reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TargetKey {
    Template(PathBuf),
    Partial(PathBuf),
    Config(String),
    Taxonomy { taxonomy: String, term: String },
    Asset(PathBuf),
    Data(PathBuf),
    /// Reference to another document, possibly in another content version.
    CrossRef { version: Option<String>, path: PathBuf },
    /// Another generated output (e.g. a feed embedding a page).
    Output(OutputId),
}

impl TargetKey {
    pub fn taxonomy(taxonomy: impl Into<String>, term: impl Into<String>) -> Self {
        Self::Taxonomy {
            taxonomy: taxonomy.into(),
            term: term.into(),
        }
    }

    pub fn cross_ref(version: Option<&str>, path: impl Into<PathBuf>) -> Self {
        Self::CrossRef {
            version: version.map(str::to_owned),
            path: path.into(),
        }
    }

    pub const fn kind(&self) -> TargetKind {
        match self {
            Self::Template(_) => TargetKind::Template,
            Self::Partial(_) => TargetKind::Partial,
            Self::Config(_) => TargetKind::Config,
            Self::Taxonomy { .. } => TargetKind::Taxonomy,
            Self::Asset(_) => TargetKind::Asset,
            Self::Data(_) => TargetKind::Data,
            Self::CrossRef { .. } => TargetKind::CrossRef,
            Self::Output(_) => TargetKind::Output,
        }
    }

    /// File on disk backing this key, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Template(p) | Self::Partial(p) | Self::Asset(p) | Self::Data(p) => Some(p),
            Self::CrossRef { path, .. } => Some(path),
            Self::Config(_) | Self::Taxonomy { .. } | Self::Output(_) => None,
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind().name();
        match self {
            Self::Config(key) => write!(f, "{kind}:{key}"),
            Self::Taxonomy { taxonomy, term } => write!(f, "{kind}:{taxonomy}/{term}"),
            Self::CrossRef {
                version: Some(v),
                path,
            } => write!(f, "{kind}:{v}@{}", path.display()),
            Self::Output(id) => write!(f, "{kind}:{id}"),
            _ => write!(f, "{kind}:{}", self.path().unwrap_or(Path::new("")).display()),
        }
    }
}

/// One `(consumer, target)` dependency. The kind is carried by the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DependencyEdge {
    pub consumer: OutputId,
    pub target: TargetKey,
}

impl DependencyEdge {
    pub const fn kind(&self) -> TargetKind {
        self.target.kind()
    }
}

/// Persisted form: each consumer with its sorted targets.
pub type GraphSnapshot = Vec<(OutputId, Vec<TargetKey>)>;

// ============================================================================
// Graph
// ============================================================================

#[derive(Default)]
pub struct DependencyGraph {
    forward: Sharded<OutputId, FxHashSet<TargetKey>>,
    inverse: Sharded<TargetKey, FxHashSet<OutputId>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace every edge of `consumer`.
    ///
    /// Edges are never merged: a target the consumer no longer touches
    /// disappears from both indexes. Concurrent calls for the *same*
    /// consumer are a caller error.
    pub fn record_edges(&self, consumer: &OutputId, targets: impl IntoIterator<Item = TargetKey>) {
        let fresh: FxHashSet<TargetKey> = targets.into_iter().collect();
        let stale = self
            .forward
            .write(consumer, |map| map.insert(consumer.clone(), fresh.clone()))
            .unwrap_or_default();

        for target in stale.difference(&fresh) {
            self.unlink(target, consumer);
        }
        for target in fresh.difference(&stale) {
            self.inverse.write(target, |map| {
                map.entry(target.clone()).or_default().insert(consumer.clone());
            });
        }
    }

    /// Every consumer that recorded an edge to `target`.
    pub fn dependents_of(&self, target: &TargetKey) -> BTreeSet<OutputId> {
        self.inverse.read(target, |map| {
            map.get(target)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        })
    }

    /// Strip all edges of `consumer` from both indexes.
    ///
    /// Returns `false` if the consumer was unknown.
    pub fn remove_consumer(&self, consumer: &OutputId) -> bool {
        let Some(targets) = self.forward.write(consumer, |map| map.remove(consumer)) else {
            return false;
        };
        for target in &targets {
            self.unlink(target, consumer);
        }
        true
    }

    fn unlink(&self, target: &TargetKey, consumer: &OutputId) {
        self.inverse.write(target, |map| {
            if let Some(set) = map.get_mut(target) {
                set.remove(consumer);
                if set.is_empty() {
                    map.remove(target);
                }
            }
        });
    }

    /// Edges currently recorded for `consumer`, sorted.
    pub fn edges_of(&self, consumer: &OutputId) -> Vec<DependencyEdge> {
        let mut edges: Vec<_> = self.forward.read(consumer, |map| {
            map.get(consumer)
                .into_iter()
                .flatten()
                .map(|target| DependencyEdge {
                    consumer: consumer.clone(),
                    target: target.clone(),
                })
                .collect()
        });
        edges.sort();
        edges
    }

    pub fn contains_consumer(&self, consumer: &OutputId) -> bool {
        self.forward.read(consumer, |map| map.contains_key(consumer))
    }

    /// Every consumer with a recorded edge set, sorted.
    pub fn consumers(&self) -> Vec<OutputId> {
        let mut ids = Vec::with_capacity(self.len());
        self.forward.for_each(|consumer, _| ids.push(consumer.clone()));
        ids.sort();
        ids
    }

    /// Number of consumers with a recorded edge set (possibly empty).
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn edge_count(&self) -> usize {
        let mut count = 0;
        self.forward.for_each(|_, targets| count += targets.len());
        count
    }

    /// Every file path some edge points at, whether or not it exists.
    pub fn target_paths(&self) -> BTreeSet<PathBuf> {
        let mut paths = BTreeSet::new();
        self.inverse.for_each(|target, _| {
            if let Some(path) = target.path() {
                paths.insert(path.to_path_buf());
            }
        });
        paths
    }

    pub fn clear(&self) {
        self.forward.clear();
        self.inverse.clear();
    }

    /// Sorted forward index for persistence.
    pub fn snapshot(&self) -> GraphSnapshot {
        let mut entries = Vec::with_capacity(self.len());
        self.forward.for_each(|consumer, targets| {
            let mut targets: Vec<_> = targets.iter().cloned().collect();
            targets.sort();
            entries.push((consumer.clone(), targets));
        });
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Rebuild both indexes from a persisted forward index.
    pub fn from_snapshot(snapshot: GraphSnapshot) -> Self {
        let graph = Self::new();
        for (consumer, targets) in snapshot {
            graph.record_edges(&consumer, targets);
        }
        graph
    }

    /// Check that the inverse index is exactly the inversion of the forward one.
    pub fn is_consistent(&self) -> bool {
        let mut ok = true;
        let mut forward_edges = 0;
        self.forward.for_each(|consumer, targets| {
            forward_edges += targets.len();
            for target in targets {
                ok &= self.dependents_of(target).contains(consumer);
            }
        });
        let mut inverse_edges = 0;
        self.inverse.for_each(|_, consumers| inverse_edges += consumers.len());
        ok && forward_edges == inverse_edges
    }
}

impl fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("consumers", &self.len())
            .field("edges", &self.edge_count())
            .finish()
    }
}
