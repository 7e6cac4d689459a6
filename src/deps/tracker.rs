//! Per-render edge collector.
//!
//! One tracker exists per render task. The renderer calls into it while it
//! executes includes, taxonomy lookups and asset references; when the task
//! finishes the collected set replaces the consumer's edges in the graph.

use super::{OutputId, TargetKey};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::path::PathBuf;

#[derive(Debug, Default)]
pub struct DependencyTracker {
    targets: Mutex<FxHashSet<TargetKey>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arbitrary target. Duplicates collapse.
    pub fn record(&self, target: TargetKey) {
        self.targets.lock().insert(target);
    }

    pub fn template(&self, path: impl Into<PathBuf>) {
        self.record(TargetKey::Template(path.into()));
    }

    pub fn partial(&self, path: impl Into<PathBuf>) {
        self.record(TargetKey::Partial(path.into()));
    }

    pub fn config_key(&self, key: impl Into<String>) {
        self.record(TargetKey::Config(key.into()));
    }

    pub fn taxonomy(&self, taxonomy: impl Into<String>, term: impl Into<String>) {
        self.record(TargetKey::taxonomy(taxonomy, term));
    }

    pub fn asset(&self, path: impl Into<PathBuf>) {
        self.record(TargetKey::Asset(path.into()));
    }

    pub fn data(&self, path: impl Into<PathBuf>) {
        self.record(TargetKey::Data(path.into()));
    }

    pub fn cross_ref(&self, version: Option<&str>, path: impl Into<PathBuf>) {
        self.record(TargetKey::cross_ref(version, path));
    }

    pub fn output(&self, id: impl Into<OutputId>) {
        self.record(TargetKey::Output(id.into()));
    }

    pub fn len(&self) -> usize {
        self.targets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_targets(self) -> FxHashSet<TargetKey> {
        self.targets.into_inner()
    }
}
