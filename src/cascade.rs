//! Rebuild planning: from a change set to the outputs that must re-render.
//!
//! The resolver applies an ordered list of rules. Each rule only ever adds
//! to the plan, so the result is the union of what every rule asks for.
//!
//! | # | Rule       | Trigger                          | Effect                                   |
//! |---|------------|----------------------------------|------------------------------------------|
//! | 1 | config     | site config changed              | full rebuild                             |
//! | 2 | shared     | path under a shared root         | every versioned output into `cascaded`   |
//! | 3 | direct     | source changed, or never built   | output into `direct`                     |
//! | 4 | dependency | changed/deleted path or taxonomy | dependents (transitively) into `cascaded`|
//! | 5 | deletion   | source gone, or not discovered   | output into `removed`, edges stripped    |
//!
//! Rules 2-4 are skipped once a full rebuild is planned. Deletion always
//! runs: a full rebuild still has to drop outputs that no longer exist.
//! A dependency walk that reaches `max_depth` with unplanned dependents left
//! turns the plan into a full rebuild.

use crate::{
    config::defaults,
    deps::{DependencyGraph, OutputId, TargetKey},
    detect::ChangeSet,
    output::{CachedMetadata, Taxonomies},
    render::SourceEntry,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use smallvec::SmallVec;
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

// ============================================================================
// Plan
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildPlan {
    /// Outputs whose own source changed or that were never built.
    pub direct: BTreeSet<OutputId>,
    /// Outputs reached through dependencies. Disjoint from `direct`.
    pub cascaded: BTreeSet<OutputId>,
    /// Outputs to drop. Never rendered.
    pub removed: BTreeSet<OutputId>,
    /// Rebuild every discovered output; `direct` and `cascaded` are moot.
    pub full_rebuild: bool,
    /// Why a full rebuild was planned.
    pub reasons: Vec<String>,
    pub warnings: Vec<String>,
}

impl RebuildPlan {
    pub fn full(reason: impl Into<String>) -> Self {
        Self {
            full_rebuild: true,
            reasons: vec![reason.into()],
            ..Self::default()
        }
    }

    /// True if the plan renders and removes nothing.
    pub fn is_empty(&self) -> bool {
        !self.full_rebuild && self.direct.is_empty() && self.cascaded.is_empty() && self.removed.is_empty()
    }

    pub fn needs_render(&self, id: &OutputId) -> bool {
        !self.removed.contains(id)
            && (self.full_rebuild || self.direct.contains(id) || self.cascaded.contains(id))
    }

    fn contains(&self, id: &OutputId) -> bool {
        self.direct.contains(id) || self.cascaded.contains(id)
    }

    fn force_full(&mut self, reason: String) {
        self.full_rebuild = true;
        self.reasons.push(reason);
    }
}

// ============================================================================
// Policy
// ============================================================================

#[derive(Debug, Clone)]
pub struct CascadePolicy {
    /// Roots whose content every versioned output embeds.
    pub shared_roots: Vec<PathBuf>,
    /// Changes here force a full rebuild.
    pub config_file: PathBuf,
    /// Bound on transitive expansion through generated outputs.
    pub max_depth: usize,
}

impl Default for CascadePolicy {
    fn default() -> Self {
        Self {
            shared_roots: defaults::build::shared(),
            config_file: defaults::build::config_file(),
            max_depth: defaults::build::max_cascade_depth(),
        }
    }
}

impl CascadePolicy {
    pub fn is_shared(&self, path: &Path) -> bool {
        self.shared_roots.iter().any(|root| path.starts_with(root))
    }
}

// ============================================================================
// Resolver
// ============================================================================

struct Rule {
    name: &'static str,
    /// Skipped once a full rebuild is planned.
    additive: bool,
    apply: fn(&CascadeResolver<'_>, &ChangeSet, &DependencyGraph, &mut RebuildPlan),
}

const RULES: &[Rule] = &[
    Rule { name: "config", additive: true, apply: config_rule },
    Rule { name: "shared", additive: true, apply: shared_rule },
    Rule { name: "direct", additive: true, apply: direct_rule },
    Rule { name: "dependency", additive: true, apply: dependency_rule },
    Rule { name: "deletion", additive: false, apply: deletion_rule },
];

/// Names of the rules in application order.
pub fn rule_names() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|rule| rule.name)
}

pub struct CascadeResolver<'a> {
    policy: &'a CascadePolicy,
    entries: &'a [SourceEntry],
    previous: &'a FxHashMap<OutputId, CachedMetadata>,
    by_source: FxHashMap<&'a Path, SmallVec<[&'a SourceEntry; 1]>>,
    previous_by_source: FxHashMap<&'a Path, SmallVec<[&'a CachedMetadata; 1]>>,
}

impl<'a> CascadeResolver<'a> {
    /// `previous` is the cached metadata of the last successful build.
    pub fn new(
        policy: &'a CascadePolicy,
        entries: &'a [SourceEntry],
        previous: &'a FxHashMap<OutputId, CachedMetadata>,
    ) -> Self {
        let mut by_source: FxHashMap<_, SmallVec<_>> = FxHashMap::default();
        for entry in entries {
            by_source.entry(entry.source.as_path()).or_default().push(entry);
        }
        let mut previous_by_source: FxHashMap<_, SmallVec<_>> = FxHashMap::default();
        for meta in previous.values() {
            previous_by_source.entry(meta.source.as_path()).or_default().push(meta);
        }
        Self {
            policy,
            entries,
            previous,
            by_source,
            previous_by_source,
        }
    }

    /// Apply every rule in order.
    ///
    /// The deletion rule strips removed consumers from `graph`.
    pub fn resolve(&self, changes: &ChangeSet, graph: &DependencyGraph) -> RebuildPlan {
        let mut plan = RebuildPlan::default();
        for rule in RULES {
            if rule.additive && plan.full_rebuild {
                continue;
            }
            (rule.apply)(self, changes, graph, &mut plan);
        }
        Self::finalize(plan)
    }

    /// Removed outputs leave both render sets; `cascaded` loses `direct`.
    fn finalize(mut plan: RebuildPlan) -> RebuildPlan {
        let RebuildPlan {
            direct,
            cascaded,
            removed,
            ..
        } = &mut plan;
        direct.retain(|id| !removed.contains(id));
        cascaded.retain(|id| !removed.contains(id) && !direct.contains(id));
        plan
    }

    fn entries_of(&self, path: &Path) -> impl Iterator<Item = &'a SourceEntry> + '_ {
        self.by_source.get(path).into_iter().flatten().copied()
    }

    fn previous_of(&self, path: &Path) -> impl Iterator<Item = &'a CachedMetadata> + '_ {
        self.previous_by_source.get(path).into_iter().flatten().copied()
    }

    /// Every key that names `path` as a file.
    fn path_keys(&self, path: &Path) -> SmallVec<[TargetKey; 8]> {
        let mut keys: SmallVec<[TargetKey; 8]> = SmallVec::new();
        keys.push(TargetKey::Template(path.to_path_buf()));
        keys.push(TargetKey::Partial(path.to_path_buf()));
        keys.push(TargetKey::Asset(path.to_path_buf()));
        keys.push(TargetKey::Data(path.to_path_buf()));
        keys.push(TargetKey::cross_ref(None, path));

        let versions = self
            .entries_of(path)
            .filter_map(|entry| entry.meta.version.as_deref())
            .chain(self.previous_of(path).filter_map(|meta| meta.version.as_deref()));
        for version in versions {
            let key = TargetKey::cross_ref(Some(version), path);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    /// Keys through which other outputs depend on output `id`.
    fn output_keys(&self, id: &OutputId) -> SmallVec<[TargetKey; 4]> {
        let mut keys: SmallVec<[TargetKey; 4]> = SmallVec::new();
        keys.push(TargetKey::Output(id.clone()));
        if let Some(meta) = self.previous.get(id) {
            keys.push(TargetKey::cross_ref(None, &meta.source));
            if let Some(version) = &meta.version {
                keys.push(TargetKey::cross_ref(Some(version), &meta.source));
            }
        }
        keys
    }
}

// ============================================================================
// Rules
// ============================================================================

fn config_rule(r: &CascadeResolver<'_>, changes: &ChangeSet, _: &DependencyGraph, plan: &mut RebuildPlan) {
    if changes.config_changed {
        plan.force_full(format!(
            "site config `{}` changed",
            r.policy.config_file.display()
        ));
    }
}

/// Coarse by convention: shared content has no per-page edges.
fn shared_rule(r: &CascadeResolver<'_>, changes: &ChangeSet, _: &DependencyGraph, plan: &mut RebuildPlan) {
    if !changes.paths().any(|path| r.policy.is_shared(path)) {
        return;
    }
    plan.cascaded.extend(
        r.entries
            .iter()
            .filter(|entry| entry.is_versioned())
            .map(|entry| entry.output.clone()),
    );
}

fn direct_rule(r: &CascadeResolver<'_>, changes: &ChangeSet, _: &DependencyGraph, plan: &mut RebuildPlan) {
    for path in &changes.changed {
        for entry in r.entries_of(path) {
            plan.direct.insert(entry.output.clone());
        }
    }
    // Never built, or built from a different source
    for entry in r.entries {
        let stale = r
            .previous
            .get(&entry.output)
            .is_none_or(|meta| meta.source != entry.source);
        if stale {
            plan.direct.insert(entry.output.clone());
        }
    }
}

fn dependency_rule(r: &CascadeResolver<'_>, changes: &ChangeSet, graph: &DependencyGraph, plan: &mut RebuildPlan) {
    let mut frontier: BTreeSet<TargetKey> = BTreeSet::new();
    for path in changes.paths() {
        frontier.extend(r.path_keys(path));
        for meta in r.previous_of(path) {
            frontier.extend(taxonomy_keys(&meta.taxonomies));
        }
    }
    for id in plan.direct.iter().chain(&plan.cascaded) {
        frontier.extend(r.output_keys(id));
        if let Some(meta) = r.previous.get(id) {
            frontier.extend(taxonomy_keys(&meta.taxonomies));
        }
    }
    for entry in r.entries.iter().filter(|e| plan.direct.contains(&e.output)) {
        frontier.extend(taxonomy_keys(&entry.meta.taxonomies));
    }

    let mut visited: FxHashSet<TargetKey> = FxHashSet::default();
    let mut depth = 0;
    while !frontier.is_empty() {
        if depth == r.policy.max_depth {
            let cut_off = frontier.iter().filter(|key| !visited.contains(key)).any(|key| {
                graph
                    .dependents_of(key)
                    .iter()
                    .any(|id| !plan.contains(id))
            });
            if cut_off {
                plan.warnings.push(format!(
                    "cascade stopped at depth {depth} with {} unexpanded keys",
                    frontier.len()
                ));
                plan.force_full(format!("cascade exceeded depth {depth}"));
            }
            break;
        }
        let mut next = BTreeSet::new();
        for key in frontier {
            if !visited.insert(key.clone()) {
                continue;
            }
            for id in graph.dependents_of(&key) {
                if plan.contains(&id) {
                    continue;
                }
                next.extend(r.output_keys(&id));
                plan.cascaded.insert(id);
            }
        }
        next.retain(|key| !visited.contains(key));
        frontier = next;
        depth += 1;
    }
}

fn deletion_rule(r: &CascadeResolver<'_>, changes: &ChangeSet, graph: &DependencyGraph, plan: &mut RebuildPlan) {
    for path in &changes.deleted {
        plan.removed.extend(r.previous_of(path).map(|meta| meta.id.clone()));
        plan.removed.extend(r.entries_of(path).map(|entry| entry.output.clone()));
    }

    let discovered: FxHashSet<&OutputId> = r.entries.iter().map(|e| &e.output).collect();
    plan.removed.extend(
        r.previous
            .keys()
            .filter(|id| !discovered.contains(id))
            .cloned(),
    );
    plan.removed.extend(
        graph
            .consumers()
            .into_iter()
            .filter(|id| !discovered.contains(id)),
    );

    for id in &plan.removed {
        graph.remove_consumer(id);
    }
}

fn taxonomy_keys(taxonomies: &Taxonomies) -> impl Iterator<Item = TargetKey> + '_ {
    taxonomies
        .iter()
        .flat_map(|(taxonomy, terms)| terms.iter().map(move |term| TargetKey::taxonomy(taxonomy, term)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::FullOutput;

    fn meta(id: &str, source: &str, tags: &[&str], version: Option<&str>) -> CachedMetadata {
        let mut out = FullOutput::new(id, source);
        if !tags.is_empty() {
            out.taxonomies.insert("tags".into(), tags.iter().map(|t| t.to_string()).collect());
        }
        out.version = version.map(str::to_owned);
        out.cached_metadata()
    }

    fn ids(names: &[&str]) -> BTreeSet<OutputId> {
        names.iter().map(|n| OutputId::from(*n)).collect()
    }

    fn changed(paths: &[&str]) -> ChangeSet {
        ChangeSet {
            changed: paths.iter().map(PathBuf::from).collect(),
            ..ChangeSet::default()
        }
    }

    /// A includes partial P, B standalone, C lists tag x, all previously built.
    struct Site {
        entries: Vec<SourceEntry>,
        previous: FxHashMap<OutputId, CachedMetadata>,
        graph: DependencyGraph,
        policy: CascadePolicy,
    }

    impl Site {
        fn new() -> Self {
            let entries = vec![
                SourceEntry::new("content/a.md", "a"),
                SourceEntry::new("content/b.md", "b"),
                SourceEntry::new("content/c.md", "c").with_terms("tags", ["x"]),
            ];
            let previous = [
                meta("a", "content/a.md", &[], None),
                meta("b", "content/b.md", &[], None),
                meta("c", "content/c.md", &["x"], None),
            ]
            .into_iter()
            .map(|m| (m.id.clone(), m))
            .collect();
            let graph = DependencyGraph::new();
            graph.record_edges(&"a".into(), [TargetKey::Partial("templates/p.html".into())]);
            graph.record_edges(&"b".into(), []);
            graph.record_edges(&"c".into(), [TargetKey::taxonomy("tags", "x")]);
            Self {
                entries,
                previous,
                graph,
                policy: CascadePolicy::default(),
            }
        }

        fn resolve(&self, changes: &ChangeSet) -> RebuildPlan {
            CascadeResolver::new(&self.policy, &self.entries, &self.previous).resolve(changes, &self.graph)
        }
    }

    #[test]
    fn test_nothing_changed() {
        let site = Site::new();
        let plan = site.resolve(&ChangeSet::default());
        assert!(plan.is_empty());
        assert!(!plan.needs_render(&"a".into()));
    }

    #[test]
    fn test_partial_change_cascades() {
        let site = Site::new();
        let plan = site.resolve(&changed(&["templates/p.html"]));
        assert!(plan.direct.is_empty());
        assert_eq!(plan.cascaded, ids(&["a"]));
    }

    #[test]
    fn test_new_tagged_page_cascades_to_listing() {
        let mut site = Site::new();
        site.entries.push(SourceEntry::new("content/d.md", "d").with_terms("tags", ["x"]));

        let plan = site.resolve(&changed(&["content/d.md"]));
        assert_eq!(plan.direct, ids(&["d"]));
        assert_eq!(plan.cascaded, ids(&["c"]));
    }

    #[test]
    fn test_untagging_cascades_through_old_membership() {
        let mut site = Site::new();
        site.previous.insert("b".into(), meta("b", "content/b.md", &["y"], None));
        site.graph.record_edges(&"tags-y".into(), [TargetKey::taxonomy("tags", "y")]);
        site.entries.push(SourceEntry::new("gen/tags-y", "tags-y"));
        site.previous.insert("tags-y".into(), meta("tags-y", "gen/tags-y", &[], None));

        // b dropped tag y; the y listing must still rebuild
        let plan = site.resolve(&changed(&["content/b.md"]));
        assert_eq!(plan.direct, ids(&["b"]));
        assert_eq!(plan.cascaded, ids(&["tags-y"]));
    }

    #[test]
    fn test_config_change_is_full() {
        let site = Site::new();
        let mut changes = changed(&["site.toml"]);
        changes.config_changed = true;

        let plan = site.resolve(&changes);
        assert!(plan.full_rebuild);
        assert_eq!(plan.reasons.len(), 1);
        assert!(plan.direct.is_empty(), "additive rules are skipped");
        assert!(plan.needs_render(&"b".into()));
    }

    #[test]
    fn test_shared_change_rebuilds_versioned_family() {
        let mut site = Site::new();
        site.policy.shared_roots = vec![PathBuf::from("content/shared")];
        for v in ["v1", "v2"] {
            let id = format!("{v}/intro");
            let source = format!("content/{v}/intro.md");
            site.entries.push(SourceEntry::new(&source, id.as_str()).with_version(v));
            site.previous.insert(id.as_str().into(), meta(&id, &source, &[], Some(v)));
        }

        let plan = site.resolve(&changed(&["content/shared/note.md"]));
        assert_eq!(plan.cascaded, ids(&["v1/intro", "v2/intro"]));
    }

    #[test]
    fn test_transitive_cascade_through_outputs() {
        let mut site = Site::new();
        // feed embeds a; sitemap embeds feed
        site.graph.record_edges(&"feed".into(), [TargetKey::Output("a".into())]);
        site.graph.record_edges(&"sitemap".into(), [TargetKey::Output("feed".into())]);
        for id in ["feed", "sitemap"] {
            site.entries.push(SourceEntry::new(format!("gen/{id}"), id));
            site.previous.insert(id.into(), meta(id, &format!("gen/{id}"), &[], None));
        }

        let plan = site.resolve(&changed(&["templates/p.html"]));
        assert_eq!(plan.cascaded, ids(&["a", "feed", "sitemap"]));
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_cross_ref_cascade() {
        let site = Site::new();
        site.graph.record_edges(&"b".into(), [TargetKey::cross_ref(None, "content/a.md")]);

        let plan = site.resolve(&changed(&["content/a.md"]));
        assert_eq!(plan.direct, ids(&["a"]));
        assert_eq!(plan.cascaded, ids(&["b"]));
    }

    #[test]
    fn test_cycle_terminates() {
        let site = Site::new();
        site.graph.record_edges(&"a".into(), [
            TargetKey::Partial("templates/p.html".into()),
            TargetKey::Output("b".into()),
        ]);
        site.graph.record_edges(&"b".into(), [TargetKey::Output("a".into())]);

        let plan = site.resolve(&changed(&["templates/p.html"]));
        assert_eq!(plan.cascaded, ids(&["a", "b"]));
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_depth_bound_forces_full_rebuild() {
        let mut site = Site::new();
        site.policy.max_depth = 2;
        // p -> a -> n1 -> n2 -> n3
        let mut prev = OutputId::from("a");
        for i in 1..=3 {
            let id = OutputId::new(format!("n{i}"));
            site.graph.record_edges(&id, [TargetKey::Output(prev.clone())]);
            site.entries.push(SourceEntry::new(format!("gen/n{i}"), id.clone()));
            site.previous.insert(id.clone(), meta(id.as_str(), &format!("gen/n{i}"), &[], None));
            prev = id;
        }

        let plan = site.resolve(&changed(&["templates/p.html"]));
        assert!(plan.full_rebuild);
        assert_eq!(plan.warnings.len(), 1);
        assert!(plan.reasons.iter().any(|r| r.contains("depth 2")));
        assert!(plan.needs_render(&"n2".into()));
        assert!(plan.needs_render(&"n3".into()));
    }

    #[test]
    fn test_depth_bound_quiet_when_nothing_cut_off() {
        let mut site = Site::new();
        site.policy.max_depth = 1;

        // p -> a, and nothing depends on a
        let plan = site.resolve(&changed(&["templates/p.html"]));
        assert_eq!(plan.cascaded, ids(&["a"]));
        assert!(!plan.full_rebuild);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_depth_bound_still_removes_deleted() {
        let mut site = Site::new();
        site.policy.max_depth = 1;
        site.graph.record_edges(&"b".into(), [TargetKey::Output("a".into())]);
        site.entries.retain(|e| e.output.as_str() != "c");

        let plan = site.resolve(&changed(&["templates/p.html"]));
        assert!(plan.full_rebuild);
        assert_eq!(plan.removed, ids(&["c"]));
        assert!(!plan.needs_render(&"c".into()));
        assert!(plan.needs_render(&"b".into()));
    }

    #[test]
    fn test_deletion_removes_and_strips_edges() {
        let mut site = Site::new();
        site.entries.retain(|e| e.output.as_str() != "c");
        let changes = ChangeSet {
            deleted: [PathBuf::from("content/c.md")].into_iter().collect(),
            ..ChangeSet::default()
        };

        let plan = site.resolve(&changes);
        assert_eq!(plan.removed, ids(&["c"]));
        assert!(!plan.cascaded.contains(&"c".into()));
        assert!(!site.graph.contains_consumer(&"c".into()));
        assert!(site.graph.dependents_of(&TargetKey::taxonomy("tags", "x")).is_empty());
    }

    #[test]
    fn test_deleted_page_cascades_to_its_listing() {
        let mut site = Site::new();
        // e was built last time, tagged x; its source is gone now
        site.previous.insert("e".into(), meta("e", "content/e.md", &["x"], None));

        let changes = ChangeSet {
            deleted: [PathBuf::from("content/e.md")].into_iter().collect(),
            ..ChangeSet::default()
        };
        let plan = site.resolve(&changes);
        assert_eq!(plan.removed, ids(&["e"]));
        assert_eq!(plan.cascaded, ids(&["c"]));
    }

    #[test]
    fn test_undiscovered_outputs_removed_even_on_full() {
        let mut site = Site::new();
        site.entries.retain(|e| e.output.as_str() != "b");
        let mut changes = ChangeSet::default();
        changes.config_changed = true;

        let plan = site.resolve(&changes);
        assert!(plan.full_rebuild);
        assert_eq!(plan.removed, ids(&["b"]));
        assert!(!plan.needs_render(&"b".into()));
    }

    #[test]
    fn test_unbuilt_entry_is_direct() {
        let mut site = Site::new();
        site.previous.remove(&OutputId::from("b"));
        let plan = site.resolve(&ChangeSet::default());
        assert_eq!(plan.direct, ids(&["b"]));
    }

    #[test]
    fn test_rule_order() {
        let names: Vec<_> = rule_names().collect();
        assert_eq!(names, ["config", "shared", "direct", "dependency", "deletion"]);
    }
}
