//! Build orchestration.
//!
//! # Phases
//!
//! ```text
//! Idle
//!  │  load cache (absent or unusable ──► full rebuild)
//!  ▼
//! CacheLoaded
//!  │  ChangeDetector: full scan or explicit paths
//!  ▼
//! ChangesDetected
//!  │  CascadeResolver: ordered rules ──► RebuildPlan
//!  ▼
//! PlanResolved
//!  │  one render task per planned output on the worker pool,
//!  │  every other output becomes an OutputProxy
//!  ▼
//! Rendering
//!  │  fold observed hashes, metadata into the next state; save atomically
//!  ▼
//! Persisting ──► Done
//! ```
//!
//! Failures local to one output never abort the build: a failed render is
//! reported and its state dropped so the next build renders it again.

use crate::{
    cache::{CacheState, CacheStore},
    cascade::{CascadeResolver, RebuildPlan},
    config::EngineConfig,
    deps::{DependencyGraph, OutputId},
    detect::{ChangeDetector, ChangeSet},
    error::{BuildError, is_not_found},
    log,
    logger::ProgressBars,
    output::{CachedMetadata, FullOutput, Output, OutputProxy, OutputSet},
    render::{Observation, RenderContext, Renderer, SourceEntry},
    store::{ContentHashStore, FileRecord},
    utils::{category::categorize_path, collect_all_files, relativize},
};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use std::{
    any::Any,
    collections::BTreeMap,
    panic::{AssertUnwindSafe, catch_unwind},
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

// ============================================================================
// Report
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BuildPhase {
    Idle,
    CacheLoaded,
    /// A cache file existed but could not be used. Recovered as absent.
    CacheLoadFailed,
    ChangesDetected,
    PlanResolved,
    Rendering,
    /// At least one output failed to render. The others completed.
    RenderFailed,
    Persisting,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedOutput {
    pub id: OutputId,
    pub error: String,
}

/// What a build did, for caller-side reporting.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub full_rebuild: bool,
    pub reasons: Vec<String>,
    pub rebuilt: Vec<OutputId>,
    pub proxied: Vec<OutputId>,
    pub removed: Vec<OutputId>,
    pub failed: Vec<FailedOutput>,
    pub warnings: Vec<String>,
    /// The next build starts from this build's state.
    pub persisted: bool,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Result of one build.
#[derive(Debug)]
pub struct Build {
    /// Every live output in discovery order.
    pub outputs: OutputSet,
    pub changes: ChangeSet,
    pub plan: RebuildPlan,
    pub report: BuildReport,
    /// Phases entered, in order.
    pub phases: Vec<BuildPhase>,
}

// ============================================================================
// Orchestrator
// ============================================================================

enum Scan<'p> {
    Full,
    Paths(&'p [PathBuf]),
}

enum Outcome {
    Rendered(Box<FullOutput>, Vec<FileRecord>),
    /// The source disappeared between discovery and render.
    Vanished,
    Failed(String),
}

pub struct Orchestrator {
    config: EngineConfig,
    renderer: Arc<dyn Renderer>,
    pool: rayon::ThreadPool,
    cache: Option<CacheStore>,
}

impl Orchestrator {
    pub fn new(config: EngineConfig, renderer: Arc<dyn Renderer>) -> Result<Self, BuildError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_count())
            .thread_name(|i| format!("kiln-render-{i}"))
            .build()?;
        let cache = config
            .cache
            .enable
            .then(|| CacheStore::new(config.cache_path(), config.cache.compression));
        Ok(Self {
            config,
            renderer,
            pool,
            cache,
        })
    }

    /// Replace the cache store (tests inject foreign headers through this).
    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&CacheStore> {
        self.cache.as_ref()
    }

    /// Build with a full scan of every tracked input.
    pub fn build(&self, entries: &[SourceEntry]) -> Build {
        self.run(entries, Scan::Full)
    }

    /// Build examining only `changed_paths` (absolute or root-relative),
    /// as reported by a file watcher.
    pub fn build_changed(&self, entries: &[SourceEntry], changed_paths: &[PathBuf]) -> Build {
        self.run(entries, Scan::Paths(changed_paths))
    }

    fn run(&self, entries: &[SourceEntry], scan: Scan<'_>) -> Build {
        let started = Instant::now();
        let root = self.config.root().to_path_buf();
        let mut phases = vec![BuildPhase::Idle];
        let mut report = BuildReport::default();
        let entries = unique_entries(entries, &mut report);

        // Cache
        let loaded = self.load_cache(&mut phases);
        let (mut state, full_reason) = match loaded {
            Ok(state) => (state, None),
            Err(reason) => (CacheState::default(), Some(reason)),
        };

        // Detection
        let changes = match (&full_reason, scan) {
            (Some(_), _) => ChangeSet::default(),
            (None, scan) => {
                let build = &self.config.build;
                let detector = ChangeDetector::new(&root, &state.hashes, &build.config_file, &build.shared)
                    .with_referenced(state.graph.target_paths());
                match scan {
                    Scan::Full => detector.detect(entries.iter().map(|e| e.source.as_path())),
                    Scan::Paths(paths) => detector.detect_paths(paths),
                }
            }
        };
        phases.push(BuildPhase::ChangesDetected);
        self.log_changes(&changes);

        // Planning
        let plan = match full_reason {
            Some(reason) => RebuildPlan::full(reason),
            None => {
                let policy = self.config.cascade_policy();
                CascadeResolver::new(&policy, &entries, &state.outputs).resolve(&changes, &state.graph)
            }
        };
        if plan.full_rebuild {
            state.graph = DependencyGraph::new();
            state.hashes = ContentHashStore::new();
        }
        phases.push(BuildPhase::PlanResolved);
        log_plan(&plan);

        // Rendering
        let tasks: Vec<(usize, &SourceEntry)> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                !plan.removed.contains(&e.output)
                    && (plan.needs_render(&e.output) || !state.outputs.contains_key(&e.output))
            })
            .collect();
        phases.push(BuildPhase::Rendering);
        let outcomes = self.render_all(&tasks, &root, &state.graph);

        // Persisting
        let mut slots: Vec<Option<Output>> = entries.iter().map(|_| None).collect();
        let mut metas: FxHashMap<OutputId, CachedMetadata> = FxHashMap::default();
        let mut hashes = std::mem::take(&mut state.hashes);
        for path in &changes.deleted {
            hashes.remove(path);
        }
        for record in changes.hashed.iter().chain(&changes.touched) {
            hashes.record(record.clone());
        }

        for ((slot, entry), outcome) in tasks.iter().zip(outcomes) {
            match outcome {
                Outcome::Rendered(output, observed) => {
                    let source_seen = observed.iter().any(|r| r.path == entry.source);
                    for record in observed {
                        hashes.record(record);
                    }
                    if !source_seen && let Ok(record) = FileRecord::hash_file(&root, &entry.source) {
                        hashes.record(record);
                    }
                    metas.insert(entry.output.clone(), output.cached_metadata());
                    report.rebuilt.push(entry.output.clone());
                    slots[*slot] = Some(Output::Full(output));
                }
                Outcome::Vanished => {
                    log!("warn"; "source `{}` of `{}` vanished, removing output", entry.source.display(), entry.output);
                    state.graph.remove_consumer(&entry.output);
                    hashes.remove(&entry.source);
                    report.removed.push(entry.output.clone());
                }
                Outcome::Failed(error) => {
                    log!("error"; "{}: {error}", entry.output);
                    state.graph.remove_consumer(&entry.output);
                    hashes.remove(&entry.source);
                    report.failed.push(FailedOutput {
                        id: entry.output.clone(),
                        error,
                    });
                }
            }
        }
        if !report.failed.is_empty() {
            phases.push(BuildPhase::RenderFailed);
        }

        for (slot, entry) in entries.iter().enumerate() {
            if slots[slot].is_some() || tasks.iter().any(|(s, _)| *s == slot) {
                continue;
            }
            let Some(meta) = state.outputs.get(&entry.output) else {
                continue;
            };
            metas.insert(entry.output.clone(), meta.clone());
            report.proxied.push(entry.output.clone());
            slots[slot] = Some(Output::Proxy(OutputProxy::from_renderer(
                meta.clone(),
                entry.clone(),
                root.clone(),
                Arc::downgrade(&self.renderer),
            )));
        }
        report.removed.extend(plan.removed.iter().cloned());
        report.full_rebuild = plan.full_rebuild;
        report.reasons.extend(plan.reasons.iter().cloned());
        report.warnings.extend(plan.warnings.iter().cloned());

        phases.push(BuildPhase::Persisting);
        self.track_unrecorded(&mut hashes, &state.graph, &report.rebuilt, &root);
        let next = CacheState {
            hashes,
            graph: state.graph,
            outputs: metas,
        };
        report.persisted = self.persist(&next, &mut report.warnings);
        phases.push(BuildPhase::Done);

        log!(
            "build";
            "{} rebuilt, {} proxied, {} removed, {} failed in {:.2?}",
            report.rebuilt.len(),
            report.proxied.len(),
            report.removed.len(),
            report.failed.len(),
            started.elapsed()
        );

        Build {
            outputs: slots.into_iter().flatten().collect(),
            changes,
            plan,
            report,
            phases,
        }
    }

    /// Loaded state, or the reason the build has to start from scratch.
    fn load_cache(&self, phases: &mut Vec<BuildPhase>) -> Result<CacheState, String> {
        let Some(cache) = &self.cache else {
            phases.push(BuildPhase::CacheLoaded);
            return Err("build cache disabled".into());
        };
        match cache.try_load() {
            Ok(state) => {
                phases.push(BuildPhase::CacheLoaded);
                log!("cache"; "loaded {} files, {} outputs, {} edges", state.hashes.len(), state.outputs.len(), state.graph.edge_count());
                Ok(state)
            }
            Err(err) if err.is_missing() => {
                phases.push(BuildPhase::CacheLoaded);
                Err("no build cache".into())
            }
            Err(err) => {
                phases.push(BuildPhase::CacheLoadFailed);
                log!("cache"; "discarding cache: {err}");
                Err(format!("build cache unusable: {err}"))
            }
        }
    }

    fn render_all(
        &self,
        tasks: &[(usize, &SourceEntry)],
        root: &Path,
        graph: &DependencyGraph,
    ) -> Vec<Outcome> {
        if tasks.is_empty() {
            return Vec::new();
        }
        log!("render"; "rendering {} outputs on {} workers", tasks.len(), self.pool.current_num_threads());
        let progress = self
            .config
            .build
            .progress
            .then(|| ProgressBars::new_filtered(&[("render", tasks.len())]))
            .flatten();

        let renderer = self.renderer.as_ref();
        let outcomes = self.pool.install(|| {
            tasks
                .par_iter()
                .map(|(_, entry)| {
                    let outcome = render_one(renderer, entry, root, graph);
                    if let Some(progress) = &progress {
                        progress.inc(0);
                    }
                    outcome
                })
                .collect()
        });
        if let Some(progress) = progress {
            progress.finish();
        }
        outcomes
    }

    /// Hash file-backed edge targets and shared files the store does not
    /// know yet, plus the site config, so the next detection can see them.
    fn track_unrecorded(
        &self,
        hashes: &mut ContentHashStore,
        graph: &DependencyGraph,
        rendered: &[OutputId],
        root: &Path,
    ) {
        let build = &self.config.build;
        let mut wanted: FxHashSet<PathBuf> = rendered
            .iter()
            .flat_map(|id| graph.edges_of(id))
            .filter_map(|edge| edge.target.path().map(Path::to_path_buf))
            .collect();
        wanted.insert(build.config_file.clone());
        for shared in &build.shared {
            wanted.extend(
                collect_all_files(&root.join(shared))
                    .iter()
                    .filter_map(|file| relativize(root, file)),
            );
        }
        wanted.retain(|path| !hashes.contains(path));

        let records: Vec<FileRecord> = self.pool.install(|| {
            wanted
                .par_iter()
                .filter_map(|path| FileRecord::hash_file(root, path).ok())
                .collect()
        });
        for record in records {
            hashes.record(record);
        }
    }

    /// Save `state`. On failure, drop the old cache so the next build is
    /// full instead of trusting state this build has invalidated.
    fn persist(&self, state: &CacheState, warnings: &mut Vec<String>) -> bool {
        let Some(cache) = &self.cache else {
            return false;
        };
        match cache.save(state) {
            Ok(()) => true,
            Err(err) => {
                let message = format!("failed to persist build cache: {err}");
                log!("warn"; "{message}");
                warnings.push(message);
                if let Err(err) = cache.remove() {
                    log!("warn"; "failed to remove stale cache: {err}");
                }
                false
            }
        }
    }

    fn log_changes(&self, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }
        let mut by_category: BTreeMap<_, usize> = BTreeMap::new();
        for path in changes.paths() {
            *by_category.entry(categorize_path(path, &self.config.build)).or_default() += 1;
        }
        let summary: Vec<_> = by_category
            .iter()
            .map(|(category, n)| format!("{}: {n}", category.name()))
            .collect();
        log!(
            "detect";
            "{} changed ({} new), {} deleted, {} touched [{}]",
            changes.changed.len(),
            changes.added.len(),
            changes.deleted.len(),
            changes.touched.len(),
            summary.join(", ")
        );
    }
}

fn log_plan(plan: &RebuildPlan) {
    if plan.full_rebuild {
        log!("plan"; "full rebuild: {}", plan.reasons.join("; "));
    } else if !plan.is_empty() {
        log!(
            "plan";
            "{} direct, {} cascaded, {} removed",
            plan.direct.len(),
            plan.cascaded.len(),
            plan.removed.len()
        );
    }
    for warning in &plan.warnings {
        log!("warn"; "{warning}");
    }
}

/// First entry per output id wins.
fn unique_entries(entries: &[SourceEntry], report: &mut BuildReport) -> Vec<SourceEntry> {
    let mut seen = FxHashSet::default();
    let mut unique = Vec::with_capacity(entries.len());
    for entry in entries {
        if seen.insert(&entry.output) {
            unique.push(entry.clone());
        } else {
            let message = format!(
                "duplicate output `{}` from `{}` ignored",
                entry.output,
                entry.source.display()
            );
            log!("warn"; "{message}");
            report.warnings.push(message);
        }
    }
    unique
}

fn render_one(
    renderer: &dyn Renderer,
    entry: &SourceEntry,
    root: &Path,
    graph: &DependencyGraph,
) -> Outcome {
    let ctx = RenderContext::new(entry, root);
    let result = catch_unwind(AssertUnwindSafe(|| renderer.render(&ctx)));
    let Observation { edges, files } = ctx.finish();

    match result {
        Ok(Ok(mut output)) => {
            output.id = entry.output.clone();
            output.source = entry.source.clone();
            graph.record_edges(&entry.output, edges);
            Outcome::Rendered(Box::new(output), files)
        }
        Ok(Err(err)) if is_not_found(&err) && !root.join(&entry.source).is_file() => Outcome::Vanished,
        Ok(Err(err)) => Outcome::Failed(format!("{err:#}")),
        Err(panic) => Outcome::Failed(format!("renderer panicked: {}", panic_message(&*panic))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
