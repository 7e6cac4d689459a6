//! Test fixtures: a throwaway site on disk and a small line-oriented renderer.
//!
//! Page format:
//!
//! ```text
//! title: Hello
//! tags: x, y
//! version: v2
//! date: 2025-01-01
//! ---
//! Plain line, rendered as a paragraph.
//! {{> templates/p.html}}     include a partial
//! {{template templates/base.html}}
//! {{data data/authors.json}}
//! {{link content/b.md}}      cross reference, same version
//! {{config title}}           value from site.toml
//! {{embed feed}}             depends on another output
//! {{tagged x}}               lists pages tagged `x`
//! ```

use crate::{
    build::Orchestrator,
    config::EngineConfig,
    deps::{OutputId, TargetKey},
    output::FullOutput,
    render::{RenderContext, Renderer, SourceEntry},
    utils::{collect_all_files, relativize},
};
use anyhow::{Context, Result, bail};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tempfile::TempDir;

// ============================================================================
// Renderer
// ============================================================================

#[derive(Default)]
pub struct LineRenderer {
    renders: Mutex<Vec<OutputId>>,
    loads: AtomicUsize,
    failing: Mutex<FxHashSet<OutputId>>,
    panicking: Mutex<FxHashSet<OutputId>>,
}

impl LineRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ids rendered since the last call.
    pub fn take_renders(&self) -> BTreeSet<OutputId> {
        self.renders.lock().drain(..).collect()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn fail(&self, id: &str) {
        self.failing.lock().insert(id.into());
    }

    pub fn panic_on(&self, id: &str) {
        self.panicking.lock().insert(id.into());
    }

    pub fn heal(&self) {
        self.failing.lock().clear();
        self.panicking.lock().clear();
    }

    fn render_page(&self, ctx: &RenderContext<'_>) -> Result<FullOutput> {
        let entry = ctx.entry();
        let text = ctx.read_source()?;
        let (header, body) = Header::parse(&text);

        let mut out = FullOutput::new(entry.output.clone(), entry.source.clone());
        out.url = format!("/{}/", entry.output);
        out.title = header.title.unwrap_or_else(|| entry.output.to_string());
        out.date = header.date;
        out.version = entry.meta.version.clone().or(header.version);
        for tag in &header.tags {
            ctx.deps().taxonomy("tags", tag);
        }
        if !header.tags.is_empty() {
            out.taxonomies.insert("tags".into(), header.tags);
        }

        let mut html = String::new();
        for line in body.lines().filter(|l| !l.trim().is_empty()) {
            let expanded = expand(ctx, line, &mut out)?;
            if out.summary.is_none() {
                out.summary = Some(expanded.clone());
            }
            html.push_str("<p>");
            html.push_str(&expanded);
            html.push_str("</p>\n");
        }
        out.body = html;
        Ok(out)
    }
}

impl Renderer for LineRenderer {
    fn render(&self, ctx: &RenderContext<'_>) -> Result<FullOutput> {
        let id = &ctx.entry().output;
        self.renders.lock().push(id.clone());
        if self.failing.lock().contains(id) {
            bail!("injected failure for `{id}`");
        }
        if self.panicking.lock().contains(id) {
            panic!("injected panic for `{id}`");
        }
        self.render_page(ctx)
    }

    fn load(&self, entry: &SourceEntry, root: &Path) -> Result<FullOutput> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.render_page(&RenderContext::new(entry, root))
    }
}

fn expand(ctx: &RenderContext<'_>, line: &str, out: &mut FullOutput) -> Result<String> {
    let mut html = String::new();
    let mut rest = line;
    while let Some(start) = rest.find("{{") {
        html.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find("}}")
            .with_context(|| format!("unclosed directive in `{line}`"))?;
        html.push_str(&directive(ctx, after[..end].trim(), out)?);
        rest = &after[end + 2..];
    }
    html.push_str(rest);
    Ok(html)
}

fn directive(ctx: &RenderContext<'_>, text: &str, out: &mut FullOutput) -> Result<String> {
    let (name, arg) = text.split_once(' ').unwrap_or((text, ""));
    let arg = arg.trim();
    Ok(match name {
        ">" => ctx.read_dependency(TargetKey::Partial(arg.into()))?.trim().to_owned(),
        "data" => ctx.read_dependency(TargetKey::Data(arg.into()))?.trim().to_owned(),
        "template" => {
            ctx.deps().template(arg);
            String::new()
        }
        "link" => {
            ctx.deps().cross_ref(ctx.entry().meta.version.as_deref(), arg);
            let url = format!("/{}/", output_id_for(Path::new(arg)));
            out.links.push(url.clone());
            format!("<a href=\"{url}\">{url}</a>")
        }
        "config" => {
            ctx.deps().config_key(arg);
            site_value(ctx.root(), arg).unwrap_or_default()
        }
        "embed" => {
            ctx.deps().output(arg);
            format!("[{arg}]")
        }
        "tagged" => {
            ctx.deps().taxonomy("tags", arg);
            format!("#{arg}")
        }
        other => bail!("unknown directive `{other}`"),
    })
}

/// `key = "value"` from the site config, untracked.
fn site_value(root: &Path, key: &str) -> Option<String> {
    let text = fs::read_to_string(root.join("site.toml")).ok()?;
    text.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"').to_owned())
    })
}

#[derive(Debug, Default)]
struct Header {
    title: Option<String>,
    tags: Vec<String>,
    version: Option<String>,
    date: Option<String>,
}

impl Header {
    /// Leading `key: value` lines, optionally closed by `---`.
    fn parse(text: &str) -> (Self, &str) {
        let mut header = Self::default();
        let mut rest = text;
        while !rest.is_empty() {
            let (line, tail) = rest.split_once('\n').unwrap_or((rest, ""));
            if line.trim() == "---" {
                return (header, tail);
            }
            let Some((key, value)) = line.split_once(':') else { break };
            let value = value.trim().to_owned();
            match key.trim() {
                "title" => header.title = Some(value),
                "version" => header.version = Some(value),
                "date" => header.date = Some(value),
                "tags" => {
                    header.tags = value
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_owned)
                        .collect();
                }
                _ => break,
            }
            rest = tail;
        }
        (header, rest)
    }
}

/// `content/posts/a.md` → `posts/a`
pub fn output_id_for(source: &Path) -> OutputId {
    let rel = source.strip_prefix("content").unwrap_or(source);
    OutputId::new(rel.with_extension("").to_string_lossy())
}

// ============================================================================
// Site
// ============================================================================

pub struct Site {
    dir: TempDir,
}

impl Site {
    pub fn new() -> Self {
        let site = Self {
            dir: TempDir::new().unwrap(),
        };
        site.write("site.toml", "title = \"Kiln\"\n");
        site
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, path: &str, body: &str) {
        let full = self.root().join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, body).unwrap();
    }

    pub fn remove(&self, path: &str) {
        fs::remove_file(self.root().join(path)).unwrap();
    }

    pub fn config(&self) -> EngineConfig {
        let mut config = EngineConfig::for_root(self.root());
        config.build.progress = false;
        config.build.workers = 2;
        config
    }

    pub fn orchestrator(&self, renderer: &Arc<LineRenderer>) -> Orchestrator {
        self.orchestrator_with(self.config(), renderer)
    }

    pub fn orchestrator_with(&self, config: EngineConfig, renderer: &Arc<LineRenderer>) -> Orchestrator {
        Orchestrator::new(config, renderer.clone()).unwrap()
    }

    /// Discovery: every `.md` under `content/` except `content/shared/`.
    pub fn entries(&self) -> Vec<SourceEntry> {
        collect_all_files(&self.root().join("content"))
            .into_iter()
            .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
            .filter_map(|path| relativize(self.root(), &path))
            .filter(|rel| !rel.starts_with("content/shared"))
            .map(|rel| self.entry(rel))
            .collect()
    }

    fn entry(&self, source: PathBuf) -> SourceEntry {
        let text = fs::read_to_string(self.root().join(&source)).unwrap_or_default();
        let (header, _) = Header::parse(&text);
        let mut entry = SourceEntry::new(&source, output_id_for(&source));
        if let Some(version) = header.version {
            entry = entry.with_version(version);
        }
        if !header.tags.is_empty() {
            entry = entry.with_terms("tags", header.tags);
        }
        entry
    }
}

/// Owned id set, for comparisons.
pub fn ids(ids: &[&str]) -> BTreeSet<OutputId> {
    ids.iter().map(|id| OutputId::new(id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        let (header, body) = Header::parse("title: A\ntags: x, y\n---\nbody\n");
        assert_eq!(header.title.as_deref(), Some("A"));
        assert_eq!(header.tags, ["x", "y"]);
        assert_eq!(body, "body\n");

        let (header, body) = Header::parse("just text\nmore");
        assert!(header.title.is_none());
        assert_eq!(body, "just text\nmore");

        let (header, body) = Header::parse("");
        assert!(header.tags.is_empty());
        assert_eq!(body, "");
    }

    #[test]
    fn test_output_id_for() {
        assert_eq!(output_id_for(Path::new("content/posts/a.md")).as_str(), "posts/a");
        assert_eq!(output_id_for(Path::new("b.md")).as_str(), "b");
    }
}
