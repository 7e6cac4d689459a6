//! Fully rendered outputs and the metadata cached for them.

use crate::deps::OutputId;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, path::PathBuf};

/// Taxonomy name to terms, e.g. `tags -> [rust, ssg]`.
pub type Taxonomies = BTreeMap<String, Vec<String>>;

/// Value of a user-defined front-matter field.
///
/// A closed type (unlike `serde_json::Value`) so the binary cache codec can
/// round-trip it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<MetaValue>),
}

impl MetaValue {
    /// Convert a JSON value. Objects and nulls have no representation.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;
        Some(match value {
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64()?),
            },
            Value::String(s) => Self::Str(s.clone()),
            Value::Array(items) => Self::List(items.iter().filter_map(Self::from_json).collect()),
            Value::Null | Value::Object(_) => return None,
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for MetaValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                let parts: Vec<_> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

// ============================================================================
// FullOutput
// ============================================================================

/// A page (or generated artifact) as produced by the renderer.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FullOutput {
    pub id: OutputId,
    /// Source path relative to the site root.
    pub source: PathBuf,
    pub url: String,
    pub title: String,
    pub date: Option<String>,
    pub summary: Option<String>,
    pub taxonomies: Taxonomies,
    /// Content version this output belongs to (versioned docs), if any.
    pub version: Option<String>,
    pub extra: BTreeMap<String, MetaValue>,
    /// Rendered HTML.
    pub body: String,
    /// Outbound links found while rendering.
    pub links: Vec<String>,
}

impl FullOutput {
    pub fn new(id: impl Into<OutputId>, source: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            ..Self::default()
        }
    }

    /// Number of words in the rendered body, markup excluded.
    pub fn word_count(&self) -> usize {
        count_words(&self.body)
    }

    /// The subset of fields persisted for proxying this output next build.
    pub fn cached_metadata(&self) -> CachedMetadata {
        CachedMetadata {
            id: self.id.clone(),
            source: self.source.clone(),
            url: self.url.clone(),
            title: self.title.clone(),
            date: self.date.clone(),
            summary: self.summary.clone(),
            taxonomies: self.taxonomies.clone(),
            version: self.version.clone(),
            extra: self.extra.clone(),
            word_count: self.word_count(),
        }
    }
}

/// Count whitespace-separated words outside `<...>` markup.
pub fn count_words(html: &str) -> usize {
    let mut in_tag = false;
    let mut count = 0;
    let mut in_word = false;
    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                in_word = false;
            }
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c if c.is_whitespace() => in_word = false,
            _ => {
                if !in_word {
                    count += 1;
                    in_word = true;
                }
            }
        }
    }
    count
}

// ============================================================================
// CachedMetadata
// ============================================================================

/// Per-output metadata persisted in the build cache.
///
/// Holds every field of [`FullOutput`] except the ones that need the full
/// render (`body`, `links`); those are materialized on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMetadata {
    pub id: OutputId,
    pub source: PathBuf,
    pub url: String,
    pub title: String,
    pub date: Option<String>,
    pub summary: Option<String>,
    pub taxonomies: Taxonomies,
    pub version: Option<String>,
    pub extra: BTreeMap<String, MetaValue>,
    pub word_count: usize,
}
