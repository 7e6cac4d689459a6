//! Outputs as seen by post-process consumers.
//!
//! Every output in a build is either freshly rendered ([`FullOutput`]) or a
//! lazy [`OutputProxy`] over cached metadata. Consumers read both through
//! [`OutputView`] and cannot tell them apart except by timing.
//!
//! # Field Sources
//!
//! | Field                                   | Fresh         | Proxy                  |
//! |-----------------------------------------|---------------|------------------------|
//! | id, source, url, title, date, summary   | rendered      | cached metadata        |
//! | taxonomies, version, extra, word_count  | rendered      | cached metadata        |
//! | body, links                             | rendered      | materialized on demand |

mod full;
pub mod proxy;

pub use full::{CachedMetadata, FullOutput, MetaValue, Taxonomies, count_words};
pub use proxy::OutputProxy;

use crate::{deps::OutputId, error::MaterializeError};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::path::Path;

// ============================================================================
// Fields
// ============================================================================

/// Name of a field a consumer may read.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Id,
    Source,
    Url,
    Title,
    Date,
    Summary,
    Taxonomies,
    Version,
    Extra(String),
    WordCount,
    Body,
    Links,
}

impl Field {
    /// True if a proxy can answer without materializing.
    pub const fn is_cached(&self) -> bool {
        !matches!(self, Self::Body | Self::Links)
    }
}

/// Owned value of a [`Field`], for generic consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Missing,
    Text(String),
    Count(usize),
    Taxonomies(Taxonomies),
    Meta(MetaValue),
    List(Vec<String>),
}

impl FieldValue {
    fn opt_text(value: Option<&str>) -> Self {
        value.map_or(Self::Missing, |s| Self::Text(s.to_owned()))
    }
}

// ============================================================================
// View
// ============================================================================

/// Read access to an output, fresh or proxied.
pub trait OutputView {
    fn id(&self) -> &OutputId;
    fn source(&self) -> &Path;
    fn url(&self) -> &str;
    fn title(&self) -> &str;
    fn date(&self) -> Option<&str>;
    fn summary(&self) -> Option<&str>;
    fn taxonomies(&self) -> &Taxonomies;
    fn version(&self) -> Option<&str>;
    fn extra(&self, key: &str) -> Option<&MetaValue>;
    fn word_count(&self) -> usize;

    /// Rendered HTML. A proxy materializes on first call.
    fn body(&self) -> Result<&str, MaterializeError>;

    /// Outbound links. A proxy materializes on first call.
    fn links(&self) -> Result<&[String], MaterializeError>;

    /// Terms of `taxonomy` this output belongs to.
    fn terms(&self, taxonomy: &str) -> &[String] {
        self.taxonomies().get(taxonomy).map_or(&[], Vec::as_slice)
    }

    /// Dynamic field access.
    fn get(&self, field: &Field) -> Result<FieldValue, MaterializeError> {
        Ok(match field {
            Field::Id => FieldValue::Text(self.id().to_string()),
            Field::Source => FieldValue::Text(self.source().display().to_string()),
            Field::Url => FieldValue::Text(self.url().to_owned()),
            Field::Title => FieldValue::Text(self.title().to_owned()),
            Field::Date => FieldValue::opt_text(self.date()),
            Field::Summary => FieldValue::opt_text(self.summary()),
            Field::Taxonomies => FieldValue::Taxonomies(self.taxonomies().clone()),
            Field::Version => FieldValue::opt_text(self.version()),
            Field::Extra(key) => self.extra(key).cloned().map_or(FieldValue::Missing, FieldValue::Meta),
            Field::WordCount => FieldValue::Count(self.word_count()),
            Field::Body => FieldValue::Text(self.body()?.to_owned()),
            Field::Links => FieldValue::List(self.links()?.to_vec()),
        })
    }
}

impl OutputView for FullOutput {
    fn id(&self) -> &OutputId {
        &self.id
    }
    fn source(&self) -> &Path {
        &self.source
    }
    fn url(&self) -> &str {
        &self.url
    }
    fn title(&self) -> &str {
        &self.title
    }
    fn date(&self) -> Option<&str> {
        self.date.as_deref()
    }
    fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }
    fn taxonomies(&self) -> &Taxonomies {
        &self.taxonomies
    }
    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
    fn extra(&self, key: &str) -> Option<&MetaValue> {
        self.extra.get(key)
    }
    fn word_count(&self) -> usize {
        FullOutput::word_count(self)
    }
    fn body(&self) -> Result<&str, MaterializeError> {
        Ok(&self.body)
    }
    fn links(&self) -> Result<&[String], MaterializeError> {
        Ok(&self.links)
    }
}

impl OutputView for OutputProxy {
    fn id(&self) -> &OutputId {
        &self.meta().id
    }
    fn source(&self) -> &Path {
        &self.meta().source
    }
    fn url(&self) -> &str {
        &self.meta().url
    }
    fn title(&self) -> &str {
        &self.meta().title
    }
    fn date(&self) -> Option<&str> {
        self.meta().date.as_deref()
    }
    fn summary(&self) -> Option<&str> {
        self.meta().summary.as_deref()
    }
    fn taxonomies(&self) -> &Taxonomies {
        &self.meta().taxonomies
    }
    fn version(&self) -> Option<&str> {
        self.meta().version.as_deref()
    }
    fn extra(&self, key: &str) -> Option<&MetaValue> {
        self.meta().extra.get(key)
    }
    fn word_count(&self) -> usize {
        self.meta().word_count
    }
    fn body(&self) -> Result<&str, MaterializeError> {
        Ok(&self.full()?.body)
    }
    fn links(&self) -> Result<&[String], MaterializeError> {
        Ok(&self.full()?.links)
    }
}

// ============================================================================
// Output
// ============================================================================

/// One slot of the build's output collection.
#[derive(Debug)]
pub enum Output {
    Full(Box<FullOutput>),
    Proxy(OutputProxy),
}

impl Output {
    pub const fn is_proxy(&self) -> bool {
        matches!(self, Self::Proxy(_))
    }

    /// True if the full output is in memory (fresh, or a loaded proxy).
    pub fn is_materialized(&self) -> bool {
        match self {
            Self::Full(_) => true,
            Self::Proxy(proxy) => proxy.is_materialized(),
        }
    }

    fn view(&self) -> &dyn OutputView {
        match self {
            Self::Full(full) => full.as_ref(),
            Self::Proxy(proxy) => proxy,
        }
    }
}

impl From<FullOutput> for Output {
    fn from(full: FullOutput) -> Self {
        Self::Full(Box::new(full))
    }
}

impl From<OutputProxy> for Output {
    fn from(proxy: OutputProxy) -> Self {
        Self::Proxy(proxy)
    }
}

impl OutputView for Output {
    fn id(&self) -> &OutputId {
        self.view().id()
    }
    fn source(&self) -> &Path {
        self.view().source()
    }
    fn url(&self) -> &str {
        self.view().url()
    }
    fn title(&self) -> &str {
        self.view().title()
    }
    fn date(&self) -> Option<&str> {
        self.view().date()
    }
    fn summary(&self) -> Option<&str> {
        self.view().summary()
    }
    fn taxonomies(&self) -> &Taxonomies {
        self.view().taxonomies()
    }
    fn version(&self) -> Option<&str> {
        self.view().version()
    }
    fn extra(&self, key: &str) -> Option<&MetaValue> {
        self.view().extra(key)
    }
    fn word_count(&self) -> usize {
        self.view().word_count()
    }
    fn body(&self) -> Result<&str, MaterializeError> {
        self.view().body()
    }
    fn links(&self) -> Result<&[String], MaterializeError> {
        self.view().links()
    }
}

// ============================================================================
// OutputSet
// ============================================================================

/// Arena of outputs with an id index. Order is discovery order.
#[derive(Debug, Default)]
pub struct OutputSet {
    slots: Vec<Output>,
    index: FxHashMap<OutputId, usize>,
}

impl OutputSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `output`, replacing the slot of an output with the same id.
    pub fn insert(&mut self, output: Output) {
        match self.index.get(output.id()) {
            Some(&slot) => self.slots[slot] = output,
            None => {
                self.index.insert(output.id().clone(), self.slots.len());
                self.slots.push(output);
            }
        }
    }

    pub fn get(&self, id: &OutputId) -> Option<&Output> {
        self.index.get(id).map(|&slot| &self.slots[slot])
    }

    pub fn contains(&self, id: &OutputId) -> bool {
        self.index.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.slots.iter()
    }

    pub fn par_iter(&self) -> impl ParallelIterator<Item = &Output> {
        self.slots.par_iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = &OutputId> {
        self.slots.iter().map(OutputView::id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl FromIterator<Output> for OutputSet {
    fn from_iter<I: IntoIterator<Item = Output>>(iter: I) -> Self {
        let mut set = Self::new();
        for output in iter {
            set.insert(output);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(id: &str, title: &str) -> FullOutput {
        let mut out = FullOutput::new(id, format!("content/{id}.md"));
        out.title = title.into();
        out.body = "<p>one two three</p>".into();
        out.links = vec!["/b/".into()];
        out.taxonomies.insert("tags".into(), vec!["x".into()]);
        out
    }

    fn proxy_of(out: &FullOutput) -> OutputProxy {
        let loaded = out.clone();
        OutputProxy::new(out.cached_metadata(), Box::new(move || Ok(loaded.clone())))
    }

    #[test]
    fn test_proxy_and_full_agree_on_every_field() {
        let fresh = full("a", "A");
        let proxy = proxy_of(&fresh);

        let cached = [
            Field::Id,
            Field::Source,
            Field::Url,
            Field::Title,
            Field::Date,
            Field::Taxonomies,
            Field::WordCount,
            Field::Extra("missing".into()),
        ];
        for field in &cached {
            assert!(field.is_cached());
            assert_eq!(fresh.get(field).unwrap(), proxy.get(field).unwrap(), "{field:?}");
        }
        assert!(!proxy.is_materialized());

        assert_eq!(fresh.get(&Field::Body).unwrap(), proxy.get(&Field::Body).unwrap());
        assert_eq!(proxy.links().unwrap(), fresh.links.as_slice());
        assert!(proxy.is_materialized());
        assert_eq!(proxy.terms("tags"), ["x".to_string()]);
        assert!(proxy.terms("categories").is_empty());
    }

    #[test]
    fn test_output_set_replace_keeps_slot() {
        let mut set: OutputSet = [Output::from(full("a", "A")), Output::from(full("b", "B"))]
            .into_iter()
            .collect();
        set.insert(Output::from(proxy_of(&full("a", "A2"))));

        assert_eq!(set.len(), 2);
        let ids: Vec<_> = set.ids().map(OutputId::as_str).collect();
        assert_eq!(ids, ["a", "b"]);
        let a = set.get(&"a".into()).unwrap();
        assert!(a.is_proxy());
        assert_eq!(a.title(), "A2");
        assert_eq!(set.par_iter().filter(|o| o.is_materialized()).count(), 1);
    }
}
