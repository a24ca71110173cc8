//! Static per-line variable facts supplied by the parser.
//!
//! Keyed by statement/guard text: which variables a line reads, writes, and
//! declares (with their types). Lookups on unknown text return empty sets so
//! synthetic lines (`break;`) need no registration.

use std::sync::LazyLock;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

static EMPTY_VARS: LazyLock<IndexSet<String>> = LazyLock::new(IndexSet::new);
static EMPTY_DECLS: LazyLock<IndexSet<(String, String)>> = LazyLock::new(IndexSet::new);

/// Variable-use facts for every source line of the obfuscated function.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VarFacts {
    used: IndexMap<String, IndexSet<String>>,
    written: IndexMap<String, IndexSet<String>>,
    /// `(type, name)` pairs declared by the line.
    declared: IndexMap<String, IndexSet<(String, String)>>,
}

impl VarFacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Variables the line reads.
    pub fn used(&self, src: &str) -> &IndexSet<String> {
        self.used.get(src).unwrap_or(&EMPTY_VARS)
    }

    /// Variables the line writes.
    pub fn written(&self, src: &str) -> &IndexSet<String> {
        self.written.get(src).unwrap_or(&EMPTY_VARS)
    }

    /// `(type, name)` pairs the line declares.
    pub fn declared(&self, src: &str) -> &IndexSet<(String, String)> {
        self.declared.get(src).unwrap_or(&EMPTY_DECLS)
    }

    /// Names declared by the line, without types.
    pub fn declared_names(&self, src: &str) -> IndexSet<&str> {
        self.declared(src).iter().map(|(_, name)| name.as_str()).collect()
    }

    pub fn record_used<I, S>(&mut self, src: impl Into<String>, vars: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.used
            .entry(src.into())
            .or_default()
            .extend(vars.into_iter().map(Into::into));
    }

    pub fn record_written<I, S>(&mut self, src: impl Into<String>, vars: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.written
            .entry(src.into())
            .or_default()
            .extend(vars.into_iter().map(Into::into));
    }

    pub fn record_declared<I, S, T>(&mut self, src: impl Into<String>, decls: I)
    where
        I: IntoIterator<Item = (T, S)>,
        S: Into<String>,
        T: Into<String>,
    {
        self.declared
            .entry(src.into())
            .or_default()
            .extend(decls.into_iter().map(|(t, n)| (t.into(), n.into())));
    }

    /// Copy the facts of `from` under the key `to`. Used when guard
    /// canonicalization rewrites `!(g)` occurrences to `g`.
    pub fn merge_alias(&mut self, from: &str, to: &str) {
        if let Some(set) = self.used.get(from).cloned() {
            self.used.insert(to.to_owned(), set);
        }
        if let Some(set) = self.written.get(from).cloned() {
            self.written.insert(to.to_owned(), set);
        }
        if let Some(set) = self.declared.get(from).cloned() {
            self.declared.insert(to.to_owned(), set);
        }
    }
}
