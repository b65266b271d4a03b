//! Continuation tokens for paginated queries.
//!
//! Two shapes exist: the composite `continue` object (one flat map of
//! `xxcontinue` markers) and the legacy per-module `query-continue` object
//! (`{module: {marker: value}}`). A token is only built when at least one
//! marker remains, so "no token" is the termination condition.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

/// Query modules whose output can span several pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Module {
    Coordinates,
    Categories,
    Thumbnail,
    Redirects,
}

impl Module {
    /// Map a continuation key (`cocontinue`) or module name (`coordinates`).
    pub fn from_continue_key(key: &str) -> Option<Self> {
        match key {
            "cocontinue" | "coordinates" => Some(Module::Coordinates),
            "clcontinue" | "categories" => Some(Module::Categories),
            "picontinue" | "pageimages" => Some(Module::Thumbnail),
            "rdcontinue" | "redirects" => Some(Module::Redirects),
            _ => None,
        }
    }
}

/// Modules still being continued on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Whitelist {
    Modules(BTreeSet<Module>),
    /// A marker named a module with no known field mapping.
    Everything { unmapped: Vec<String> },
}

/// Module that drives the namespace walk itself; never part of the page merge.
pub const PAGE_ENUMERATION: &str = "allpages";

#[derive(Debug, Clone, PartialEq)]
pub enum ContinuationToken {
    Composite(BTreeMap<String, Value>),
    PerModule(BTreeMap<String, BTreeMap<String, Value>>),
}

impl ContinuationToken {
    /// Token from a `continue` block, or `None` when nothing is left.
    pub fn composite(block: Option<BTreeMap<String, Value>>) -> Option<Self> {
        let block = block?;
        let has_marker = block.keys().any(|k| k != "continue");
        has_marker.then_some(ContinuationToken::Composite(block))
    }

    /// Token from a `query-continue` block, ignoring page enumeration.
    pub fn per_module(block: Option<BTreeMap<String, BTreeMap<String, Value>>>) -> Option<Self> {
        let mut block = block?;
        block.remove(PAGE_ENUMERATION);
        (!block.is_empty()).then_some(ContinuationToken::PerModule(block))
    }

    /// Query parameters that request the next page.
    pub fn params(&self) -> Vec<(String, String)> {
        match self {
            ContinuationToken::Composite(map) => map.iter().map(|(k, v)| (k.clone(), param_value(v))).collect(),
            ContinuationToken::PerModule(modules) => modules
                .values()
                .flat_map(|markers| markers.iter().map(|(k, v)| (k.clone(), param_value(v))))
                .collect(),
        }
    }

    /// Names of the modules the token continues.
    pub fn keys(&self) -> Vec<&str> {
        match self {
            ContinuationToken::Composite(map) => map.keys().map(String::as_str).filter(|k| *k != "continue").collect(),
            ContinuationToken::PerModule(modules) => modules.keys().map(String::as_str).collect(),
        }
    }

    pub fn whitelist(&self) -> Whitelist {
        let mut modules = BTreeSet::new();
        let mut unmapped = Vec::new();
        for key in self.keys() {
            match Module::from_continue_key(key) {
                Some(module) => {
                    modules.insert(module);
                }
                None => unmapped.push(key.to_string()),
            }
        }
        if unmapped.is_empty() { Whitelist::Modules(modules) } else { Whitelist::Everything { unmapped } }
    }
}

fn param_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
