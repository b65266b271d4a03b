//! Per-article metadata accumulated across continuation pages.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::continuation::Module;

/// Article records keyed by title (spaces replaced with underscores).
pub type ArticleDetails = BTreeMap<String, ArticleRecord>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub id: u64,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thumbnail {
    pub source: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

/// A category member returned by the subcategory sub-query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    #[serde(default)]
    pub pageid: Option<u64>,
    #[serde(default)]
    pub ns: i64,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<Revision>,
    /// `"lat;lon"` of the primary coordinate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<Thumbnail>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategories: Option<Vec<PageRef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirects: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub missing: bool,
}

impl ArticleRecord {
    /// Fold `other` into `self`.
    ///
    /// Populated scalars win over empty ones, `missing` is sticky, and lists
    /// are unioned in first-seen order. Merging the same record twice is a
    /// no-op.
    pub fn merge(&mut self, other: ArticleRecord) {
        merge_scalar(&mut self.ns, other.ns);
        merge_scalar(&mut self.revision, other.revision);
        merge_scalar(&mut self.coordinates, other.coordinates);
        merge_scalar(&mut self.thumbnail, other.thumbnail);
        merge_list(&mut self.categories, other.categories);
        merge_list(&mut self.subcategories, other.subcategories);
        merge_list(&mut self.redirects, other.redirects);
        self.missing |= other.missing;
    }

    /// Drop module fields that are not in `modules`.
    ///
    /// Subcategories are not a query module and are always kept. So are the
    /// page identity fields, which merge as plain scalars.
    pub fn retain_modules(&mut self, modules: &BTreeSet<Module>) {
        if !modules.contains(&Module::Coordinates) {
            self.coordinates = None;
        }
        if !modules.contains(&Module::Categories) {
            self.categories = None;
        }
        if !modules.contains(&Module::Thumbnail) {
            self.thumbnail = None;
        }
        if !modules.contains(&Module::Redirects) {
            self.redirects = None;
        }
    }
}

fn merge_scalar<T>(into: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *into = incoming;
    }
}

fn merge_list<T: PartialEq>(into: &mut Option<Vec<T>>, incoming: Option<Vec<T>>) {
    let Some(incoming) = incoming else { return };
    let list = into.get_or_insert_with(Vec::new);
    for item in incoming {
        if !list.contains(&item) {
            list.push(item);
        }
    }
}

/// Merge every record of `page` into `acc`.
pub fn merge_details(acc: &mut ArticleDetails, page: ArticleDetails) {
    for (title, record) in page {
        acc.entry(title).or_default().merge(record);
    }
}
