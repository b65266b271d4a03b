//! Raw query API response shapes and their normalization into records.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;
use wikifetch_core::Error;

use super::record::{ArticleDetails, ArticleRecord, PageRef, Revision, Thumbnail};

/// Error code that aborts a paginated query outright.
pub const DB_QUERY_ERROR: &str = "internal_api_error_DBQueryError";

#[derive(Debug, Default, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub query: Option<RawQuery>,
    #[serde(default, rename = "continue")]
    pub continuation: Option<BTreeMap<String, Value>>,
    #[serde(default, rename = "query-continue")]
    pub query_continue: Option<BTreeMap<String, BTreeMap<String, Value>>>,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub warnings: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawQuery {
    #[serde(default)]
    pub normalized: Vec<Normalized>,
    #[serde(default)]
    pub pages: Option<RawPages>,
    #[serde(default)]
    pub categorymembers: Vec<RawMember>,
}

#[derive(Debug, Deserialize)]
pub struct Normalized {
    pub from: String,
    pub to: String,
}

/// `pages` is a list in formatversion 2 and an id-keyed object before that.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RawPages {
    List(Vec<RawPage>),
    ById(BTreeMap<String, RawPage>),
}

#[derive(Debug, Default, Deserialize)]
pub struct RawPage {
    #[serde(default)]
    pub ns: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub missing: Option<Value>,
    #[serde(default)]
    pub revisions: Option<Vec<RawRevision>>,
    #[serde(default)]
    pub coordinates: Option<Vec<RawCoordinate>>,
    #[serde(default)]
    pub thumbnail: Option<Thumbnail>,
    #[serde(default)]
    pub categories: Option<Vec<RawTitle>>,
    #[serde(default)]
    pub redirects: Option<Vec<RawTitle>>,
}

#[derive(Debug, Deserialize)]
pub struct RawRevision {
    #[serde(default)]
    pub revid: Option<u64>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawCoordinate {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
pub struct RawTitle {
    pub title: String,
}

#[derive(Debug, Deserialize)]
pub struct RawMember {
    #[serde(default)]
    pub pageid: Option<u64>,
    #[serde(default)]
    pub ns: i64,
    #[serde(default)]
    pub title: Option<String>,
}

impl RawMember {
    pub fn into_page_ref(self) -> Option<PageRef> {
        Some(PageRef { pageid: self.pageid, ns: self.ns, title: self.title? })
    }
}

impl QueryResponse {
    /// Log warnings and non-fatal errors; fail on a database-class error.
    pub fn check(&self) -> Result<(), Error> {
        if let Some(warnings) = &self.warnings {
            tracing::warn!(warnings = %warnings, "query api returned warnings");
        }
        if let Some(error) = &self.error {
            if error.code == DB_QUERY_ERROR {
                return Err(Error::ApiDatabase(format!("{}: {}", error.code, error.info)));
            }
            tracing::warn!(code = %error.code, info = %error.info, "query api returned an error");
        }
        Ok(())
    }
}

impl RawPage {
    fn into_record(self) -> ArticleRecord {
        let revision = self
            .revisions
            .and_then(|revs| revs.into_iter().next())
            .and_then(|rev| Some(Revision { id: rev.revid?, timestamp: rev.timestamp }));
        let coordinates = self
            .coordinates
            .and_then(|coords| coords.into_iter().next())
            .map(|c| format!("{};{}", c.lat, c.lon));

        ArticleRecord {
            ns: self.ns,
            revision,
            coordinates,
            thumbnail: self.thumbnail,
            categories: self.categories.map(titles),
            subcategories: None,
            redirects: self.redirects.map(titles),
            missing: self.missing.is_some(),
        }
    }
}

fn titles(list: Vec<RawTitle>) -> Vec<String> {
    list.into_iter().map(|t| t.title).collect()
}

/// Key each page by the title it was requested under, spaces as underscores.
pub fn normalize(query: RawQuery) -> ArticleDetails {
    let requested: HashMap<String, String> = query.normalized.into_iter().map(|n| (n.to, n.from)).collect();

    let pages = match query.pages {
        Some(RawPages::List(pages)) => pages,
        Some(RawPages::ById(pages)) => pages.into_values().collect(),
        None => Vec::new(),
    };

    let mut details = ArticleDetails::new();
    for mut page in pages {
        let title = page.title.take().unwrap_or_default();
        let id = requested.get(&title).cloned().unwrap_or(title);
        if id.is_empty() {
            tracing::warn!(ns = ?page.ns, "skipping page without a usable title");
            continue;
        }
        details.insert(id.replace(' ', "_"), page.into_record());
    }
    details
}
