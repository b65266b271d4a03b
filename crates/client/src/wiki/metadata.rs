//! Wiki-level facts needed to build queries and endpoint URLs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;
use wikifetch_core::Error;

use crate::fetch::ContentFetcher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub id: i64,
    pub is_content: bool,
    pub allowed_subpages: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiMetadata {
    /// Wiki root, always ending in `/`.
    pub base_url: String,
    /// Full action API URL.
    pub api_url: String,
    /// Main page title with underscores.
    pub main_page: String,
    pub namespaces: BTreeMap<String, Namespace>,
    /// Names of the namespaces whose articles are mirrored.
    pub namespaces_to_mirror: Vec<String>,
    pub get_categories: bool,
}

#[derive(Debug, Deserialize)]
struct SiteInfoResponse {
    query: SiteInfo,
}

#[derive(Debug, Deserialize)]
struct SiteInfo {
    general: General,
    namespaces: BTreeMap<String, RawNamespace>,
}

#[derive(Debug, Deserialize)]
struct General {
    mainpage: String,
}

#[derive(Debug, Deserialize)]
struct RawNamespace {
    id: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    content: bool,
    #[serde(default)]
    subpages: bool,
}

impl WikiMetadata {
    /// Metadata with only the main namespace mirrored.
    pub fn new(wiki_url: &str, api_path: &str, main_page: &str) -> Result<Self, Error> {
        let base_url = base_url(wiki_url)?;
        let api_url = join(&base_url, api_path)?;
        let mut namespaces = BTreeMap::new();
        namespaces.insert(String::new(), Namespace { id: 0, is_content: true, allowed_subpages: false });
        Ok(Self {
            base_url,
            api_url,
            main_page: main_page.replace(' ', "_"),
            namespaces,
            namespaces_to_mirror: vec![String::new()],
            get_categories: false,
        })
    }

    pub fn with_categories(mut self, get_categories: bool) -> Self {
        self.get_categories = get_categories;
        self
    }

    /// Load main page and namespaces from the `siteinfo` API.
    pub async fn fetch(
        fetcher: &ContentFetcher, wiki_url: &str, api_path: &str, get_categories: bool,
    ) -> Result<Self, Error> {
        let mut metadata = Self::new(wiki_url, api_path, "")?.with_categories(get_categories);
        let url = Url::parse_with_params(
            &metadata.api_url,
            [
                ("action", "query"),
                ("meta", "siteinfo"),
                ("siprop", "general|namespaces"),
                ("format", "json"),
                ("formatversion", "2"),
            ],
        )
        .map_err(|e| Error::InvalidUrl(e.to_string()))?;

        let info: SiteInfoResponse = fetcher.fetch_json_as(url.as_str()).await?;

        metadata.main_page = info.query.general.mainpage.replace(' ', "_");
        metadata.namespaces = info
            .query
            .namespaces
            .into_values()
            .filter(|ns| ns.id >= 0)
            .map(|ns| (ns.name, Namespace { id: ns.id, is_content: ns.content, allowed_subpages: ns.subpages }))
            .collect();
        metadata.namespaces_to_mirror = metadata
            .namespaces
            .iter()
            .filter(|(_, ns)| ns.is_content)
            .map(|(name, _)| name.clone())
            .collect();

        tracing::info!(
            main_page = %metadata.main_page,
            namespaces = metadata.namespaces.len(),
            mirrored = ?metadata.namespaces_to_mirror,
            "loaded wiki metadata"
        );
        Ok(metadata)
    }

    /// Ids of the mirrored namespaces.
    pub fn mirrored_ids(&self) -> Vec<i64> {
        self.namespaces_to_mirror
            .iter()
            .filter_map(|name| self.namespaces.get(name))
            .map(|ns| ns.id)
            .collect()
    }

    /// Host name of the wiki, used by local rendering services.
    pub fn domain(&self) -> String {
        Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn mobile_url(&self) -> String {
        format!("{}api/rest_v1/page/mobile-sections/", self.base_url)
    }

    pub fn legacy_url(&self) -> String {
        format!("{}?action=visualeditor&mobileformat=html&format=json&paction=parse&page=", self.api_url)
    }

    pub fn local_mobile_url(&self) -> String {
        format!("http://localhost:6927/{}/v1/page/mobile-sections/", self.domain())
    }

    pub fn local_legacy_url(&self) -> String {
        format!("http://localhost:8000/{}/v3/page/pagebundle/", self.domain())
    }

    pub fn is_main_page(&self, article_id: &str) -> bool {
        article_id.replace(' ', "_") == self.main_page
    }
}

fn base_url(wiki_url: &str) -> Result<String, Error> {
    let url = Url::parse(wiki_url).map_err(|e| Error::InvalidUrl(format!("{wiki_url}: {e}")))?;
    let mut base = url.to_string();
    if !base.ends_with('/') {
        base.push('/');
    }
    Ok(base)
}

fn join(base_url: &str, path: &str) -> Result<String, Error> {
    let base = Url::parse(base_url).map_err(|e| Error::InvalidUrl(e.to_string()))?;
    base.join(path.trim_start_matches('/'))
        .map(|u| u.to_string())
        .map_err(|e| Error::InvalidUrl(format!("{path}: {e}")))
}
