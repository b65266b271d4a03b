//! Continuation-driven article metadata queries.
//!
//! Each loop iteration sends the base query plus the markers of the token
//! that came back with the previous page. Pages are merged into one
//! accumulator. A page fetched to continue some modules only contributes
//! those modules' fields, so data finalized earlier is never replayed.
//! The last page is merged whole.

use serde_json::Value;
use wikifetch_core::Error;

use super::WikiClient;
use super::capabilities::{BackendCapabilities, RunContext};
use super::continuation::{ContinuationToken, PAGE_ENUMERATION, Whitelist};
use super::record::{ArticleDetails, ArticleRecord, PageRef, merge_details};
use super::response::{QueryResponse, normalize};

/// Namespace id of category pages.
pub const CATEGORY_NAMESPACE: i64 = 14;

/// One step of a namespace walk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamespacePage {
    pub details: ArticleDetails,
    /// Marker for the next `allpages` batch; `None` once the namespace is exhausted.
    pub gapcontinue: Option<String>,
}

type Params = Vec<(String, String)>;

fn param(key: &str, value: impl Into<String>) -> (String, String) {
    (key.to_string(), value.into())
}

impl WikiClient {
    /// Shared property set for both query variants.
    pub(crate) fn base_query(&self, capabilities: &BackendCapabilities, with_thumbnails: bool) -> Params {
        let mut props = vec!["redirects", "revisions"];
        if with_thumbnails {
            props.push("pageimages");
        }
        if capabilities.coordinates_available {
            props.push("coordinates");
        }
        if self.metadata.get_categories {
            props.push("categories");
        }

        let rdnamespace = self
            .metadata
            .mirrored_ids()
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join("|");

        let mut params = vec![
            param("action", "query"),
            param("format", "json"),
            param("formatversion", "2"),
            param("prop", props.join("|")),
            param("rdlimit", "max"),
            param("rdnamespace", rdnamespace),
        ];
        if capabilities.coordinates_available {
            params.push(param("colimit", "max"));
        }
        if self.metadata.get_categories {
            params.push(param("cllimit", "max"));
            params.push(param("clshow", "!hidden"));
        }
        params
    }

    pub(crate) fn api_url(&self, params: &[(String, String)]) -> Result<String, Error> {
        url::Url::parse_with_params(&self.metadata.api_url, params)
            .map(String::from)
            .map_err(|e| Error::InvalidUrl(format!("{}: {e}", self.metadata.api_url)))
    }

    async fn query(&self, params: &[(String, String)]) -> Result<QueryResponse, Error> {
        let resp: QueryResponse = self.fetcher.fetch_json_as(&self.api_url(params)?).await?;
        resp.check()?;
        Ok(resp)
    }

    /// Metadata for the given titles, following `continue` until exhausted.
    ///
    /// A database-class API error aborts the whole query.
    pub async fn get_article_details_ids<S: AsRef<str>>(
        &self, run: &RunContext, titles: &[S], with_thumbnails: bool,
    ) -> Result<ArticleDetails, Error> {
        if titles.is_empty() {
            return Ok(ArticleDetails::new());
        }
        let titles = titles.iter().map(AsRef::as_ref).collect::<Vec<_>>().join("|");

        let mut acc = ArticleDetails::new();
        let mut token: Option<ContinuationToken> = None;
        let mut pages = 0u32;

        loop {
            let mut params = self.base_query(&run.capabilities, with_thumbnails);
            params.push(param("titles", titles.clone()));
            if let Some(token) = &token {
                params.extend(token.params());
            }

            let resp = self.query(&params).await?;
            pages += 1;
            let page = resp.query.map(normalize).unwrap_or_default();
            let next = ContinuationToken::composite(resp.continuation);

            merge_page(&mut acc, page, token.as_ref(), next.is_none());
            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        self.add_subcategories(&mut acc).await?;
        tracing::debug!(pages, articles = acc.len(), "article detail query complete");
        Ok(acc)
    }

    /// One `allpages` batch of namespace `ns`, starting at `gapcontinue`.
    ///
    /// Per-module continuation is followed inside the batch; the returned
    /// marker lets the caller resume the namespace walk later.
    pub async fn get_article_details_ns(
        &self, run: &RunContext, ns: i64, gapcontinue: Option<&str>,
    ) -> Result<NamespacePage, Error> {
        let mut acc = ArticleDetails::new();
        let mut token: Option<ContinuationToken> = None;
        let mut next_batch = None;

        loop {
            let mut params = self.base_query(&run.capabilities, false);
            params.extend([
                param("rawcontinue", "true"),
                param("generator", "allpages"),
                param("gapfilterredir", "nonredirects"),
                param("gaplimit", "max"),
                param("gapnamespace", ns.to_string()),
            ]);
            if let Some(gap) = gapcontinue {
                params.push(param("gapcontinue", gap));
            }
            if let Some(token) = &token {
                params.extend(token.params());
            }

            let resp = self.query(&params).await?;
            let page = resp.query.map(normalize).unwrap_or_default();

            if let Some(marker) = resp
                .query_continue
                .as_ref()
                .and_then(|qc| qc.get(PAGE_ENUMERATION))
                .and_then(|m| m.get("gapcontinue"))
            {
                next_batch = Some(match marker {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                });
            }

            let next = ContinuationToken::per_module(resp.query_continue);
            merge_page(&mut acc, page, token.as_ref(), next.is_none());
            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        self.add_subcategories(&mut acc).await?;
        tracing::debug!(ns, articles = acc.len(), next = ?next_batch, "namespace batch complete");
        Ok(NamespacePage { details: acc, gapcontinue: next_batch })
    }

    /// Attach subcategory members to every category page in `acc`.
    async fn add_subcategories(&self, acc: &mut ArticleDetails) -> Result<(), Error> {
        if !self.metadata.get_categories {
            return Ok(());
        }
        for (title, record) in acc.iter_mut() {
            if record.ns != Some(CATEGORY_NAMESPACE) {
                continue;
            }
            let members = self.get_subcategories(title).await?;
            record.merge(ArticleRecord { subcategories: Some(members), ..Default::default() });
        }
        Ok(())
    }

    /// Subcategories of `category`, following `cmcontinue`.
    pub async fn get_subcategories(&self, category: &str) -> Result<Vec<PageRef>, Error> {
        let mut members = Vec::new();
        let mut token: Option<ContinuationToken> = None;

        loop {
            let mut params = vec![
                param("action", "query"),
                param("format", "json"),
                param("formatversion", "2"),
                param("list", "categorymembers"),
                param("cmtype", "subcat"),
                param("cmlimit", "max"),
                param("cmtitle", category),
            ];
            if let Some(token) = &token {
                params.extend(token.params());
            }

            let resp = self.query(&params).await?;
            if let Some(query) = resp.query {
                members.extend(query.categorymembers.into_iter().filter_map(|m| m.into_page_ref()));
            }

            token = ContinuationToken::composite(resp.continuation);
            if token.is_none() {
                break;
            }
        }
        Ok(members)
    }
}

/// Merge one page, keeping only the continued modules when the page was
/// requested to continue them and more pages follow.
fn merge_page(acc: &mut ArticleDetails, mut page: ArticleDetails, requested_by: Option<&ContinuationToken>, last: bool) {
    if let Some(token) = requested_by
        && !last
    {
        match token.whitelist() {
            Whitelist::Modules(modules) => {
                for record in page.values_mut() {
                    record.retain_modules(&modules);
                }
            }
            Whitelist::Everything { unmapped } => {
                tracing::warn!(?unmapped, "continuation names modules with no field mapping, keeping whole page");
            }
        }
    }
    merge_details(acc, page);
}
