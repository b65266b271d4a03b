//! Query engine for one wiki.
//!
//! [`WikiClient`] builds every metadata query, probes which rendering
//! backends work, and picks a backend per article fetch. All traffic goes
//! through the shared [`ContentFetcher`].

pub mod capabilities;
pub mod continuation;
pub mod metadata;
pub mod query;
pub mod record;
pub mod render;
pub mod response;

use std::sync::Arc;

use serde_json::Value;
use wikifetch_core::{AppConfig, Error};

use crate::fetch::ContentFetcher;

pub use capabilities::{BackendCapabilities, Endpoints, RunContext};
pub use continuation::{ContinuationToken, Module};
pub use metadata::{Namespace, WikiMetadata};
pub use query::{CATEGORY_NAMESPACE, NamespacePage};
pub use record::{ArticleDetails, ArticleRecord, PageRef, Revision, Thumbnail};
pub use render::ArticleRenderer;

/// Probe and fallback switches.
#[derive(Debug, Clone)]
pub struct WikiOptions {
    /// Switch to local rendering services when a remote endpoint is unusable.
    pub local_fallback: bool,
    /// Probe the legacy endpoint; when off it is assumed to work.
    pub probe_legacy: bool,
    pub local_mobile_url: Option<String>,
    pub local_legacy_url: Option<String>,
}

impl Default for WikiOptions {
    fn default() -> Self {
        Self { local_fallback: true, probe_legacy: true, local_mobile_url: None, local_legacy_url: None }
    }
}

impl From<&AppConfig> for WikiOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            local_fallback: config.local_fallback,
            probe_legacy: config.probe_legacy,
            local_mobile_url: config.local_mobile_url.clone(),
            local_legacy_url: config.local_legacy_url.clone(),
        }
    }
}

pub struct WikiClient {
    fetcher: Arc<ContentFetcher>,
    metadata: WikiMetadata,
    options: WikiOptions,
}

impl WikiClient {
    pub fn new(fetcher: Arc<ContentFetcher>, metadata: WikiMetadata, options: WikiOptions) -> Self {
        Self { fetcher, metadata, options }
    }

    pub fn metadata(&self) -> &WikiMetadata {
        &self.metadata
    }

    pub fn fetcher(&self) -> &ContentFetcher {
        &self.fetcher
    }

    /// Probe the rendering backends and coordinate support once.
    ///
    /// Probe failures never fail the run; they only turn capabilities off.
    pub async fn check_capabilities(&self) -> RunContext {
        let endpoints = Endpoints {
            mobile: self.metadata.mobile_url(),
            legacy: self.metadata.legacy_url(),
            mobile_local: false,
            legacy_local: false,
        };
        let mut run = RunContext::new(BackendCapabilities::default(), endpoints);
        let main_page = urlencoding::encode(&self.metadata.main_page).into_owned();

        let mobile = self.probe(&format!("{}{main_page}", run.endpoints.mobile), "/lead").await;
        run.capabilities.mobile_available = mobile;

        if self.options.probe_legacy {
            let legacy = self
                .probe(&format!("{}{main_page}", run.endpoints.legacy), "/visualeditor/content")
                .await;
            run.capabilities.legacy_available = legacy;
        }

        if self.options.local_fallback {
            if !run.capabilities.mobile_available {
                run.endpoints.mobile = self
                    .options
                    .local_mobile_url
                    .clone()
                    .unwrap_or_else(|| self.metadata.local_mobile_url());
                run.endpoints.mobile_local = true;
                tracing::info!(url = %run.endpoints.mobile, "using local mobile rendering service");
            }
            if !run.capabilities.legacy_available {
                run.endpoints.legacy = self
                    .options
                    .local_legacy_url
                    .clone()
                    .unwrap_or_else(|| self.metadata.local_legacy_url());
                run.endpoints.legacy_local = true;
                tracing::info!(url = %run.endpoints.legacy, "using local legacy rendering service");
            }
        }

        run.capabilities.coordinates_available = self.probe_coordinates().await;

        tracing::info!(capabilities = ?run.capabilities, "backend capabilities probed");
        run
    }

    /// Whether `url` answers with JSON that has something at `pointer`.
    async fn probe(&self, url: &str, pointer: &str) -> bool {
        match self.fetcher.fetch_json(url).await {
            Ok(body) => {
                let ok = body.pointer(pointer).is_some_and(|v| !v.is_null());
                if !ok {
                    tracing::warn!(url = %url, expected = pointer, "probe response is missing expected content");
                }
                ok
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "capability probe failed");
                false
            }
        }
    }

    async fn probe_coordinates(&self) -> bool {
        let mut params = self.base_query(&BackendCapabilities::default(), false);
        params.push(("titles".to_string(), self.metadata.main_page.clone()));

        let url = match self.api_url(&params) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(error = %e, "could not build coordinates probe");
                return false;
            }
        };
        match self.fetcher.fetch_json(&url).await {
            Ok(body) => {
                let warned = body
                    .get("warnings")
                    .is_some_and(|w| w.to_string().contains("coordinates"));
                if warned {
                    tracing::info!("coordinates are not available on this wiki");
                }
                !warned
            }
            Err(e) => {
                tracing::warn!(error = %e, "coordinates probe failed");
                false
            }
        }
    }

    /// Fetch one article and hand it to `renderer`.
    ///
    /// The legacy backend is used when forced, when the fallback latch is
    /// set, for the main page, or when no mobile backend is usable. A failed
    /// primary attempt (other than a 404) is retried once on the fallback.
    pub async fn get_article<R: ArticleRenderer>(
        &self, run: &RunContext, article_id: &str, renderer: &R, context: &R::Context, force_fallback: bool,
    ) -> Result<Vec<R::Output>, Error> {
        let use_fallback =
            force_fallback || run.fallback_latched() || self.metadata.is_main_page(article_id) || !run.mobile_usable();

        let (raw, used_fallback) = match self.fetch_article(run, article_id, use_fallback).await {
            Ok(raw) => (raw, use_fallback),
            Err(e) if use_fallback || e.is_not_found() => return Err(e),
            Err(e) => {
                tracing::warn!(article = %article_id, error = %e, "article fetch failed, retrying on fallback backend");
                (self.fetch_article(run, article_id, true).await?, true)
            }
        };

        renderer.render(raw, article_id, context, used_fallback).await
    }

    async fn fetch_article(&self, run: &RunContext, article_id: &str, fallback: bool) -> Result<Value, Error> {
        let base = if fallback { &run.endpoints.legacy } else { &run.endpoints.mobile };
        let url = format!("{base}{}", urlencoding::encode(article_id));
        let raw = self.fetcher.fetch_json(&url).await?;

        if let Some(message) = backend_error(&raw) {
            if !fallback {
                run.latch_fallback();
            }
            return Err(Error::RenderBackend(format!("{article_id}: {message}")));
        }
        Ok(raw)
    }

    /// Log in with a bot password; the session cookie is kept by the fetcher.
    pub async fn login(&self, username: &str, password: &str) -> Result<(), Error> {
        let token_params = [
            ("action", "query"),
            ("meta", "tokens"),
            ("type", "login"),
            ("format", "json"),
            ("formatversion", "2"),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string()));
        let body = self.fetcher.fetch_json(&self.api_url(&token_params)?).await?;
        let token = body
            .pointer("/query/tokens/logintoken")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::LoginFailed("no login token in response".into()))?;

        let login_params = [
            ("action", "login"),
            ("format", "json"),
            ("formatversion", "2"),
            ("lgname", username),
            ("lgpassword", password),
            ("lgtoken", token),
        ]
        .map(|(k, v)| (k.to_string(), v.to_string()));
        let body = self.fetcher.fetch_json(&self.api_url(&login_params)?).await?;

        match body.pointer("/login/result").and_then(Value::as_str) {
            Some("Success") => {
                tracing::info!(user = %username, "logged in");
                Ok(())
            }
            other => {
                let reason = body
                    .pointer("/login/reason")
                    .and_then(Value::as_str)
                    .or(other)
                    .unwrap_or("unknown result");
                Err(Error::LoginFailed(reason.to_string()))
            }
        }
    }
}

/// A structured error from a rendering backend, if `raw` is one.
fn backend_error(raw: &Value) -> Option<String> {
    if let Some(error) = raw.get("error").filter(|e| e.is_object()) {
        let info = error
            .get("info")
            .or_else(|| error.get("code"))
            .and_then(Value::as_str)
            .unwrap_or("api error");
        return Some(info.to_string());
    }
    if raw.get("type").and_then(Value::as_str) == Some("api_error") {
        let detail = raw
            .get("detail")
            .or_else(|| raw.get("title"))
            .and_then(Value::as_str)
            .unwrap_or("api_error");
        return Some(detail.to_string());
    }
    None
}

#[cfg(test)]
mod tests;
