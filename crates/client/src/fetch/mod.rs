//! Outbound fetch pipeline.
//!
//! ### Request path
//! - Shorthand URLs (see [`UrlShortener`]) are expanded first.
//! - Every network call holds a [`RequestSlot`] and runs inside
//!   [`with_backoff`].
//! - 404 maps to `NotFound` (never retried); 429 lowers the throttle ceiling
//!   and maps to `RateLimited` (retried).
//!
//! ### Content caching
//! - Disk tier: checked before the network, written after success.
//! - Object-store tier: image URLs only; holds recompressed copies keyed by
//!   the URL without its scheme and tagged with the origin ETag.
//!
//! Cache tier failures are logged and never fail the fetch.

pub mod backoff;
pub mod compress;
pub mod disk_cache;
pub mod object_store;
pub mod throttle;
pub mod url;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode, header};
use serde::de::DeserializeOwned;
use wikifetch_core::{AppConfig, Error};

pub use backoff::{BackoffConfig, IsRetryable, with_backoff};
pub use compress::{Compressed, CompressionPipeline, ImageCompressor};
pub use disk_cache::DiskCache;
pub use object_store::{ObjectStore, StoredObject};
pub use throttle::{RequestSlot, RequestThrottle};
pub use url::{UrlShortener, is_image_url, strip_scheme};

/// Configuration for the content fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "wikifetch/0.1")
    pub user_agent: String,

    /// Per-request transport timeout (default: 60s)
    pub timeout: Duration,

    /// Initial in-flight request ceiling (default: 10)
    pub request_ceiling: usize,

    pub backoff: BackoffConfig,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "wikifetch/0.1".to_string(),
            timeout: Duration::from_secs(60),
            request_ceiling: 10,
            backoff: BackoffConfig::default(),
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            timeout: config.timeout(),
            request_ceiling: config.request_ceiling(),
            backoff: BackoffConfig {
                max_retries: config.max_retries,
                initial_delay: Duration::from_millis(config.initial_retry_delay_ms),
                max_delay: Duration::from_millis(config.max_retry_delay_ms),
                multiplier: 2.0,
                randomisation: config.retry_randomisation,
            },
        }
    }
}

/// Downloaded content with its response headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentResponse {
    pub content: Bytes,
    /// Lowercase header names.
    pub headers: BTreeMap<String, String>,
}

impl ContentResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag").map(String::as_str)
    }

    fn from_object(object: StoredObject) -> Self {
        let mut headers = BTreeMap::new();
        if let Some(content_type) = object.content_type {
            headers.insert("content-type".to_string(), content_type);
        }
        headers.insert("etag".to_string(), object.etag);
        headers.insert("content-length".to_string(), object.content.len().to_string());
        Self { content: object.content, headers }
    }
}

/// The only path from this crate to the network.
pub struct ContentFetcher {
    http: Client,
    config: FetchConfig,
    throttle: RequestThrottle,
    shortener: UrlShortener,
    disk_cache: Option<DiskCache>,
    object_store: Option<Arc<dyn ObjectStore>>,
    compression: CompressionPipeline,
}

impl ContentFetcher {
    /// Create a fetcher with no cache tiers and no compressors.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.timeout)
            .use_rustls_tls()
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::Http { status: None, message: format!("failed to build HTTP client: {e}") })?;

        let throttle = RequestThrottle::new(config.request_ceiling);

        Ok(Self {
            http,
            config,
            throttle,
            shortener: UrlShortener::new(),
            disk_cache: None,
            object_store: None,
            compression: CompressionPipeline::new(),
        })
    }

    pub fn with_disk_cache(mut self, cache: DiskCache) -> Self {
        self.disk_cache = Some(cache);
        self
    }

    pub fn with_object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn with_compression(mut self, pipeline: CompressionPipeline) -> Self {
        self.compression = pipeline;
        self
    }

    pub fn throttle(&self) -> &RequestThrottle {
        &self.throttle
    }

    pub fn shortener(&self) -> &UrlShortener {
        &self.shortener
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// GET `url` and parse the body as JSON.
    ///
    /// A URL carrying `action=login` is sent as a form POST instead.
    pub async fn fetch_json(&self, url: &str) -> Result<serde_json::Value, Error> {
        self.fetch_json_as(url).await
    }

    /// Like [`fetch_json`](Self::fetch_json), decoding into `T`.
    pub async fn fetch_json_as<T: DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let url = self.shortener.deserialize(url);
        let _slot = self.throttle.claim().await?;
        with_backoff(&self.config.backoff, || self.request_json(&url)).await
    }

    /// Download `url` through the cache tiers.
    pub async fn fetch_content(&self, url: &str) -> Result<ContentResponse, Error> {
        let url = self.shortener.deserialize(url);

        if let Some(cache) = &self.disk_cache {
            match cache.read(&url).await {
                Ok(Some(hit)) => {
                    tracing::debug!(url = %url, "disk cache hit");
                    return Ok(hit);
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(url = %url, error = %e, "disk cache read failed, fetching"),
            }
        }

        let response = {
            let _slot = self.throttle.claim().await?;
            with_backoff(&self.config.backoff, || self.download(&url)).await?
        };

        if let Some(cache) = &self.disk_cache
            && let Err(e) = cache.write(&url, &response).await
        {
            tracing::warn!(url = %url, error = %e, "disk cache write failed");
        }

        Ok(response)
    }

    /// One attempt at producing content, consulting the object store for images.
    async fn download(&self, url: &str) -> Result<ContentResponse, Error> {
        let Some(store) = self.object_store.as_ref().filter(|_| is_image_url(url)) else {
            let origin = self.fetch_origin(url).await?;
            return Ok(self.compress_if_image(&origin).await.unwrap_or(origin));
        };

        let key = strip_scheme(url);
        match store.download(key).await {
            Ok(Some(object)) => {
                tracing::debug!(url = %url, "object store hit");
                return Ok(ContentResponse::from_object(object));
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(url = %url, error = %e, "object store download failed, fetching origin"),
        }

        let origin = self.fetch_origin(url).await?;
        let Some(compressed) = self.compress_if_image(&origin).await else {
            return Ok(origin);
        };

        match origin.etag() {
            Some(etag) => {
                if let Err(e) = store
                    .upload(key, &compressed.content, etag, compressed.content_type())
                    .await
                {
                    tracing::warn!(url = %url, error = %e, "object store upload failed");
                }
            }
            None => tracing::debug!(url = %url, "origin sent no etag, skipping object store upload"),
        }

        Ok(compressed)
    }

    /// Compressed copy of `origin` when it is an image and compression helped.
    async fn compress_if_image(&self, origin: &ContentResponse) -> Option<ContentResponse> {
        let content_type = origin.content_type()?;
        if !compress::is_image_mime(content_type) {
            return None;
        }
        match self.compression.compress(content_type, origin.content.clone()).await {
            Compressed::Smaller(content) => {
                let mut headers = origin.headers.clone();
                headers.insert("content-length".to_string(), content.len().to_string());
                Some(ContentResponse { content, headers })
            }
            Compressed::Unchanged => None,
        }
    }

    async fn fetch_origin(&self, url: &str) -> Result<ContentResponse, Error> {
        let response = self.http.get(url).send().await.map_err(transport_error)?;
        let response = self.check_status(url, response)?;

        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();
        let content = response.bytes().await.map_err(transport_error)?;

        tracing::debug!(url = %url, bytes = content.len(), "fetched from origin");
        Ok(ContentResponse { content, headers })
    }

    async fn request_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, Error> {
        let (request, shown) = self.json_request(url)?;
        let response = request.send().await.map_err(transport_error)?;
        let response = self.check_status(&shown, response)?;
        let body = response.bytes().await.map_err(transport_error)?;
        serde_json::from_slice(&body).map_err(|e| Error::Parse(format!("{shown}: {e}")))
    }

    /// Request for `url` plus the form of the URL that is safe to put in errors.
    ///
    /// Login calls are sent as a form POST so credentials stay out of the
    /// request line and out of error messages.
    fn json_request(&self, url: &str) -> Result<(RequestBuilder, String), Error> {
        let parsed = ::url::Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        let is_login = parsed.query_pairs().any(|(k, v)| k == "action" && v == "login");
        if !is_login {
            let request = self.http.get(parsed).header(header::ACCEPT, "application/json");
            return Ok((request, url.to_string()));
        }

        let form: Vec<(String, String)> = parsed.query_pairs().into_owned().collect();
        let mut endpoint = parsed;
        endpoint.set_query(None);
        let shown = endpoint.to_string();
        Ok((self.http.post(endpoint).form(&form), shown))
    }

    fn check_status(&self, url: &str, response: Response) -> Result<Response, Error> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::NOT_FOUND => Err(Error::NotFound(url.to_string())),
            StatusCode::TOO_MANY_REQUESTS => {
                let ceiling = self.throttle.shrink();
                Err(Error::RateLimited(format!("{url} (ceiling now {ceiling})")))
            }
            _ => Err(Error::Http { status: Some(status.as_u16()), message: format!("status {} for {url}", status.as_u16()) }),
        }
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::FetchTimeout(e.to_string())
    } else {
        Error::Http { status: e.status().map(|s| s.as_u16()), message: format!("network error: {e}") }
    }
}
