//! Client code for wikifetch.
//!
//! This crate provides the throttled fetch pipeline with its cache tiers and
//! the wiki query engine built on top of it.

pub mod fetch;
pub mod wiki;

pub use fetch::{
    BackoffConfig, CompressionPipeline, ContentFetcher, ContentResponse, DiskCache, FetchConfig, ImageCompressor,
    ObjectStore, RequestThrottle, UrlShortener,
};
pub use wiki::{
    ArticleDetails, ArticleRecord, ArticleRenderer, BackendCapabilities, NamespacePage, RunContext, WikiClient,
    WikiMetadata, WikiOptions,
};
