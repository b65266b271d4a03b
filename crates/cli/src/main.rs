//! wikifetch entry point.
//!
//! Loads configuration from the environment, probes the wiki, then walks
//! every mirrored namespace into the state database. Logs go to stderr as
//! JSON.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;
use wikifetch_client::{ContentFetcher, DiskCache, FetchConfig, WikiClient, WikiMetadata, WikiOptions};
use wikifetch_core::{AppConfig, StateDb};

mod walk;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    tracing::info!(wiki = %config.wiki_url, ceiling = config.request_ceiling(), "starting wikifetch");

    let db = StateDb::open(&config.db_path)
        .await
        .with_context(|| format!("opening state database {}", config.db_path.display()))?;

    let mut fetcher = ContentFetcher::new(FetchConfig::from(&config))?;
    if let Some(dir) = &config.cache_dir {
        tracing::info!(dir = %dir.display(), "disk cache enabled");
        fetcher = fetcher.with_disk_cache(DiskCache::new(dir));
    }
    if config.optimisation_cache {
        tracing::info!("optimized media cache enabled");
        fetcher = fetcher.with_object_store(Arc::new(db.clone()));
    }
    let fetcher = Arc::new(fetcher);

    let metadata = WikiMetadata::fetch(&fetcher, &config.wiki_url, &config.api_path, config.get_categories)
        .await
        .context("fetching wiki metadata")?;
    let wiki = WikiClient::new(fetcher.clone(), metadata, WikiOptions::from(&config));

    if let Some((username, password)) = config.credentials() {
        wiki.login(username, password).await.context("logging in")?;
    }

    let run = wiki.check_capabilities().await;

    let written = walk::walk_namespaces(&wiki, &run, &db).await?;
    let counts = walk::summarize(&db, config.scan_workers, config.scan_batch_size).await?;
    for (ns, count) in &counts {
        tracing::info!(ns, count, "stored articles");
    }

    tracing::info!(
        written,
        ceiling = fetcher.throttle().ceiling(),
        fallback_latched = run.fallback_latched(),
        "wikifetch finished"
    );
    Ok(())
}
