//! Resumable namespace walk.
//!
//! Article records land in the `articleDetail` table. Per-namespace progress
//! (the next `allpages` marker) is stored in `namespaceProgress` after every
//! batch, so a restarted run picks up where the last one stopped.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use wikifetch_client::{ArticleRecord, RunContext, WikiClient};
use wikifetch_core::{Error, ResumableStore, StateDb};

pub const NAMESPACE_PROGRESS: &str = "namespaceProgress";
pub const ARTICLE_DETAIL: &str = "articleDetail";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamespaceProgress {
    #[serde(default)]
    pub gapcontinue: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub articles: u64,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Walk every mirrored namespace to completion, resuming saved progress.
///
/// Returns the number of article records written in this run.
pub async fn walk_namespaces(wiki: &WikiClient, run: &RunContext, db: &StateDb) -> Result<u64, Error> {
    let progress = ResumableStore::new(db.clone(), NAMESPACE_PROGRESS);
    let details = ResumableStore::new(db.clone(), ARTICLE_DETAIL);
    let mut written = 0;

    for ns in wiki.metadata().mirrored_ids() {
        let key = ns.to_string();
        let mut state: NamespaceProgress = progress.get(&key).await?.unwrap_or_default();
        if state.done {
            tracing::info!(ns, articles = state.articles, "namespace already walked, skipping");
            continue;
        }
        if let Some(marker) = &state.gapcontinue {
            tracing::info!(ns, from = %marker, "resuming namespace walk");
        }

        loop {
            let page = wiki
                .get_article_details_ns(run, ns, state.gapcontinue.as_deref())
                .await?;
            let count = page.details.len() as u64;
            details.set_many(page.details).await?;

            state.articles += count;
            state.done = page.gapcontinue.is_none();
            state.gapcontinue = page.gapcontinue;
            state.updated_at = Some(Utc::now().to_rfc3339());
            progress.set(&key, &state).await?;

            written += count;
            tracing::debug!(ns, batch = count, total = state.articles, "stored namespace batch");
            if state.done {
                tracing::info!(ns, articles = state.articles, "namespace walk complete");
                break;
            }
        }
    }

    Ok(written)
}

/// Count stored articles per namespace with one concurrent pass.
pub async fn summarize(db: &StateDb, workers: usize, batch_size: usize) -> Result<BTreeMap<i64, u64>, Error> {
    let details = ResumableStore::new(db.clone(), ARTICLE_DETAIL).with_scan_batch_size(batch_size);
    let counts = Mutex::new(BTreeMap::new());

    details
        .iterate_items(workers, |batch: BTreeMap<String, ArticleRecord>, worker| {
            let mut counts = counts.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            for record in batch.values() {
                *counts.entry(record.ns.unwrap_or_default()).or_insert(0) += 1;
            }
            tracing::trace!(worker, size = batch.len(), "counted batch");
            async { Ok(()) }
        })
        .await?;

    Ok(counts.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner))
}
