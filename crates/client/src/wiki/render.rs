//! Render collaborator seam.

use async_trait::async_trait;
use serde_json::Value;
use wikifetch_core::Error;

/// Turns a raw article response into rendered output.
///
/// `used_fallback` tells the renderer which backend produced `raw`, since the
/// two document shapes differ.
#[async_trait]
pub trait ArticleRenderer: Send + Sync {
    /// Archive-level state the renderer needs (templates, writer handle, ...).
    type Context: Send + Sync;
    type Output: Send;

    async fn render(
        &self, raw: Value, article_id: &str, context: &Self::Context, used_fallback: bool,
    ) -> Result<Vec<Self::Output>, Error>;
}
