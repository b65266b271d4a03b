//! Object-store cache tier for optimized images.
//!
//! Keys are request URLs with the scheme stripped. Uploads carry the origin
//! ETag the optimized copy was derived from.

use async_trait::async_trait;
use bytes::Bytes;
use wikifetch_core::{Error, StateDb};

/// An optimized copy held by the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub content: Bytes,
    pub etag: String,
    pub content_type: Option<String>,
}

/// Conditional download plus ETag-tagged upload.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn download(&self, key: &str) -> Result<Option<StoredObject>, Error>;

    async fn upload(&self, key: &str, content: &[u8], etag: &str, content_type: Option<&str>) -> Result<(), Error>;
}

/// Drop a weak-validator prefix (`W/`) from an ETag.
pub fn normalize_etag(etag: &str) -> &str {
    etag.strip_prefix("W/").unwrap_or(etag)
}

fn checked_key(key: &str) -> Result<&str, Error> {
    if key.is_empty() {
        return Err(Error::ObjectStore("empty object key".into()));
    }
    Ok(key)
}

fn store_error(key: &str, e: Error) -> Error {
    Error::ObjectStore(format!("{key}: {e}"))
}

#[async_trait]
impl ObjectStore for StateDb {
    async fn download(&self, key: &str) -> Result<Option<StoredObject>, Error> {
        let key = checked_key(key)?;
        let entry = self.get_media(key).await.map_err(|e| store_error(key, e))?;
        Ok(entry.map(|entry| StoredObject {
            content: Bytes::from(entry.content),
            etag: entry.etag,
            content_type: entry.content_type,
        }))
    }

    async fn upload(&self, key: &str, content: &[u8], etag: &str, content_type: Option<&str>) -> Result<(), Error> {
        let key = checked_key(key)?;
        self.put_media(key, normalize_etag(etag), content, content_type)
            .await
            .map_err(|e| store_error(key, e))
    }
}
