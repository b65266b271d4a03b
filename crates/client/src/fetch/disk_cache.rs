//! Local disk cache tier.
//!
//! One file per resource named by [`url_cache_key`] of the full request URL,
//! plus a `<key>.headers` sibling holding the response headers as JSON.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use wikifetch_core::Error;
use wikifetch_core::cache::hash::url_cache_key;

use super::ContentResponse;

#[derive(Debug, Clone)]
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, url: &str) -> (PathBuf, PathBuf) {
        let key = url_cache_key(url);
        let body = self.dir.join(&key);
        let headers = self.dir.join(format!("{key}.headers"));
        (body, headers)
    }

    /// Cached response for `url`, or `None` when either file is absent.
    pub async fn read(&self, url: &str) -> Result<Option<ContentResponse>, Error> {
        let (body_path, headers_path) = self.paths(url);

        let content = match tokio::fs::read(&body_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::CacheIo(format!("{}: {e}", body_path.display()))),
        };
        let headers = match tokio::fs::read(&headers_path).await {
            Ok(raw) => serde_json::from_slice::<BTreeMap<String, String>>(&raw)
                .map_err(|e| Error::CacheIo(format!("{}: {e}", headers_path.display())))?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::CacheIo(format!("{}: {e}", headers_path.display()))),
        };

        Ok(Some(ContentResponse { content: Bytes::from(content), headers }))
    }

    /// Write `response` for `url`, creating the cache directory if needed.
    ///
    /// The body is written before the headers file, so a reader never sees
    /// headers without content.
    pub async fn write(&self, url: &str, response: &ContentResponse) -> Result<(), Error> {
        let (body_path, headers_path) = self.paths(url);
        let headers = serde_json::to_vec(&response.headers)?;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::CacheIo(format!("{}: {e}", self.dir.display())))?;
        tokio::fs::write(&body_path, &response.content)
            .await
            .map_err(|e| Error::CacheIo(format!("{}: {e}", body_path.display())))?;
        tokio::fs::write(&headers_path, headers)
            .await
            .map_err(|e| Error::CacheIo(format!("{}: {e}", headers_path.display())))?;

        Ok(())
    }
}
