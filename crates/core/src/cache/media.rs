//! Optimized media storage.
//!
//! Holds recompressed images keyed by their URL without the scheme, along
//! with the origin ETag the optimized copy was derived from. The client
//! crate exposes this table as an object-store tier.

use super::connection::StateDb;
use crate::Error;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// A stored optimized image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEntry {
    pub key: String,
    pub etag: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
    pub stored_at: String,
}

impl StateDb {
    /// Insert or replace the optimized copy for `key`.
    ///
    /// An existing entry is overwritten, including its ETag.
    pub async fn put_media(
        &self, key: &str, etag: &str, content: &[u8], content_type: Option<&str>,
    ) -> Result<(), Error> {
        let key = key.to_string();
        let etag = etag.to_string();
        let content = content.to_vec();
        let content_type = content_type.map(str::to_string);
        let stored_at = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO media_cache (key, etag, content, content_type, stored_at)
                    VALUES (?1, ?2, ?3, ?4, ?5)
                    ON CONFLICT(key) DO UPDATE SET
                        etag = excluded.etag,
                        content = excluded.content,
                        content_type = excluded.content_type,
                        stored_at = excluded.stored_at",
                    params![key, etag, content, content_type, stored_at],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get the optimized copy for `key`, if one was stored.
    pub async fn get_media(&self, key: &str) -> Result<Option<MediaEntry>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<MediaEntry>, Error> {
                let result = conn.query_row(
                    "SELECT key, etag, content, content_type, stored_at FROM media_cache WHERE key = ?1",
                    params![key],
                    |row| {
                        Ok(MediaEntry {
                            key: row.get(0)?,
                            etag: row.get(1)?,
                            content: row.get(2)?,
                            content_type: row.get(3)?,
                            stored_at: row.get(4)?,
                        })
                    },
                );

                match result {
                    Ok(entry) => Ok(Some(entry)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Delete entries stored more than `days` days ago.
    ///
    /// Returns the number of deleted entries.
    pub async fn purge_media_older_than(&self, days: i64) -> Result<u64, Error> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM media_cache WHERE stored_at < ?1", params![cutoff])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
