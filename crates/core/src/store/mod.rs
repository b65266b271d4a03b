//! Resumable key-value store.
//!
//! A persistent hash table addressed by table name, used by pipeline stages
//! to record per-item state across restarts. Values are JSON-encoded unless
//! they serialize to a plain string, which is stored as-is.
//!
//! Full-table passes go through [`ResumableStore::iterate_items`], which
//! shares one cursor between any number of concurrent consumers (see
//! [`scan`]).

pub mod scan;

use std::collections::BTreeMap;
use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

use crate::Error;
use crate::cache::StateDb;

pub use scan::{CursorScan, ScanPage, drive_scan};

/// Keys requested per scan call unless overridden.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 100;

/// A value as it sits in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredValue {
    pub text: String,
    pub is_json: bool,
}

impl StoredValue {
    /// Encode a value: plain strings pass through, everything else becomes JSON text.
    pub fn encode<V: Serialize + ?Sized>(value: &V) -> Result<Self, Error> {
        match serde_json::to_value(value)? {
            serde_json::Value::String(text) => Ok(Self { text, is_json: false }),
            other => Ok(Self { text: other.to_string(), is_json: true }),
        }
    }

    pub fn decode<V: DeserializeOwned>(self) -> Result<V, Error> {
        if self.is_json {
            Ok(serde_json::from_str(&self.text)?)
        } else {
            Ok(serde_json::from_value(serde_json::Value::String(self.text))?)
        }
    }
}

/// Persistent hash table over one named table of the state database.
#[derive(Clone, Debug)]
pub struct ResumableStore {
    db: StateDb,
    table: String,
    batch_size: usize,
}

impl ResumableStore {
    pub fn new(db: StateDb, table: impl Into<String>) -> Self {
        Self { db, table: table.into(), batch_size: DEFAULT_SCAN_BATCH_SIZE }
    }

    /// Set the number of keys requested per scan call (minimum 1).
    pub fn with_scan_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub async fn get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, Error> {
        let table = self.table.clone();
        let key = key.to_string();
        let stored = self
            .db
            .conn
            .call(move |conn| -> Result<Option<StoredValue>, Error> {
                let result = conn.query_row(
                    "SELECT value, is_json FROM kv_items WHERE tbl = ?1 AND key = ?2",
                    params![table, key],
                    |row| Ok(StoredValue { text: row.get(0)?, is_json: row.get::<_, i32>(1)? == 1 }),
                );

                match result {
                    Ok(v) => Ok(Some(v)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)?;

        stored.map(StoredValue::decode).transpose()
    }

    /// Get several keys at once. Keys with no entry are absent from the result.
    pub async fn get_many<V: DeserializeOwned>(
        &self, keys: &[impl AsRef<str>],
    ) -> Result<BTreeMap<String, V>, Error> {
        let table = self.table.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        let rows = self
            .db
            .conn
            .call(move |conn| -> Result<Vec<(String, StoredValue)>, Error> {
                let mut stmt = conn.prepare("SELECT value, is_json FROM kv_items WHERE tbl = ?1 AND key = ?2")?;
                let mut found = Vec::with_capacity(keys.len());
                for key in keys {
                    let result = stmt.query_row(params![table, key], |row| {
                        Ok(StoredValue { text: row.get(0)?, is_json: row.get::<_, i32>(1)? == 1 })
                    });
                    match result {
                        Ok(v) => found.push((key, v)),
                        Err(rusqlite::Error::QueryReturnedNoRows) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Ok(found)
            })
            .await
            .map_err(Error::from)?;

        rows.into_iter().map(|(k, v)| Ok((k, v.decode()?))).collect()
    }

    pub async fn set<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<(), Error> {
        self.put_encoded(vec![(key.to_string(), StoredValue::encode(value)?)]).await
    }

    /// Write several entries in one transaction.
    pub async fn set_many<K, V>(&self, items: impl IntoIterator<Item = (K, V)>) -> Result<(), Error>
    where
        K: Into<String>,
        V: Serialize,
    {
        let encoded = items
            .into_iter()
            .map(|(k, v)| Ok((k.into(), StoredValue::encode(&v)?)))
            .collect::<Result<Vec<_>, Error>>()?;
        self.put_encoded(encoded).await
    }

    async fn put_encoded(&self, items: Vec<(String, StoredValue)>) -> Result<(), Error> {
        if items.is_empty() {
            return Ok(());
        }
        let table = self.table.clone();
        self.db
            .conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO kv_items (tbl, key, value, is_json) VALUES (?1, ?2, ?3, ?4)
                        ON CONFLICT(tbl, key) DO UPDATE SET
                            value = excluded.value,
                            is_json = excluded.is_json",
                    )?;
                    for (key, value) in &items {
                        stmt.execute(params![table, key, value.text, value.is_json as i32])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete the given keys. Returns how many entries were removed.
    pub async fn delete(&self, keys: &[impl AsRef<str>]) -> Result<u64, Error> {
        let table = self.table.clone();
        let keys: Vec<String> = keys.iter().map(|k| k.as_ref().to_string()).collect();
        self.db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let mut removed = 0;
                {
                    let mut stmt = tx.prepare("DELETE FROM kv_items WHERE tbl = ?1 AND key = ?2")?;
                    for key in &keys {
                        removed += stmt.execute(params![table, key])? as u64;
                    }
                }
                tx.commit()?;
                Ok(removed)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn exists(&self, key: &str) -> Result<bool, Error> {
        let table = self.table.clone();
        let key = key.to_string();
        self.db
            .conn
            .call(move |conn| -> Result<bool, Error> {
                let found: bool = conn.query_row(
                    "SELECT EXISTS(SELECT 1 FROM kv_items WHERE tbl = ?1 AND key = ?2)",
                    params![table, key],
                    |row| row.get(0),
                )?;
                Ok(found)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn keys(&self) -> Result<Vec<String>, Error> {
        let table = self.table.clone();
        self.db
            .conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT key FROM kv_items WHERE tbl = ?1 ORDER BY rowid")?;
                let keys = stmt
                    .query_map(params![table], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn len(&self) -> Result<u64, Error> {
        let table = self.table.clone();
        self.db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM kv_items WHERE tbl = ?1", params![table], |row| row.get(0))?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    pub async fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len().await? == 0)
    }

    /// Delete the whole table. Returns the number of removed entries.
    pub async fn flush(&self) -> Result<u64, Error> {
        let table = self.table.clone();
        self.db
            .conn
            .call(move |conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM kv_items WHERE tbl = ?1", params![table])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }

    /// Fetch the batch that follows `cursor`, still encoded.
    ///
    /// Cursor 0 starts a pass. The returned cursor is 0 once the table has
    /// been walked to the end.
    async fn scan_encoded(&self, cursor: u64, count: usize) -> Result<ScanPage<(String, StoredValue)>, Error> {
        let table = self.table.clone();
        let limit = count.max(1) as i64;
        let after = cursor as i64;
        let rows = self
            .db
            .conn
            .call(move |conn| -> Result<Vec<(i64, String, StoredValue)>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT rowid, key, value, is_json FROM kv_items
                    WHERE tbl = ?1 AND rowid > ?2 ORDER BY rowid LIMIT ?3",
                )?;
                let rows = stmt
                    .query_map(params![table, after, limit], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            StoredValue { text: row.get(2)?, is_json: row.get::<_, i32>(3)? == 1 },
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(Error::from)?;

        let next = match rows.last() {
            Some((rowid, _, _)) if rows.len() as i64 == limit => *rowid as u64,
            _ => 0,
        };
        Ok(ScanPage { cursor: next, items: rows.into_iter().map(|(_, k, v)| (k, v)).collect() })
    }

    /// Fetch and decode the batch that follows `cursor`.
    pub async fn scan<V: DeserializeOwned>(&self, cursor: u64, count: usize) -> Result<ScanPage<(String, V)>, Error> {
        let page = self.scan_encoded(cursor, count).await?;
        let items = page
            .items
            .into_iter()
            .map(|(k, v)| Ok((k, v.decode()?)))
            .collect::<Result<Vec<_>, Error>>()?;
        Ok(ScanPage { cursor: page.cursor, items })
    }

    /// Walk the whole table once with `num_workers` concurrent consumers.
    ///
    /// Every worker pulls batches from one shared cursor; scan calls are
    /// issued one at a time while `f` runs concurrently across workers.
    /// `f` receives the decoded batch and the worker id (`0..num_workers`).
    /// The first error from a scan or from `f` aborts the pass.
    pub async fn iterate_items<V, F, Fut>(&self, num_workers: usize, f: F) -> Result<(), Error>
    where
        V: DeserializeOwned,
        F: Fn(BTreeMap<String, V>, usize) -> Fut,
        Fut: Future<Output = Result<(), Error>>,
    {
        drive_scan(self, num_workers, self.batch_size, |items, worker| {
            let call = decode_batch::<V>(items).map(|batch| f(batch, worker));
            async move { call?.await }
        })
        .await
    }
}

fn decode_batch<V: DeserializeOwned>(items: Vec<(String, StoredValue)>) -> Result<BTreeMap<String, V>, Error> {
    items.into_iter().map(|(k, v)| Ok((k, v.decode()?))).collect()
}

#[async_trait::async_trait]
impl CursorScan for ResumableStore {
    type Item = (String, StoredValue);

    async fn scan_batch(&self, cursor: u64, count: usize) -> Result<ScanPage<Self::Item>, Error> {
        self.scan_encoded(cursor, count).await
    }
}
