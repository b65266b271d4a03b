//! Shared-cursor scanning with concurrent consumers.
//!
//! One coordinator owns the cursor and answers batch requests from workers
//! over a channel, one request at a time. Workers process the batches they
//! receive concurrently. Once a scan reports cursor 0 the pass is over:
//! every later request gets an end-of-pass reply, so no further scan call
//! is issued and nobody restarts the cursor.

use std::future::Future;

use futures::future::try_join_all;
use tokio::sync::{mpsc, oneshot};

use crate::Error;

/// One batch returned by a cursor scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPage<T> {
    /// Cursor for the next call; 0 once the table has wrapped around.
    pub cursor: u64,
    pub items: Vec<T>,
}

/// A source that can be walked with a server-side cursor.
#[async_trait::async_trait]
pub trait CursorScan: Sync {
    type Item: Send;

    /// Return up to `count` items following `cursor`.
    async fn scan_batch(&self, cursor: u64, count: usize) -> Result<ScanPage<Self::Item>, Error>;
}

type BatchReply<T> = oneshot::Sender<Option<Vec<T>>>;

/// Run one full pass over `source` with `num_workers` consumers.
///
/// `f` gets each non-empty batch plus the id of the worker that pulled it.
/// All futures run on the calling task. The first error from the source or
/// from `f` ends the pass.
pub async fn drive_scan<S, F, Fut>(source: &S, num_workers: usize, batch_size: usize, f: F) -> Result<(), Error>
where
    S: CursorScan,
    F: Fn(Vec<S::Item>, usize) -> Fut,
    Fut: Future<Output = Result<(), Error>>,
{
    if num_workers == 0 {
        return Err(Error::InvalidInput("num_workers must be at least 1".into()));
    }

    let (tx, rx) = mpsc::channel::<BatchReply<S::Item>>(num_workers);

    let workers = (0..num_workers).map(|worker| {
        let tx = tx.clone();
        let f = &f;
        async move {
            loop {
                let (reply_tx, reply_rx) = oneshot::channel();
                if tx.send(reply_tx).await.is_err() {
                    break;
                }
                let Ok(Some(batch)) = reply_rx.await else {
                    break;
                };
                if batch.is_empty() {
                    continue;
                }
                tracing::trace!(worker, size = batch.len(), "processing scan batch");
                f(batch, worker).await?;
            }
            tracing::debug!(worker, "scan worker finished");
            Ok::<(), Error>(())
        }
    });
    let workers = try_join_all(workers);
    drop(tx);

    tokio::try_join!(coordinate(source, batch_size, rx), workers)?;
    Ok(())
}

/// Serve batch requests until every worker has hung up.
async fn coordinate<S: CursorScan>(
    source: &S, batch_size: usize, mut requests: mpsc::Receiver<BatchReply<S::Item>>,
) -> Result<(), Error> {
    let mut cursor = 0;
    let mut finished = false;
    let mut scans = 0u64;

    while let Some(reply) = requests.recv().await {
        if finished {
            let _ = reply.send(None);
            continue;
        }

        let page = source.scan_batch(cursor, batch_size).await?;
        scans += 1;
        cursor = page.cursor;
        if cursor == 0 {
            finished = true;
            tracing::debug!(scans, "scan cursor wrapped around");
        }
        let _ = reply.send(Some(page.items));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// In-memory cursor source over `0..total` that records call ordering.
    struct CountingSource {
        total: u64,
        scans: AtomicUsize,
        in_scan: AtomicBool,
        overlapped: AtomicBool,
        after_wrap: AtomicUsize,
        wrapped: AtomicBool,
    }

    impl CountingSource {
        fn new(total: u64) -> Self {
            Self {
                total,
                scans: AtomicUsize::new(0),
                in_scan: AtomicBool::new(false),
                overlapped: AtomicBool::new(false),
                after_wrap: AtomicUsize::new(0),
                wrapped: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl CursorScan for CountingSource {
        type Item = u64;

        async fn scan_batch(&self, cursor: u64, count: usize) -> Result<ScanPage<u64>, Error> {
            if self.in_scan.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            if self.wrapped.load(Ordering::SeqCst) {
                self.after_wrap.fetch_add(1, Ordering::SeqCst);
            }
            self.scans.fetch_add(1, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(1)).await;

            let end = (cursor + count as u64).min(self.total);
            let items: Vec<u64> = (cursor..end).collect();
            let next = if end >= self.total { 0 } else { end };
            if next == 0 {
                self.wrapped.store(true, Ordering::SeqCst);
            }
            self.in_scan.store(false, Ordering::SeqCst);
            Ok(ScanPage { cursor: next, items })
        }
    }

    #[tokio::test]
    async fn test_every_item_visited_for_any_worker_count() {
        for workers in [1, 2, 3, 8, 40] {
            let source = CountingSource::new(37);
            let seen = Mutex::new(Vec::new());
            drive_scan(&source, workers, 5, |batch, _worker| {
                seen.lock().unwrap().extend(batch);
                async { Ok(()) }
            })
            .await
            .unwrap();

            let mut seen = seen.into_inner().unwrap();
            seen.sort_unstable();
            seen.dedup();
            assert_eq!(seen, (0..37).collect::<Vec<_>>(), "workers={workers}");
        }
    }

    #[tokio::test]
    async fn test_no_scan_after_wraparound() {
        let source = CountingSource::new(10);
        drive_scan(&source, 6, 3, |_batch, _worker| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(source.after_wrap.load(Ordering::SeqCst), 0);
        assert_eq!(source.scans.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_scans_never_overlap() {
        let source = CountingSource::new(200);
        drive_scan(&source, 8, 7, |_batch, _worker| async {
            tokio::task::yield_now().await;
            Ok(())
        })
        .await
        .unwrap();

        assert!(!source.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_batches_processed_concurrently() {
        let source = CountingSource::new(40);
        let active = &AtomicUsize::new(0);
        let peak = &AtomicUsize::new(0);
        drive_scan(&source, 4, 5, move |_batch, _worker| async move {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak > 1, "expected overlapping batches, peak={peak}");
        assert!(peak <= 4);
    }

    #[tokio::test]
    async fn test_zero_workers_rejected() {
        let source = CountingSource::new(1);
        let result = drive_scan(&source, 0, 1, |_batch, _worker| async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
