//! Table invalidation tracking that turns point reads into reactive reads.

use futures::stream;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

use reposync_common::Result;

use crate::store::{Table, Watch};

/// Per-table commit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Versions([u64; Table::COUNT]);

impl Versions {
    fn get(&self, table: Table) -> u64 {
        self.0[table.index()]
    }
}

/// Publishes table invalidations after each commit.
///
/// Readers subscribe through [`InvalidationTracker::observe`], which re-runs
/// their query whenever one of the tables they depend on changes. Several
/// commits landing before a reader catches up are collapsed into one re-run.
#[derive(Debug, Clone)]
pub struct InvalidationTracker {
    tx: Arc<watch::Sender<Versions>>,
}

impl InvalidationTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Versions::default());
        Self { tx: Arc::new(tx) }
    }

    /// Mark tables as changed. Call after the commit is visible to readers.
    pub fn invalidate(&self, tables: &[Table]) {
        if tables.is_empty() {
            return;
        }
        self.tx.send_modify(|versions| {
            for table in tables {
                versions.0[table.index()] += 1;
            }
        });
    }

    /// Run `query` now and again after every invalidation of `tables`.
    ///
    /// The stream ends after yielding an error.
    pub fn observe<T, F, Fut>(&self, tables: &[Table], query: F) -> Watch<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let observer = Observer {
            rx: self.tx.subscribe(),
            tables: tables.to_vec(),
            seen: None,
            finished: false,
            query,
        };

        Box::pin(stream::unfold(observer, |mut observer| async move {
            if observer.finished {
                return None;
            }

            if let Some(seen) = observer.seen {
                loop {
                    if observer.rx.changed().await.is_err() {
                        return None;
                    }
                    let current = *observer.rx.borrow_and_update();
                    if observer
                        .tables
                        .iter()
                        .any(|table| current.get(*table) != seen.get(*table))
                    {
                        break;
                    }
                }
            }

            // Snapshot before querying so a commit racing the query
            // still triggers another run.
            observer.seen = Some(*observer.rx.borrow_and_update());
            let item = (observer.query)().await;
            if item.is_err() {
                observer.finished = true;
            }
            Some((item, observer))
        }))
    }
}

impl Default for InvalidationTracker {
    fn default() -> Self {
        Self::new()
    }
}

struct Observer<F> {
    rx: watch::Receiver<Versions>,
    tables: Vec<Table>,
    seen: Option<Versions>,
    finished: bool,
    query: F,
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use reposync_common::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    fn counting(tracker: &InvalidationTracker, tables: &[Table]) -> (Arc<AtomicU32>, Watch<u32>) {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let watch = tracker.observe(tables, move || {
            let counter = counter.clone();
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst)) }
        });
        (runs, watch)
    }

    #[tokio::test]
    async fn test_emits_initial_value() {
        let tracker = InvalidationTracker::new();
        let (_, mut watch) = counting(&tracker, &[Table::Repo]);

        assert_eq!(watch.next().await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reruns_after_invalidation() {
        let tracker = InvalidationTracker::new();
        let (_, mut watch) = counting(&tracker, &[Table::Repo]);
        watch.next().await;

        tracker.invalidate(&[Table::Repo]);
        assert_eq!(watch.next().await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ignores_unrelated_tables() {
        let tracker = InvalidationTracker::new();
        let (runs, mut watch) = counting(&tracker, &[Table::User]);
        watch.next().await;

        tracker.invalidate(&[Table::Repo]);
        assert!(timeout(Duration::from_millis(50), watch.next()).await.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_collapses_pending_invalidations() {
        let tracker = InvalidationTracker::new();
        let (_, mut watch) = counting(&tracker, &[Table::Repo]);
        watch.next().await;

        tracker.invalidate(&[Table::Repo]);
        tracker.invalidate(&[Table::Repo]);
        tracker.invalidate(&[Table::Repo]);

        assert_eq!(watch.next().await.unwrap().unwrap(), 1);
        assert!(timeout(Duration::from_millis(50), watch.next()).await.is_err());
    }

    #[tokio::test]
    async fn test_ends_after_error() {
        let tracker = InvalidationTracker::new();
        let mut watch: Watch<u32> = tracker.observe(&[Table::Repo], || async {
            Err(Error::Storage("broken".to_string()))
        });

        assert!(watch.next().await.unwrap().is_err());
        tracker.invalidate(&[Table::Repo]);
        assert!(watch.next().await.is_none());
    }
}
