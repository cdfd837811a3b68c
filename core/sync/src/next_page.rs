//! Serializes next-page requests for the active search query.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use reposync_common::{Resource, Result, Status};

use crate::repository::RepoRepository;

/// Source of next-page merges.
#[async_trait]
pub trait NextPageFetcher: Send + Sync + 'static {
    async fn fetch_next_page(&self, query: &str) -> Result<Resource<bool>>;
}

#[async_trait]
impl NextPageFetcher for RepoRepository {
    async fn fetch_next_page(&self, query: &str) -> Result<Resource<bool>> {
        self.search_next_page(query).await
    }
}

/// Progress of next-page loading, as shown to the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadMoreState {
    pub is_running: bool,
    /// Last failure not yet taken by the consumer.
    pub error_message: Option<String>,
}

struct Job {
    generation: u64,
    cancel: CancellationToken,
}

struct Inner {
    /// Query of the running job, or of an exhausted query.
    query: Option<String>,
    job: Option<Job>,
    has_more: bool,
    generation: u64,
}

impl Inner {
    /// Cancel the running job. The query is kept only while exhausted.
    fn unregister(&mut self) {
        if let Some(job) = self.job.take() {
            job.cancel.cancel();
        }
        if self.has_more {
            self.query = None;
        }
    }

    fn reset(&mut self, state: &watch::Sender<LoadMoreState>) {
        self.unregister();
        self.query = None;
        self.has_more = true;
        state.send_replace(LoadMoreState::default());
    }
}

/// Runs at most one next-page merge at a time.
///
/// A request for the query already being loaded, or for a query known to
/// be exhausted, is ignored. A request for another query cancels the
/// running one. Failures are published once through
/// [`NextPageCoordinator::take_error`] and leave the query retryable.
pub struct NextPageCoordinator {
    fetcher: Arc<dyn NextPageFetcher>,
    inner: Arc<Mutex<Inner>>,
    state: Arc<watch::Sender<LoadMoreState>>,
}

impl NextPageCoordinator {
    pub fn new(fetcher: Arc<dyn NextPageFetcher>) -> Self {
        let (state, _) = watch::channel(LoadMoreState::default());
        Self {
            fetcher,
            inner: Arc::new(Mutex::new(Inner {
                query: None,
                job: None,
                has_more: true,
                generation: 0,
            })),
            state: Arc::new(state),
        }
    }

    /// Start loading the page after the persisted result of `query`.
    pub fn query_next_page(&self, query: &str) {
        let mut inner = self.inner.lock();
        if inner.query.as_deref() == Some(query) {
            return;
        }

        inner.unregister();
        inner.generation += 1;
        let generation = inner.generation;
        let cancel = CancellationToken::new();
        inner.query = Some(query.to_string());
        inner.job = Some(Job {
            generation,
            cancel: cancel.clone(),
        });
        self.state.send_replace(LoadMoreState {
            is_running: true,
            error_message: None,
        });
        drop(inner);

        debug!("Loading next page of {:?}", query);
        let fetcher = self.fetcher.clone();
        let shared = self.inner.clone();
        let state = self.state.clone();
        let query = query.to_string();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = fetcher.fetch_next_page(&query) => result,
            };

            let mut inner = shared.lock();
            if inner.job.as_ref().map(|job| job.generation) != Some(generation) {
                return;
            }

            match result {
                Ok(resource) => match resource.status {
                    Status::Success => {
                        inner.has_more = resource.data == Some(true);
                        inner.unregister();
                        state.send_replace(LoadMoreState::default());
                    }
                    Status::Error => {
                        inner.has_more = true;
                        inner.unregister();
                        state.send_replace(LoadMoreState {
                            is_running: false,
                            error_message: resource.message,
                        });
                    }
                    Status::None => inner.reset(&state),
                    Status::Loading => {
                        warn!("Next page of {:?} settled without a result", query);
                        inner.has_more = true;
                        inner.unregister();
                        state.send_replace(LoadMoreState::default());
                    }
                },
                Err(e) => {
                    error!("Next page of {:?} failed: {}", query, e);
                    inner.has_more = true;
                    inner.unregister();
                    state.send_replace(LoadMoreState {
                        is_running: false,
                        error_message: Some(e.to_string()),
                    });
                }
            }
        });
    }

    /// Cancel any running job and assume more pages exist again.
    pub fn reset(&self) {
        self.inner.lock().reset(&self.state);
    }

    /// Current state.
    pub fn state(&self) -> LoadMoreState {
        self.state.borrow().clone()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<LoadMoreState> {
        self.state.subscribe()
    }

    /// Read and clear the last failure.
    pub fn take_error(&self) -> Option<String> {
        let mut taken = None;
        self.state.send_if_modified(|state| {
            taken = state.error_message.take();
            taken.is_some()
        });
        taken
    }

    pub fn has_more(&self) -> bool {
        self.inner.lock().has_more
    }
}

impl Drop for NextPageCoordinator {
    fn drop(&mut self) {
        if let Some(job) = self.inner.lock().job.take() {
            job.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reposync_common::Error;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use tokio::time::timeout;

    /// Answers from a queue, each answer held until released.
    #[derive(Default)]
    struct ScriptedFetcher {
        answers: Mutex<VecDeque<Result<Resource<bool>>>>,
        release: Notify,
        calls: AtomicUsize,
        finished: AtomicUsize,
    }

    impl ScriptedFetcher {
        fn with(answers: Vec<Result<Resource<bool>>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                ..Self::default()
            })
        }
    }

    #[async_trait]
    impl NextPageFetcher for ScriptedFetcher {
        async fn fetch_next_page(&self, _query: &str) -> Result<Resource<bool>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            let answer = self.answers.lock().pop_front();
            answer.unwrap_or_else(|| Ok(Resource::none()))
        }
    }

    async fn wait_until_idle(coordinator: &NextPageCoordinator) -> LoadMoreState {
        let mut rx = coordinator.subscribe();
        let state = timeout(
            Duration::from_secs(1),
            rx.wait_for(|state| !state.is_running),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        state
    }

    async fn wait_for_calls(fetcher: &ScriptedFetcher, count: usize) {
        timeout(Duration::from_secs(1), async {
            while fetcher.calls.load(Ordering::SeqCst) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_success_with_more_pages() {
        let fetcher = ScriptedFetcher::with(vec![Ok(Resource::success(Some(true)))]);
        let coordinator = NextPageCoordinator::new(fetcher.clone());

        coordinator.query_next_page("q");
        assert!(coordinator.state().is_running);
        wait_for_calls(&fetcher, 1).await;
        fetcher.release.notify_one();

        assert_eq!(wait_until_idle(&coordinator).await, LoadMoreState::default());
        assert!(coordinator.has_more());
    }

    #[tokio::test]
    async fn test_unsettled_result_releases_query() {
        let fetcher = ScriptedFetcher::with(vec![
            Ok(Resource::loading(None)),
            Ok(Resource::success(Some(true))),
        ]);
        let coordinator = NextPageCoordinator::new(fetcher.clone());

        coordinator.query_next_page("q");
        wait_for_calls(&fetcher, 1).await;
        fetcher.release.notify_one();
        assert_eq!(wait_until_idle(&coordinator).await, LoadMoreState::default());
        assert!(coordinator.has_more());

        coordinator.query_next_page("q");
        assert!(coordinator.state().is_running);
        wait_for_calls(&fetcher, 2).await;
        fetcher.release.notify_one();
        wait_until_idle(&coordinator).await;
        assert_eq!(fetcher.finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ignores_same_query_while_running() {
        let fetcher = ScriptedFetcher::with(vec![Ok(Resource::success(Some(true)))]);
        let coordinator = NextPageCoordinator::new(fetcher.clone());

        coordinator.query_next_page("q");
        coordinator.query_next_page("q");
        wait_for_calls(&fetcher, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_query_is_noop_until_reset() {
        let fetcher = ScriptedFetcher::with(vec![
            Ok(Resource::success(Some(false))),
            Ok(Resource::success(Some(true))),
        ]);
        let coordinator = NextPageCoordinator::new(fetcher.clone());

        coordinator.query_next_page("q");
        wait_for_calls(&fetcher, 1).await;
        fetcher.release.notify_one();
        wait_until_idle(&coordinator).await;
        assert!(!coordinator.has_more());

        coordinator.query_next_page("q");
        assert!(!coordinator.state().is_running);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        coordinator.reset();
        assert!(coordinator.has_more());
        coordinator.query_next_page("q");
        wait_for_calls(&fetcher, 2).await;
    }

    #[tokio::test]
    async fn test_error_is_reported_once_and_retryable() {
        let fetcher = ScriptedFetcher::with(vec![Ok(Resource::error("boom", Some(true)))]);
        let coordinator = NextPageCoordinator::new(fetcher.clone());

        coordinator.query_next_page("q");
        wait_for_calls(&fetcher, 1).await;
        fetcher.release.notify_one();

        let state = wait_until_idle(&coordinator).await;
        assert_eq!(state.error_message.as_deref(), Some("boom"));
        assert!(coordinator.has_more());

        assert_eq!(coordinator.take_error().as_deref(), Some("boom"));
        assert_eq!(coordinator.take_error(), None);
        assert_eq!(coordinator.state().error_message, None);

        coordinator.query_next_page("q");
        wait_for_calls(&fetcher, 2).await;
    }

    #[tokio::test]
    async fn test_store_failure_is_reported() {
        let fetcher = ScriptedFetcher::with(vec![Err(Error::Storage("disk full".to_string()))]);
        let coordinator = NextPageCoordinator::new(fetcher.clone());

        coordinator.query_next_page("q");
        wait_for_calls(&fetcher, 1).await;
        fetcher.release.notify_one();

        let state = wait_until_idle(&coordinator).await;
        assert!(state.error_message.unwrap().contains("disk full"));
        assert!(coordinator.has_more());
    }

    #[tokio::test]
    async fn test_none_result_resets() {
        let fetcher = ScriptedFetcher::with(vec![Ok(Resource::none())]);
        let coordinator = NextPageCoordinator::new(fetcher.clone());

        coordinator.query_next_page("q");
        wait_for_calls(&fetcher, 1).await;
        fetcher.release.notify_one();

        assert_eq!(wait_until_idle(&coordinator).await, LoadMoreState::default());
        assert!(coordinator.has_more());
    }

    #[tokio::test]
    async fn test_new_query_cancels_running_job() {
        let fetcher = ScriptedFetcher::with(vec![Ok(Resource::success(Some(false)))]);
        let coordinator = NextPageCoordinator::new(fetcher.clone());

        coordinator.query_next_page("old");
        wait_for_calls(&fetcher, 1).await;
        coordinator.query_next_page("new");
        wait_for_calls(&fetcher, 2).await;

        fetcher.release.notify_one();
        wait_until_idle(&coordinator).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fetcher.finished.load(Ordering::SeqCst), 1);
        assert!(!coordinator.has_more());
    }

    #[tokio::test]
    async fn test_reset_cancels_running_job() {
        let fetcher = ScriptedFetcher::with(vec![Ok(Resource::error("late", Some(true)))]);
        let coordinator = NextPageCoordinator::new(fetcher.clone());

        coordinator.query_next_page("q");
        wait_for_calls(&fetcher, 1).await;
        coordinator.reset();
        assert_eq!(coordinator.state(), LoadMoreState::default());

        fetcher.release.notify_one();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fetcher.finished.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.take_error(), None);
    }
}
