//! Cache-then-network reconciliation engine.
//!
//! A [`NetworkBoundResource`] describes one cached entity: how to read it
//! reactively from the local store, when it is stale, how to fetch it and
//! how to persist a fetched payload. [`as_stream`] drives that description
//! and exposes the outcome as a stream of [`Resource`] states.
//!
//! # Evaluation
//! For every value the local read yields:
//! - not stale: emit `Success(value)`
//! - stale: emit `Loading(value)` and fetch
//!   - success: persist; the write makes the local read yield again
//!   - empty: emit `Success(value)`
//!   - error: call `on_fetch_failed`, emit `Error(message, value)`
//!
//! A newer local value drops the evaluation of the previous one, which
//! abandons its fetch, unless that fetch is already persisting: the newer
//! value is then the product of our own write, so the persist is awaited.
//! The first local value after a persist of our own is emitted as `Success`
//! without consulting `should_fetch`, so a write that leaves the cached
//! value stale cannot trigger a fetch loop.

use async_trait::async_trait;
use futures::future::{BoxFuture, Fuse, FusedFuture};
use futures::{FutureExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, warn};

use reposync_common::{Error, Resource, Result};
use reposync_remote::ApiResponse;
use reposync_storage::Watch;

/// One cached entity kept in sync with the remote.
#[async_trait]
pub trait NetworkBoundResource: Send + Sync + 'static {
    /// What the local store holds.
    type Value: Clone + Send + 'static;
    /// What the remote returns.
    type Payload: Send + 'static;

    /// Whether `cached` warrants a remote fetch.
    fn should_fetch(&self, cached: Option<&Self::Value>) -> bool;

    /// Reactive read of the cached value.
    fn load_local(&self) -> Watch<Option<Self::Value>>;

    async fn fetch_remote(&self) -> ApiResponse<Self::Payload>;

    /// Write a fetched payload to the local store.
    async fn persist(&self, payload: Self::Payload, next_page: Option<u32>) -> Result<()>;

    /// Called after a failed fetch, before the error is emitted.
    fn on_fetch_failed(&self) {}
}

/// Resource states of one engine run.
///
/// Local store failures arrive as an `Err` item, after which the stream
/// ends. Dropping the stream stops the engine and abandons its fetch.
pub struct ResourceStream<T> {
    rx: mpsc::Receiver<Result<Resource<T>>>,
    _cancel: DropGuard,
}

impl<T> Stream for ResourceStream<T> {
    type Item = Result<Resource<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Start the engine for `resource` on the current tokio runtime.
///
/// Up to `capacity` states are buffered before the engine waits for the
/// consumer.
pub fn as_stream<R: NetworkBoundResource>(resource: R, capacity: usize) -> ResourceStream<R::Value> {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = CancellationToken::new();
    tokio::spawn(drive(Arc::new(resource), tx, cancel.clone()));

    ResourceStream {
        rx,
        _cancel: cancel.drop_guard(),
    }
}

enum Outcome<T> {
    Persisted,
    Unchanged(Option<T>),
    Failed { message: String, cached: Option<T> },
    StoreFailed(Error),
}

async fn evaluate<R: NetworkBoundResource>(
    resource: Arc<R>,
    cached: Option<R::Value>,
    persisting: Arc<AtomicBool>,
) -> Outcome<R::Value> {
    match resource.fetch_remote().await {
        ApiResponse::Success { body, next_page } => {
            persisting.store(true, Ordering::Release);
            match resource.persist(body, next_page).await {
                Ok(()) => Outcome::Persisted,
                Err(e) => Outcome::StoreFailed(e),
            }
        }
        ApiResponse::Empty => Outcome::Unchanged(cached),
        ApiResponse::Error { message } => {
            resource.on_fetch_failed();
            Outcome::Failed { message, cached }
        }
    }
}

async fn drive<R: NetworkBoundResource>(
    resource: Arc<R>,
    tx: mpsc::Sender<Result<Resource<R::Value>>>,
    cancel: CancellationToken,
) {
    let mut local = resource.load_local();
    let mut local_done = false;
    let mut evaluation: Fuse<BoxFuture<'static, Outcome<R::Value>>> = Fuse::terminated();
    let mut persisting = Arc::new(AtomicBool::new(false));
    let mut persisted = false;

    loop {
        let state = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = &mut evaluation, if !evaluation.is_terminated() => match outcome {
                Outcome::Persisted => {
                    persisted = true;
                    if local_done {
                        break;
                    }
                    continue;
                }
                Outcome::Unchanged(cached) => Ok(Resource::success(cached)),
                Outcome::Failed { message, cached } => {
                    warn!("Fetch failed: {}", message);
                    Ok(Resource::error(message, cached))
                }
                Outcome::StoreFailed(e) => Err(e),
            },
            item = local.next(), if !local_done => match item {
                Some(Ok(cached)) => {
                    let mut own_write = std::mem::take(&mut persisted);
                    let mut write_failed = None;
                    if !evaluation.is_terminated() && persisting.load(Ordering::Acquire) {
                        debug!("Local value changed during persist, awaiting it");
                        match (&mut evaluation).await {
                            Outcome::StoreFailed(e) => write_failed = Some(e),
                            _ => own_write = true,
                        }
                    }
                    evaluation = Fuse::terminated();

                    if let Some(e) = write_failed {
                        Err(e)
                    } else if own_write || !resource.should_fetch(cached.as_ref()) {
                        Ok(Resource::success(cached))
                    } else {
                        debug!("Cached value is stale, fetching");
                        persisting = Arc::new(AtomicBool::new(false));
                        evaluation = evaluate(resource.clone(), cached.clone(), persisting.clone())
                            .boxed()
                            .fuse();
                        Ok(Resource::loading(cached))
                    }
                }
                Some(Err(e)) => Err(e),
                None => {
                    local_done = true;
                    if evaluation.is_terminated() {
                        break;
                    }
                    continue;
                }
            },
        };

        let fatal = state.is_err();
        if let Err(e) = &state {
            error!("Local store failed: {}", e);
        }
        if tx.send(state).await.is_err() || fatal {
            break;
        }
        if local_done && evaluation.is_terminated() {
            break;
        }
    }
}
