//! Stable output streams over replaceable upstream sources.
//!
//! [`conflated`] builds a single-slot relay: the producer overwrites, the
//! consumer always receives the newest value. [`SwitchingSource`] forwards
//! one upstream at a time into such a relay, and [`KeyedSwitcher`] picks
//! the upstream from a key the consumer sets.

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use reposync_common::{Error, Result};

struct Slot<T> {
    value: Option<T>,
    closed: bool,
    error: Option<Error>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    notify: Notify,
}

/// Producing half of a conflated channel. Dropping it closes the channel.
pub struct ConflatedSender<T> {
    shared: Arc<Shared<T>>,
}

/// Consuming half of a conflated channel.
pub struct ConflatedReceiver<T> {
    shared: Arc<Shared<T>>,
}

/// Create a channel that holds at most one pending value.
pub fn conflated<T>() -> (ConflatedSender<T>, ConflatedReceiver<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            value: None,
            closed: false,
            error: None,
        }),
        notify: Notify::new(),
    });
    (
        ConflatedSender {
            shared: shared.clone(),
        },
        ConflatedReceiver { shared },
    )
}

impl<T> ConflatedSender<T> {
    /// Replace the pending value. Never waits.
    ///
    /// Returns false once the channel is closed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut slot = self.shared.slot.lock();
            if slot.closed {
                return false;
            }
            slot.value = Some(value);
        }
        self.shared.notify.notify_one();
        true
    }

    /// End the stream after any pending value, failing with `error` if given.
    pub fn close(&self, error: Option<Error>) {
        {
            let mut slot = self.shared.slot.lock();
            if slot.closed {
                return;
            }
            slot.closed = true;
            slot.error = error;
        }
        self.shared.notify.notify_one();
    }

    /// Publish `last`, then close.
    pub fn close_with(&self, last: T, error: Option<Error>) {
        self.set(last);
        self.close(error);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.slot.lock().closed
    }

    /// Drop the pending value, if any.
    pub(crate) fn clear(&self) {
        self.shared.slot.lock().value = None;
    }
}

impl<T> Drop for ConflatedSender<T> {
    fn drop(&mut self) {
        self.close(None);
    }
}

impl<T> ConflatedReceiver<T> {
    /// Wait for the newest value.
    ///
    /// Yields `Err` once if the channel was closed with an error, then
    /// `None`.
    pub async fn recv(&mut self) -> Option<Result<T>> {
        loop {
            {
                let mut slot = self.shared.slot.lock();
                if let Some(value) = slot.value.take() {
                    return Some(Ok(value));
                }
                if slot.closed {
                    return slot.error.take().map(Err);
                }
            }
            self.shared.notify.notified().await;
        }
    }
}

impl<T: Send + 'static> ConflatedReceiver<T> {
    pub fn into_stream(self) -> BoxStream<'static, Result<T>> {
        stream::unfold(self, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
        .boxed()
    }
}

impl<T> Drop for ConflatedReceiver<T> {
    fn drop(&mut self) {
        let mut slot = self.shared.slot.lock();
        slot.closed = true;
        slot.value = None;
    }
}

struct Active {
    generation: u64,
    cancel: Option<CancellationToken>,
}

impl Active {
    fn retire(&mut self) -> u64 {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.generation += 1;
        self.generation
    }
}

/// Forwards the current upstream into a conflated channel.
///
/// Replacing the upstream cancels the previous one and discards any of its
/// values the consumer has not received yet. An upstream error closes the
/// output with that error.
pub struct SwitchingSource<T> {
    sender: Arc<ConflatedSender<T>>,
    active: Arc<Mutex<Active>>,
}

impl<T: Send + 'static> SwitchingSource<T> {
    pub fn new() -> (Self, ConflatedReceiver<T>) {
        let (sender, receiver) = conflated();
        let source = Self {
            sender: Arc::new(sender),
            active: Arc::new(Mutex::new(Active {
                generation: 0,
                cancel: None,
            })),
        };
        (source, receiver)
    }

    /// Make `source` the upstream.
    pub fn replace(&self, source: BoxStream<'static, Result<T>>) {
        let cancel = CancellationToken::new();
        let generation = {
            let mut active = self.active.lock();
            let generation = active.retire();
            self.sender.clear();
            active.cancel = Some(cancel.clone());
            generation
        };
        debug!("Switched to source generation {}", generation);

        tokio::spawn(forward(
            source,
            self.sender.clone(),
            self.active.clone(),
            generation,
            cancel,
        ));
    }

    /// Drop the upstream without replacing it.
    pub fn detach(&self) {
        let mut active = self.active.lock();
        active.retire();
        self.sender.clear();
    }

    /// Whether the output is closed; no upstream can deliver again.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl<T> Drop for SwitchingSource<T> {
    fn drop(&mut self) {
        if let Some(cancel) = self.active.lock().cancel.take() {
            cancel.cancel();
        }
        self.sender.close(None);
    }
}

async fn forward<T>(
    mut source: BoxStream<'static, Result<T>>,
    sender: Arc<ConflatedSender<T>>,
    active: Arc<Mutex<Active>>,
    generation: u64,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = source.next() => item,
        };
        let Some(item) = item else {
            break;
        };

        // Checked under the lock so a replacement cannot slip in between.
        let delivered = {
            let active = active.lock();
            if active.generation != generation {
                false
            } else {
                match item {
                    Ok(value) => sender.set(value),
                    Err(e) => {
                        sender.close(Some(e));
                        false
                    }
                }
            }
        };
        if !delivered {
            break;
        }
    }
}

type SourceFactory<K, T> = Box<dyn Fn(&K) -> BoxStream<'static, Result<T>> + Send + Sync>;

/// Switches the upstream whenever the key changes.
pub struct KeyedSwitcher<K, T> {
    key: Mutex<Option<K>>,
    factory: SourceFactory<K, T>,
    source: SwitchingSource<T>,
}

impl<K, T> KeyedSwitcher<K, T>
where
    K: Clone + PartialEq + Send + 'static,
    T: Send + 'static,
{
    /// `factory` opens the upstream for a key.
    pub fn new<F>(factory: F) -> (Self, ConflatedReceiver<T>)
    where
        F: Fn(&K) -> BoxStream<'static, Result<T>> + Send + Sync + 'static,
    {
        let (source, receiver) = SwitchingSource::new();
        let switcher = Self {
            key: Mutex::new(None),
            factory: Box::new(factory),
            source,
        };
        (switcher, receiver)
    }

    /// Observe `key`.
    ///
    /// Returns false if it already was the key, or if the output was closed
    /// by an upstream error or a dropped receiver. The key is not recorded
    /// in the latter case.
    pub fn set_key(&self, key: K) -> bool {
        let mut current = self.key.lock();
        if current.as_ref() == Some(&key) || self.source.is_closed() {
            return false;
        }
        self.source.replace((self.factory)(&key));
        *current = Some(key);
        true
    }

    /// Reopen the upstream for the current key.
    pub fn retry(&self) {
        let current = self.key.lock();
        if let Some(key) = current.as_ref() {
            self.source.replace((self.factory)(key));
        }
    }

    /// Forget the key and drop the upstream.
    pub fn clear(&self) {
        *self.key.lock() = None;
        self.source.detach();
    }

    pub fn key(&self) -> Option<K> {
        self.key.lock().clone()
    }
}
