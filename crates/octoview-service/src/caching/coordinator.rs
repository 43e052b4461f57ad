use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{BoxFuture, FutureExt, Shared, TryFutureExt};
use parking_lot::Mutex;
use sentry::{Hub, SentryFutureExt};
use tokio::runtime::Handle;

use super::{CacheContents, CacheError, CacheKey, ImageStore};
use crate::types::Image;
use crate::utils::futures::CallOnDrop;

type FetchChannel = Shared<oneshot::Receiver<CacheContents<Image>>>;
type FetchMap = Arc<Mutex<BTreeMap<CacheKey, FetchChannel>>>;

/// The outcome of [`FetchCoordinator::get_or_start`].
pub(crate) enum Joined {
    /// The image showed up in the store in the meantime.
    Cached(Image),
    /// The caller attached to a fetch that was already running.
    Attached(BoxFuture<'static, CacheContents<Image>>),
    /// A new fetch was started on behalf of the caller.
    Started(BoxFuture<'static, CacheContents<Image>>),
}

/// Deduplicates concurrent fetches of the same key.
///
/// Every fetch runs in its own spawned task and publishes its result to all callers that joined
/// it. The pending map is only locked for lookups and insertions, never while a fetch is awaited.
///
/// Dropping a waiter, including the one that started the fetch, only detaches that waiter. The
/// fetch keeps running, and its result still ends up in the store.
#[derive(Clone)]
pub struct FetchCoordinator {
    store: ImageStore,
    pending: FetchMap,
}

impl std::fmt::Debug for FetchCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchCoordinator")
            .field("store", &self.store)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl FetchCoordinator {
    pub fn new(store: ImageStore) -> Self {
        Self {
            store,
            pending: Default::default(),
        }
    }

    /// Returns the result of the fetch for `key`, starting one with `start` if none is running.
    ///
    /// NOTE: This function itself is *not* `async`, because the fetch is spawned eagerly, even if
    /// the returned future is never awaited.
    ///
    /// Outside of a tokio runtime nothing can be spawned, and the returned future resolves to
    /// [`CacheError::InternalError`].
    pub fn join<F, Fut>(&self, key: &CacheKey, start: F) -> BoxFuture<'static, CacheContents<Image>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<Image>> + Send + 'static,
    {
        match self.get_or_start(key, start) {
            Ok(Joined::Cached(image)) => Box::pin(async move { Ok(image) }),
            Ok(Joined::Attached(future) | Joined::Started(future)) => future,
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }

    /// Whether a fetch for `key` is currently running.
    pub fn is_pending(&self, key: &CacheKey) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// The number of fetches currently running.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn get_or_start<F, Fut>(&self, key: &CacheKey, start: F) -> CacheContents<Joined>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CacheContents<Image>> + Send + 'static,
    {
        let mut pending = self.pending.lock();

        // A fetch that finished after the caller missed the store has already written its
        // result, as the store is populated before the pending entry goes away.
        if let Some(image) = self.store.get(key) {
            return Ok(Joined::Cached(image));
        }

        if let Some(channel) = pending.get(key) {
            metric!(counter("caches.channel.hit") += 1);
            tracing::trace!("Joining running fetch for `{}`", key);
            return Ok(Joined::Attached(wait(channel.clone())));
        }

        let runtime = Handle::try_current().map_err(CacheError::from_std_error)?;
        metric!(counter("caches.channel.miss") += 1);
        let channel = self.spawn_fetch(&runtime, key.clone(), start());
        let evicted = pending.insert(key.clone(), channel.clone());
        debug_assert!(evicted.is_none());

        Ok(Joined::Started(wait(channel)))
    }

    /// Spawns the fetch as a separate task and returns a channel that resolves to its result.
    ///
    /// Must be called with the pending map locked, so the entry is registered before the task
    /// can remove it again.
    fn spawn_fetch<Fut>(&self, runtime: &Handle, key: CacheKey, fetch: Fut) -> FetchChannel
    where
        Fut: Future<Output = CacheContents<Image>> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();

        let remove_fetch_token = {
            let key = key.clone();
            let pending = Arc::clone(&self.pending);
            CallOnDrop::new(move || {
                pending.lock().remove(&key);
            })
        };

        let store = self.store.clone();
        let task = async move {
            let result = fetch.await;
            if let Ok(image) = &result {
                store.insert(key, image.clone());
                metric!(gauge("caches.memory.entries") = store.entry_count());
            }
            // Drop the token only after storing, to evict from the map. This ensures that callers
            // either find the image in the store, or they join this channel, or they start a
            // new fetch after a failure.
            drop(remove_fetch_token);
            sender.send(result).ok();
        }
        .bind_hub(Hub::new_from_top(Hub::current()));

        runtime.spawn(task);

        receiver.shared()
    }
}

fn wait(channel: FetchChannel) -> BoxFuture<'static, CacheContents<Image>> {
    channel
        .unwrap_or_else(|cancelled| Err(CacheError::from_std_error(cancelled)))
        .boxed()
}
