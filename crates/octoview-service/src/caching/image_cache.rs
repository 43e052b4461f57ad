use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

use super::coordinator::Joined;
use super::{CacheContents, CacheKey, FetchCoordinator, ImageStore, KeyResolver};
use crate::config::Config;
use crate::download::{Fetcher, HttpTransport, ImageRequest, Transport};
use crate::types::Image;
use crate::utils::futures::CallOnDrop;

/// The profile image cache.
///
/// Keys are either `http(s)` URLs or directory usernames, see [`KeyResolver`]. The synchronous
/// accessors only look at the in-memory store, while [`fetch`](Self::fetch) and
/// [`prefetch`](Self::prefetch) go to the network on a miss, deduplicating concurrent requests
/// for the same key.
///
/// The cache is cheap to clone, and all clones share the same state. Create one instance at
/// startup and hand it to everything that displays images.
#[derive(Clone, Debug)]
pub struct ImageCache {
    resolver: KeyResolver,
    store: ImageStore,
    coordinator: FetchCoordinator,
    fetcher: Fetcher,
    /// Remaining prefetch slots, if prefetches are limited.
    available_prefetches: Option<Arc<AtomicIsize>>,
}

impl ImageCache {
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Self {
        let store = ImageStore::new(&config.caches);
        let coordinator = FetchCoordinator::new(store.clone());
        let available_prefetches = config
            .caches
            .max_concurrent_prefetches
            .map(|max| Arc::new(AtomicIsize::new(isize::try_from(max).unwrap_or(isize::MAX))));

        Self {
            resolver: KeyResolver::new(&config.avatars),
            store,
            coordinator,
            fetcher: Fetcher::new(transport).with_size_limit(config.caches.in_memory_capacity),
            available_prefetches,
        }
    }

    /// Creates a cache that fetches images over HTTP.
    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    /// Resolves a raw key to the [`CacheKey`] it is stored under.
    pub fn key(&self, raw: &str) -> CacheContents<CacheKey> {
        self.resolver.resolve(raw)
    }

    /// Returns the cached image, without going to the network.
    ///
    /// Keys that cannot be resolved are never cached, so they yield `None`.
    pub fn get(&self, raw: &str) -> Option<Image> {
        let key = self.key(raw).ok()?;
        self.store.get(&key)
    }

    /// Stores an image, replacing any image previously stored under the same key.
    pub fn set(&self, raw: &str, image: Image) -> CacheContents<()> {
        let key = self.key(raw)?;
        self.store.insert(key, image);
        Ok(())
    }

    /// Removes the image from the cache. Running fetches for the key are not affected.
    pub fn remove(&self, raw: &str) {
        if let Ok(key) = self.key(raw) {
            self.store.remove(&key);
        }
    }

    /// Removes all images from the cache. Running fetches are not affected.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// The number of cached images, after applying pending evictions.
    pub fn entry_count(&self) -> u64 {
        self.store.run_pending_tasks();
        self.store.entry_count()
    }

    /// Whether a fetch for the key is currently running.
    pub fn is_pending(&self, raw: &str) -> bool {
        self.key(raw)
            .is_ok_and(|key| self.coordinator.is_pending(&key))
    }

    /// Returns the image for `raw`, fetching it if it is not cached.
    ///
    /// Concurrent calls for the same key share a single fetch and all receive its outcome.
    /// Failures are not cached: the next call fetches again.
    ///
    /// Must be called within a tokio runtime.
    pub async fn fetch(&self, raw: &str) -> CacheContents<Image> {
        let key = self.key(raw)?;
        let request = ImageRequest::new(key.locator().clone());
        self.fetch_key(key, request).await
    }

    /// Same as [`fetch`](Self::fetch), with a request that carries custom headers.
    ///
    /// The image is cached under the request URL. A caller that joins a running fetch for the
    /// same URL receives that fetch's result, regardless of the headers it passed.
    pub async fn fetch_request(&self, request: ImageRequest) -> CacheContents<Image> {
        let key = CacheKey::from_url(request.url().clone())?;
        self.fetch_key(key, request).await
    }

    async fn fetch_key(&self, key: CacheKey, request: ImageRequest) -> CacheContents<Image> {
        metric!(counter("caches.access") += 1);

        if let Some(image) = self.store.get(&key) {
            metric!(counter("caches.memory.hit") += 1);
            tracing::trace!("Serving `{}` from memory", key);
            return Ok(image);
        }

        let fetcher = self.fetcher.clone();
        self.coordinator
            .join(&key, move || fetcher.fetch(request))
            .await
    }

    /// Warms the cache for `raw` in the background.
    ///
    /// Does nothing if the image is already cached or being fetched. Failures are only logged,
    /// and outside of a tokio runtime the prefetch is skipped.
    pub fn prefetch(&self, raw: &str) {
        self.start_prefetch(raw);
    }

    fn start_prefetch(&self, raw: &str) -> Prefetch {
        let key = match self.key(raw) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(error = &err as &dyn std::error::Error, "Prefetch skipped");
                return Prefetch::Invalid;
            }
        };

        if self.store.contains(&key) {
            return Prefetch::Cached;
        }
        if self.coordinator.is_pending(&key) {
            return Prefetch::Pending;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("Prefetch of `{}` skipped outside of a tokio runtime", key);
            return Prefetch::NoRuntime;
        };

        let slot = match &self.available_prefetches {
            Some(available) => {
                // We count down towards zero, and if we reach or surpass it, we skip the prefetch.
                if available.fetch_sub(1, Ordering::Relaxed) <= 0 {
                    available.fetch_add(1, Ordering::Relaxed);
                    metric!(counter("caches.prefetch.limit_hit") += 1);
                    tracing::debug!("Prefetch limit reached, skipping `{}`", key);
                    return Prefetch::Limited;
                }
                let available = Arc::clone(available);
                Some(CallOnDrop::new(move || {
                    available.fetch_add(1, Ordering::Relaxed);
                }))
            }
            None => None,
        };

        let fetcher = self.fetcher.clone();
        let request = ImageRequest::new(key.locator().clone());
        let future = match self
            .coordinator
            .get_or_start(&key, move || fetcher.fetch(request))
        {
            Ok(Joined::Started(future)) => future,
            Ok(Joined::Cached(_)) => return Prefetch::Cached,
            Ok(Joined::Attached(_)) => return Prefetch::Pending,
            Err(_) => return Prefetch::NoRuntime,
        };

        runtime.spawn(async move {
            let _slot = slot; // move into the future
            if let Err(err) = future.await {
                tracing::warn!(
                    error = &err as &dyn std::error::Error,
                    key = %key,
                    "Prefetch failed"
                );
            }
        });

        Prefetch::Started
    }
}

/// What [`ImageCache::prefetch`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefetch {
    Invalid,
    Cached,
    Pending,
    NoRuntime,
    Limited,
    Started,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::BoxFuture;
    use reqwest::StatusCode;

    use super::*;
    use crate::caching::CacheError;
    use crate::config::CacheConfig;
    use crate::download::{TransportRequest, TransportResponse};

    /// Answers every request with a small PNG after a short delay.
    struct SlowTransport;

    impl Transport for SlowTransport {
        fn send(
            &self,
            _request: TransportRequest,
        ) -> BoxFuture<'_, CacheContents<TransportResponse>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(TransportResponse {
                    status: StatusCode::OK,
                    body: octoview_test::png(1, 1).into(),
                })
            })
        }
    }

    fn limited_cache(max_concurrent_prefetches: usize) -> ImageCache {
        let config = Config {
            caches: CacheConfig {
                max_concurrent_prefetches: Some(max_concurrent_prefetches),
                ..Default::default()
            },
            ..Default::default()
        };
        ImageCache::new(&config, Arc::new(SlowTransport))
    }

    #[tokio::test]
    async fn test_pending_prefetch_does_not_count_against_limit() {
        let cache = limited_cache(1);

        assert_eq!(cache.start_prefetch("octocat"), Prefetch::Started);
        assert_eq!(cache.start_prefetch("octocat"), Prefetch::Pending);
        assert_eq!(cache.start_prefetch("hubot"), Prefetch::Limited);

        cache.fetch("octocat").await.unwrap();
        assert_eq!(cache.start_prefetch("octocat"), Prefetch::Cached);
        assert_eq!(cache.start_prefetch("not a user"), Prefetch::Invalid);
    }

    #[test]
    fn test_prefetch_outside_runtime() {
        let cache = limited_cache(1);

        assert_eq!(cache.start_prefetch("octocat"), Prefetch::NoRuntime);
        cache.prefetch("octocat");
        assert!(!cache.is_pending("octocat"));
    }

    #[test]
    fn test_fetch_outside_runtime() {
        let cache = limited_cache(1);

        let result = futures::executor::block_on(cache.fetch("octocat"));

        assert_eq!(result.unwrap_err(), CacheError::InternalError);
    }
}
