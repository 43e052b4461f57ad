//! # Octoview image caching
//!
//! Profile images are shown all over the directory browser: in search results, follower lists
//! and on profile pages. The same image is very often requested by many views at once. This
//! module makes sure every image is downloaded and decoded at most once at a time, and kept in
//! memory afterwards.
//!
//! ## Layers
//!
//! - [`ImageStore`]: a capacity-bounded in-memory map from [`CacheKey`] to decoded
//!   [`Image`](crate::types::Image). Eviction is left to the underlying `moka` cache.
//! - [`FetchCoordinator`]: request coalescing. It keeps a map of running fetches and lets
//!   concurrent requests for the same key share a single [`Fetcher`](crate::download::Fetcher)
//!   invocation.
//! - [`ImageCache`]: the public entry point composing the two with a fetcher.
//!
//! A fetch goes through the following steps:
//! - The key is resolved and looked up in the store. A hit is returned right away.
//! - On a miss, the coordinator either attaches the caller to the running fetch for that key, or
//!   spawns a new one.
//! - Once the fetch settles, a successful image is written to the store *before* the fetch is
//!   unregistered, so a caller arriving right after observes a hit rather than refetching.
//! - The result, success or error, is published to all attached callers.
//!
//! ## Errors
//!
//! [`CacheError`] describes why an image is not available. Errors are never cached, neither as a
//! negative entry nor in any other form. The very next request for a failed key goes to the
//! network again, there is no backoff.
//!
//! Images that could never be kept in the store, because their encoded or decoded size exceeds
//! the store capacity, are rejected with [`CacheError::Decode`].
//!
//! ## Cancellation
//!
//! Fetches run in their own tasks. Dropping the future returned by
//! [`ImageCache::fetch`] detaches only that caller; the fetch itself runs until it completes and
//! populates the store for everyone else.
//!
//! ## Metrics
//!
//! - `caches.access`: All fetch requests.
//! - `caches.memory.hit`: Fetch requests served by the store.
//! - `caches.channel.hit`: Fetch requests that joined a running fetch.
//! - `caches.channel.miss`: Fetch requests that started a new fetch.
//! - `caches.computation`: Actual transport calls.
//! - `caches.fetch.error`: Failed fetches, tagged with the error `status`.

mod cache_error;
mod cache_key;
mod coordinator;
mod image_cache;
mod store;


pub use cache_error::*;
pub use cache_key::*;
pub use coordinator::*;
pub use image_cache::*;
pub use store::*;
