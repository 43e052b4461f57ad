//! Fetching of profile images over the network.
//!
//! The actual network access goes through the [`Transport`] trait, with [`HttpTransport`] as the
//! production implementation. The [`Fetcher`] drives exactly one transport call per fetch,
//! validates the response and decodes the image. It never retries.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::caching::{CacheContents, CacheError};
use crate::types::Image;

mod http;

pub use http::HttpTransport;

/// A request handed to a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub url: Url,
    pub headers: HeaderMap,
    /// The transport must not answer from any local HTTP cache, the image cache has its own
    /// freshness model.
    pub bypass_cache: bool,
}

/// The raw response of a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Performs a single network round trip.
///
/// Implementations report connectivity problems as [`CacheError::Transport`]. Any response the
/// server sends, including error statuses, is returned as a [`TransportResponse`].
pub trait Transport: Send + Sync + 'static {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, CacheContents<TransportResponse>>;
}

/// A pre-built image request, for callers that need custom headers.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    url: Url,
    headers: HeaderMap,
}

impl ImageRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
        }
    }

    /// Adds a header, replacing previous values of the same header.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Fetches and decodes a single image.
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    /// Images larger than this, encoded or decoded, are rejected.
    size_limit: u64,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("size_limit", &self.size_limit)
            .finish_non_exhaustive()
    }
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            size_limit: u64::MAX,
        }
    }

    /// Rejects images that would never fit into a store of `size_limit` bytes.
    pub fn with_size_limit(mut self, size_limit: u64) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Issues the transport call for `request` and decodes the response body.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Transport`] if the server could not be reached,
    /// - [`CacheError::HttpStatus`] if the status is not in the `2xx` range,
    /// - [`CacheError::Decode`] if the body is not a supported image, or the image exceeds the
    ///   size limit.
    pub async fn fetch(self, request: ImageRequest) -> CacheContents<Image> {
        metric!(counter("caches.computation") += 1);
        let start = Instant::now();

        let url = request.url.clone();
        let result = self.fetch_inner(request).await;

        metric!(timer("caches.fetch.duration") = start.elapsed());
        if let Err(err) = &result {
            metric!(counter("caches.fetch.error") += 1, "status" => err.metrics_tag());
            tracing::debug!(
                error = err as &dyn std::error::Error,
                url = %url,
                "failed to fetch image"
            );
        }

        result
    }

    async fn fetch_inner(&self, request: ImageRequest) -> CacheContents<Image> {
        let request = TransportRequest {
            url: request.url,
            headers: request.headers,
            bypass_cache: true,
        };
        let url = request.url.clone();

        let response = self.transport.send(request).await?;

        let status = response.status;
        if !status.is_success() {
            tracing::debug!("Unexpected status code from `{}`: {}", url, status);
            return Err(CacheError::HttpStatus(status.as_u16()));
        }

        tracing::trace!("Success hitting `{}`", url);
        let body = response.body;
        metric!(time_raw("caches.fetch.size") = body.len() as u64);
        self.check_size("encoded", body.len())?;

        // Decoding is CPU bound, keep it off the runtime threads.
        let image = tokio::task::spawn_blocking(move || Image::decode(&body))
            .await
            .unwrap_or_else(|err| Err(CacheError::from_std_error(err)))?;
        self.check_size("decoded", image.byte_size())?;

        Ok(image)
    }

    fn check_size(&self, what: &str, size: usize) -> CacheContents<()> {
        if size as u64 > self.size_limit {
            return Err(CacheError::Decode(format!(
                "{what} image of {size} bytes exceeds the limit of {} bytes",
                self.size_limit
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use reqwest::header;

    use super::*;

    /// Answers every request with the same response and records the requests.
    struct FixedTransport {
        response: CacheContents<TransportResponse>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl FixedTransport {
        fn new(response: CacheContents<TransportResponse>) -> Arc<Self> {
            Arc::new(Self {
                response,
                requests: Default::default(),
            })
        }

        fn ok(status: StatusCode, body: impl Into<Bytes>) -> Arc<Self> {
            Self::new(Ok(TransportResponse {
                status,
                body: body.into(),
            }))
        }
    }

    impl Transport for FixedTransport {
        fn send(
            &self,
            request: TransportRequest,
        ) -> BoxFuture<'_, CacheContents<TransportResponse>> {
            self.requests.lock().push(request);
            Box::pin(async move { self.response.clone() })
        }
    }

    fn request() -> ImageRequest {
        ImageRequest::new(Url::parse("https://example.com/octocat.png").unwrap())
    }

    #[tokio::test]
    async fn test_fetch_decodes() {
        let transport = FixedTransport::ok(StatusCode::OK, octoview_test::png(4, 4));
        let fetcher = Fetcher::new(transport.clone());

        let image = fetcher.fetch(request()).await.unwrap();

        assert_eq!((image.width(), image.height()), (4, 4));
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_status() {
        let transport = FixedTransport::ok(StatusCode::NOT_FOUND, "Not Found");
        let fetcher = Fetcher::new(transport);

        let err = fetcher.fetch(request()).await.unwrap_err();

        assert_eq!(err, CacheError::HttpStatus(404));
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fetch_redirect_status_is_an_error() {
        let transport = FixedTransport::ok(StatusCode::NOT_MODIFIED, Bytes::new());
        let fetcher = Fetcher::new(transport);

        let err = fetcher.fetch(request()).await.unwrap_err();

        assert_eq!(err, CacheError::HttpStatus(304));
    }

    #[tokio::test]
    async fn test_fetch_undecodable() {
        let transport = FixedTransport::ok(StatusCode::OK, "<html>Sign in</html>");
        let fetcher = Fetcher::new(transport);

        let err = fetcher.fetch(request()).await.unwrap_err();

        assert!(matches!(err, CacheError::Decode(_)));
    }

    #[tokio::test]
    async fn test_fetch_transport_error() {
        let transport = FixedTransport::new(Err(CacheError::Transport("connection reset".into())));
        let fetcher = Fetcher::new(transport.clone());

        let err = fetcher.fetch(request()).await.unwrap_err();

        assert_eq!(err, CacheError::Transport("connection reset".into()));
        assert_eq!(transport.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_size_limit() {
        // 16x16 RGBA decodes to 1024 bytes, the encoded PNG is a lot smaller
        let transport = FixedTransport::ok(StatusCode::OK, octoview_test::png(16, 16));

        let fetcher = Fetcher::new(transport.clone()).with_size_limit(1024);
        assert!(fetcher.fetch(request()).await.is_ok());

        let fetcher = Fetcher::new(transport.clone()).with_size_limit(1023);
        let err = fetcher.fetch(request()).await.unwrap_err();
        insta::assert_snapshot!(
            err.to_string(),
            @"failed to decode image: decoded image of 1024 bytes exceeds the limit of 1023 bytes"
        );

        let fetcher = Fetcher::new(transport).with_size_limit(16);
        let err = fetcher.fetch(request()).await.unwrap_err();
        assert!(err.to_string().contains("encoded image of"), "{err}");
    }

    #[tokio::test]
    async fn test_request_headers_and_cache_bypass() {
        let transport = FixedTransport::ok(StatusCode::OK, octoview_test::png(1, 1));
        let fetcher = Fetcher::new(transport.clone());

        let request = request().with_header(
            header::AUTHORIZATION,
            HeaderValue::from_static("token secret"),
        );
        fetcher.fetch(request).await.unwrap();

        let requests = transport.requests.lock();
        assert!(requests[0].bypass_cache);
        assert_eq!(requests[0].headers[header::AUTHORIZATION], "token secret");
        assert_eq!(requests[0].url.as_str(), "https://example.com/octocat.png");
    }
}
