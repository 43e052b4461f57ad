//! Support to download from HTTP servers.

use futures::future::BoxFuture;
use reqwest::Client;
use reqwest::header::{self, HeaderValue};

use super::{Transport, TransportRequest, TransportResponse};
use crate::caching::CacheContents;
use crate::config::Config;
use crate::utils::http::{HttpTimeouts, create_client};

/// [`Transport`] implementation on top of a [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Creates a transport with a client configured from `config`.
    pub fn from_config(config: &Config) -> reqwest::Result<Self> {
        let client = create_client(&HttpTimeouts::from_config(config))?;
        Ok(Self::new(client))
    }

    async fn send_request(&self, request: TransportRequest) -> CacheContents<TransportResponse> {
        let TransportRequest {
            url,
            headers,
            bypass_cache,
        } = request;

        tracing::trace!("Fetching image from `{}`", url);

        let mut builder = self.client.get(url).headers(headers);
        if bypass_cache {
            builder = builder
                .header(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(header::PRAGMA, HeaderValue::from_static("no-cache"));
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        Ok(TransportResponse { status, body })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: TransportRequest) -> BoxFuture<'_, CacheContents<TransportResponse>> {
        Box::pin(self.send_request(request))
    }
}
