use std::time::Duration;

use reqwest::header::{self, HeaderValue};

use crate::config::Config;

/// The `User-Agent` sent with every request.
pub const USER_AGENT: &str = concat!("octoview/", env!("CARGO_PKG_VERSION"));

/// Timeouts applied by the HTTP client.
#[derive(Copy, Clone, Debug)]
pub struct HttpTimeouts {
    /// The timeout for establishing a connection.
    pub connect: Duration,
    /// Global timeout for one request. Unbounded if `None`.
    pub request: Option<Duration>,
}

impl HttpTimeouts {
    pub fn from_config(config: &Config) -> Self {
        Self {
            connect: config.connect_timeout,
            request: config.timeout,
        }
    }
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(15),
            request: None,
        }
    }
}

/// Creates a [`reqwest::Client`] with the provided timeouts.
///
/// The client transparently decompresses gzip bodies and keeps idle connections around
/// for a short while, as profile images are usually requested in bursts.
pub fn create_client(timeouts: &HttpTimeouts) -> reqwest::Result<reqwest::Client> {
    let mut default_headers = header::HeaderMap::new();
    default_headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

    let mut builder = reqwest::ClientBuilder::new()
        .gzip(true)
        .connect_timeout(timeouts.connect)
        .pool_idle_timeout(Duration::from_secs(30))
        .default_headers(default_headers);

    if let Some(timeout) = timeouts.request {
        builder = builder.timeout(timeout);
    }

    builder.build()
}
