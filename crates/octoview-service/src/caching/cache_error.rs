use thiserror::Error;

/// An error that happens when resolving or fetching a profile image.
///
/// Errors are never cached: a failed fetch leaves no trace and the next request for the same
/// key goes to the network again. The error is [`Clone`] because a single failure is handed to
/// every caller that joined the failed fetch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The key is empty, or neither a `http(s)` URL nor a valid username.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// The request could not be completed because of a connectivity problem, like a refused
    /// connection, DNS resolution or a timeout.
    ///
    /// The attached string contains the transport's description of the problem.
    #[error("transport error: {0}")]
    Transport(String),
    /// The server responded with a status outside of the success range.
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
    /// The response body is not an image in any supported format.
    #[error("failed to decode image: {0}")]
    Decode(String),
    /// An unexpected error in octoview itself.
    #[error("internal error")]
    InternalError,
}

impl From<reqwest::Error> for CacheError {
    fn from(err: reqwest::Error) -> Self {
        // `reqwest` hides the interesting part of the error in its source chain.
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Transport(message)
    }
}

impl CacheError {
    /// Whether the server reported the image as missing, which usually means the user does not
    /// exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::HttpStatus(404))
    }

    /// A short and stable name of the error kind, used to tag metrics.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::InvalidKey(_) => "invalid_key",
            Self::Transport(_) => "transport",
            Self::HttpStatus(404) => "not_found",
            Self::HttpStatus(_) => "http_status",
            Self::Decode(_) => "decode",
            Self::InternalError => "internal",
        }
    }

    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }
}

/// The outcome of a cache operation, either `Ok(T)` or the reason it failed.
pub type CacheContents<T = ()> = Result<T, CacheError>;
