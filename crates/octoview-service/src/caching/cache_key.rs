use std::fmt;

use url::Url;

use super::{CacheContents, CacheError};
use crate::config::AvatarConfig;

/// The longest username the directory accepts.
const MAX_USERNAME_LEN: usize = 39;

/// The key under which a profile image is cached.
///
/// The key is the canonical, absolute `http(s)` URL of the image. Two keys are equal exactly if
/// their serialized URLs are equal. Apart from URL canonicalization no further normalization
/// happens, in particular paths are not case-folded and query parameters are not reordered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    locator: Url,
}

impl CacheKey {
    /// Creates a key for a pre-built URL, rejecting anything but `http` and `https`.
    pub fn from_url(locator: Url) -> CacheContents<Self> {
        match locator.scheme() {
            "http" | "https" => Ok(Self { locator }),
            scheme => Err(CacheError::InvalidKey(format!("unsupported scheme `{scheme}`"))),
        }
    }

    /// The URL the image is fetched from.
    pub fn locator(&self) -> &Url {
        &self.locator
    }

    pub fn as_str(&self) -> &str {
        self.locator.as_str()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Turns user-supplied keys into [`CacheKey`]s.
///
/// A raw key is either an absolute `http(s)` URL, which is used as is, or a directory username,
/// which resolves to the profile image `{base_url}{username}.png?size={size}`.
#[derive(Debug, Clone)]
pub struct KeyResolver {
    base_url: Url,
    size: u32,
}

impl KeyResolver {
    pub fn new(config: &AvatarConfig) -> Self {
        let mut base_url = config.base_url.clone();
        // `Url::join` replaces the last path segment unless the base is a "directory".
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Self {
            base_url,
            size: config.size,
        }
    }

    /// Resolves a raw key after trimming surrounding whitespace.
    pub fn resolve(&self, raw: &str) -> CacheContents<CacheKey> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CacheError::InvalidKey("empty key".into()));
        }

        if let Ok(url) = Url::parse(raw) {
            return CacheKey::from_url(url);
        }

        if !is_valid_username(raw) {
            return Err(CacheError::InvalidKey(format!(
                "`{raw}` is neither a URL nor a username"
            )));
        }

        let mut locator = self
            .base_url
            .join(&format!("{raw}.png"))
            .map_err(|err| CacheError::InvalidKey(err.to_string()))?;
        locator
            .query_pairs_mut()
            .append_pair("size", &self.size.to_string());

        CacheKey::from_url(locator)
    }
}

fn is_valid_username(name: &str) -> bool {
    name.len() <= MAX_USERNAME_LEN
        && !name.starts_with('-')
        && !name.ends_with('-')
        && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}
