use std::fmt;
use std::sync::Arc;

use image::DynamicImage;

use crate::caching::{CacheContents, CacheError};

/// A decoded profile image.
///
/// Images are immutable once decoded. Cloning is cheap and shares the underlying pixel buffer,
/// so every caller that receives the same cached entry holds the very same bitmap.
#[derive(Clone, PartialEq)]
pub struct Image {
    inner: Arc<DynamicImage>,
}

impl Image {
    /// Decodes an encoded image (PNG, JPEG, GIF or WebP).
    ///
    /// The format is guessed from the content, any `Content-Type` the server sent is ignored.
    pub fn decode(data: &[u8]) -> CacheContents<Self> {
        image::load_from_memory(data)
            .map(Self::from)
            .map_err(|err| CacheError::Decode(err.to_string()))
    }

    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    /// The size of the decoded pixel buffer in bytes.
    pub fn byte_size(&self) -> usize {
        self.inner.as_bytes().len()
    }

    /// Whether both images share the same pixel buffer.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.inner
    }
}

impl From<DynamicImage> for Image {
    fn from(image: DynamicImage) -> Self {
        Self {
            inner: Arc::new(image),
        }
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("color", &self.inner.color())
            .finish()
    }
}
