use moka::sync::Cache;

use super::CacheKey;
use crate::config::CacheConfig;
use crate::types::Image;

/// A capacity bounded, thread safe map of decoded images.
///
/// The capacity is measured in bytes of decoded pixel data. Once it is exceeded, some entries are
/// evicted. Which ones is up to the underlying cache, so callers must expect any entry to
/// disappear under memory pressure.
#[derive(Clone)]
pub struct ImageStore {
    cache: Cache<CacheKey, Image>,
}

impl std::fmt::Debug for ImageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageStore")
            .field("entries", &self.cache.entry_count())
            .field("weighted_size", &self.cache.weighted_size())
            .finish()
    }
}

impl ImageStore {
    pub fn new(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.in_memory_capacity)
            .name("images")
            // NOTE: we count the key to the weight as well
            .weigher(|key: &CacheKey, image: &Image| {
                let weight = key.as_str().len().saturating_add(image.byte_size());
                u32::try_from(weight).unwrap_or(u32::MAX)
            })
            .build();

        Self { cache }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Image> {
        self.cache.get(key)
    }

    /// Inserts an image, replacing any previous image stored under the same key.
    pub fn insert(&self, key: CacheKey, image: Image) {
        self.cache.insert(key, image);
    }

    pub fn remove(&self, key: &CacheKey) {
        self.cache.invalidate(key);
    }

    /// Drops all entries.
    ///
    /// Entries are invisible to [`get`](Self::get) right away, the memory is reclaimed lazily.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains_key(key)
    }

    /// The approximate number of entries.
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// The approximate total weight of all entries.
    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// Runs pending evictions and bookkeeping immediately.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey::from_url(Url::parse(&format!("https://example.com/{name}.png")).unwrap())
            .unwrap()
    }

    fn image(width: u32, height: u32) -> Image {
        Image::decode(&octoview_test::png(width, height)).unwrap()
    }

    #[test]
    fn test_insert_get_remove() {
        let store = ImageStore::new(&CacheConfig::default());
        let octocat = image(2, 2);

        assert!(store.get(&key("octocat")).is_none());

        store.insert(key("octocat"), octocat.clone());
        assert!(store.get(&key("octocat")).unwrap().ptr_eq(&octocat));
        assert!(store.contains(&key("octocat")));
        assert!(store.get(&key("hubot")).is_none());

        store.remove(&key("octocat"));
        assert!(store.get(&key("octocat")).is_none());

        // removing a missing key is fine
        store.remove(&key("octocat"));
    }

    #[test]
    fn test_overwrite() {
        let store = ImageStore::new(&CacheConfig::default());
        let first = image(1, 1);
        let second = image(2, 1);

        store.insert(key("x"), first);
        store.insert(key("x"), second.clone());

        assert!(store.get(&key("x")).unwrap().ptr_eq(&second));
    }

    #[test]
    fn test_clear() {
        let store = ImageStore::new(&CacheConfig::default());
        let names = ["a", "b", "c", "d"];
        for name in names {
            store.insert(key(name), image(1, 1));
        }

        store.clear();

        for name in names {
            assert!(store.get(&key(name)).is_none(), "{name} survived clear");
        }
    }

    #[test]
    fn test_eviction_under_pressure() {
        let config = CacheConfig {
            in_memory_capacity: 4 * 1024,
            ..Default::default()
        };
        let store = ImageStore::new(&config);

        // every image weighs 1KiB plus its key
        for i in 0..32 {
            store.insert(key(&i.to_string()), image(16, 16));
        }
        store.run_pending_tasks();

        assert!(store.weighted_size() <= config.in_memory_capacity);
        assert!(store.entry_count() < 32);
    }
}
