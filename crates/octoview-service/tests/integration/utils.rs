use octoview_service::caching::ImageCache;
use octoview_service::config::Config;

pub use octoview_test::{HitCounter, setup};

/// Creates an [`ImageCache`] talking HTTP to a fresh [`HitCounter`].
///
/// Bare usernames resolve to the server's `/avatars/` route with a size of 16 pixels.
pub fn setup_cache(update_config: impl FnOnce(&mut Config)) -> (ImageCache, HitCounter) {
    setup();

    let server = HitCounter::new();
    let mut config = Config::default();
    config.avatars.base_url = server.url("avatars/");
    config.avatars.size = 16;
    update_config(&mut config);

    let cache = ImageCache::from_config(&config).unwrap();
    (cache, server)
}
