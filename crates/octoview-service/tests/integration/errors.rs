use std::time::Duration;

use octoview_service::caching::CacheError;

use crate::setup_cache;

#[tokio::test]
async fn test_not_found_is_not_cached() {
    let (cache, server) = setup_cache(|_| {});
    let url = server.url("respond_statuscode/404/bad-user.png");

    // NOTE: we run requests twice to make sure that failures never end up in the cache.
    for _ in 0..2 {
        let err = cache.fetch(url.as_str()).await.unwrap_err();
        assert_eq!(err, CacheError::HttpStatus(404));
    }

    assert_eq!(server.accesses(), 2);
    assert!(cache.get(url.as_str()).is_none());
}

#[tokio::test]
async fn test_server_error() {
    let (cache, server) = setup_cache(|_| {});
    let url = server.url("respond_statuscode/503/octocat.png");

    let err = cache.fetch(url.as_str()).await.unwrap_err();

    assert_eq!(err, CacheError::HttpStatus(503));
    assert_eq!(err.metrics_tag(), "http_status");
}

#[tokio::test]
async fn test_garbage_data() {
    let (cache, server) = setup_cache(|_| {});
    let url = server.url("garbage_data/definitely-not-a-png");

    let err = cache.fetch(url.as_str()).await.unwrap_err();

    assert!(matches!(err, CacheError::Decode(_)), "{err}");
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_connection_refused() {
    let (cache, _server) = setup_cache(|_| {});

    let err = cache.fetch("http://127.0.0.1:1/octocat.png").await.unwrap_err();

    assert!(matches!(err, CacheError::Transport(_)), "{err}");
}

#[tokio::test]
async fn test_timeout() {
    let (cache, server) = setup_cache(|config| {
        config.timeout = Some(Duration::from_millis(100));
    });
    let url = server.url("delay/1h/octocat.png");

    let err = cache.fetch(url.as_str()).await.unwrap_err();

    assert!(matches!(err, CacheError::Transport(_)), "{err}");
    assert!(!cache.is_pending(url.as_str()));
}
