use futures::future::join_all;
use octoview_service::download::ImageRequest;
use reqwest::header::{self, HeaderValue};

use crate::setup_cache;

#[tokio::test]
async fn test_fetch_by_username() {
    let (cache, server) = setup_cache(|_| {});

    let image = cache.fetch("octocat").await.unwrap();

    assert_eq!((image.width(), image.height()), (16, 16));
    assert_eq!(
        server.all_hits(),
        [("/avatars/octocat.png?size=16".to_owned(), 1)]
    );

    // served from memory
    let again = cache.fetch("octocat").await.unwrap();
    assert!(again.ptr_eq(&image));
    assert_eq!(server.accesses(), 0);
}

#[tokio::test]
async fn test_fetch_by_url() {
    let (cache, server) = setup_cache(|_| {});
    let url = server.url("avatars/u/583231?size=32");

    let image = cache.fetch(url.as_str()).await.unwrap();

    assert_eq!((image.width(), image.height()), (32, 32));
    assert!(cache.get(url.as_str()).is_some());
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_concurrent_fetches_hit_once() {
    let (cache, server) = setup_cache(|_| {});
    let url = server.url("delay/50ms/octocat.png?size=8");

    let results = join_all((0..16).map(|_| cache.fetch(url.as_str()))).await;

    let first = results[0].clone().unwrap();
    for result in results {
        assert!(result.unwrap().ptr_eq(&first));
    }
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_prefetch_then_fetch() {
    let (cache, server) = setup_cache(|_| {});

    cache.prefetch("hubot");
    cache.prefetch("hubot");
    let image = cache.fetch("hubot").await.unwrap();

    assert_eq!(image.width(), 16);
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_fetch_request_with_headers() {
    let (cache, server) = setup_cache(|_| {});
    let url = server.url("auth/octocat.png?size=8");

    // without credentials, the server refuses
    let err = cache.fetch(url.as_str()).await.unwrap_err();
    assert_eq!(err.to_string(), "unexpected status code: 401");

    let request = ImageRequest::new(url.clone())
        .with_header(header::AUTHORIZATION, HeaderValue::from_static("token abc"));
    let image = cache.fetch_request(request).await.unwrap();

    assert_eq!(image.width(), 8);
    assert!(cache.get(url.as_str()).unwrap().ptr_eq(&image));
    assert_eq!(server.accesses(), 2);
}

#[tokio::test]
async fn test_clear_refetches() {
    let (cache, server) = setup_cache(|_| {});

    cache.fetch("octocat").await.unwrap();
    cache.clear();
    cache.fetch("octocat").await.unwrap();

    assert_eq!(server.accesses(), 2);
}
