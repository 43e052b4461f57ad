//! Helpers for testing the image cache and the CLI.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`HitCounter`], make sure that the server is held until all requests to
//!    the server have been made. If the server is dropped, the port is closed and all
//!    connections to it will be refused. To avoid this, assign it to a variable: `let server =
//!    HitCounter::new();`.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract;
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Router, middleware};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use reqwest::{StatusCode, Url};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `octoview` crates and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("octoview_service=trace,octoview=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Encodes a `width` by `height` RGBA image as PNG.
///
/// Pixels encode their coordinates, so images of the same size are identical.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 0x80, 0xff])
    });

    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

fn png_response(size: u32) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "image/png")], png(size, size))
}

/// Reads the `size` query parameter of an avatar request, capped to keep tests fast.
fn avatar_size(query: &HashMap<String, String>) -> u32 {
    query
        .get("size")
        .and_then(|size| size.parse().ok())
        .unwrap_or(8)
        .clamp(1, 64)
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// An image server that counts the requests it receives, per request URI.
///
/// Routes:
///
///  - `/avatars/{name}`: a PNG whose dimensions are taken from the `size` query parameter.
///  - `/delay/{duration}/{name}`: same as `/avatars`, answered after a `humantime` duration.
///  - `/auth/{name}`: same as `/avatars`, but only with an `Authorization` header and a
///    `Cache-Control: no-cache` header. Responds with `401` otherwise.
///  - `/respond_statuscode/{status}/{tail}`: responds with the given status and an empty body.
///  - `/garbage_data/{tail}`: responds with `tail` as plain text.
pub struct HitCounter {
    server: Server,
    hits: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl HitCounter {
    pub fn new() -> Self {
        let hits = Arc::new(Mutex::new(BTreeMap::new()));

        let hitcounter = {
            let hits = hits.clone();
            move |extract::OriginalUri(uri), req: extract::Request, next: middleware::Next| {
                let hits = hits.clone();
                async move {
                    {
                        let mut hits = hits.lock().unwrap();
                        let hits = hits.entry(uri.to_string()).or_default();
                        *hits += 1;
                    }

                    next.run(req).await
                }
            }
        };

        let router = Router::new()
            .route(
                "/avatars/*path",
                get(
                    |extract::Query(query): extract::Query<HashMap<String, String>>| async move {
                        png_response(avatar_size(&query))
                    },
                ),
            )
            .route(
                "/delay/:time/*path",
                get(
                    |extract::Path((time, _)): extract::Path<(String, String)>,
                     extract::Query(query): extract::Query<HashMap<String, String>>| async move {
                        let duration = humantime::parse_duration(&time).unwrap();
                        tokio::time::sleep(duration).await;

                        png_response(avatar_size(&query))
                    },
                ),
            )
            .route(
                "/auth/*path",
                get(
                    |headers: HeaderMap,
                     extract::Query(query): extract::Query<HashMap<String, String>>| async move {
                        let authorized = headers.contains_key(header::AUTHORIZATION);
                        let uncached = headers
                            .get(header::CACHE_CONTROL)
                            .is_some_and(|value| value.as_bytes() == b"no-cache");

                        if authorized && uncached {
                            png_response(avatar_size(&query)).into_response()
                        } else {
                            StatusCode::UNAUTHORIZED.into_response()
                        }
                    },
                ),
            )
            .route(
                "/respond_statuscode/:num/*tail",
                get(
                    |extract::Path((num, _)): extract::Path<(u16, String)>| async move {
                        StatusCode::from_u16(num).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
                    },
                ),
            )
            .route(
                "/garbage_data/*tail",
                get(|extract::Path(tail): extract::Path<String>| async move { tail }),
            )
            .layer(middleware::from_fn(hitcounter));

        let server = Server::with_router(router);

        Self { server, hits }
    }

    /// Returns the total number of requests since the last call, and resets the counts.
    pub fn accesses(&self) -> usize {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_values().sum()
    }

    /// Returns the requests per URI since the last call, and resets the counts.
    pub fn all_hits(&self) -> Vec<(String, usize)> {
        let map = std::mem::take(&mut *self.hits.lock().unwrap());
        map.into_iter().collect()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for HitCounter {
    fn default() -> Self {
        Self::new()
    }
}
