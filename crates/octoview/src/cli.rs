//! Exposes the command line application.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::future::join_all;
use octoview_service::caching::ImageCache;
use octoview_service::config::Config;
use octoview_service::download::ImageRequest;
use octoview_service::metrics;
use reqwest::header::{HeaderName, HeaderValue};

use crate::logging;
use crate::output::{self, FetchOutcome, OutputFormat};

/// Octoview commands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch profile images and report their dimensions.
    ///
    /// All keys are first prefetched, then awaited concurrently. Failures are reported per key
    /// and do not affect the exit status.
    Fetch(FetchArgs),
}

#[derive(Debug, Args)]
struct FetchArgs {
    /// How to print the outcome.
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,

    /// An additional request header, as `NAME:VALUE`. Can be repeated.
    ///
    /// Requests with custom headers are not prefetched.
    #[arg(long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    headers: Vec<(HeaderName, HeaderValue)>,

    /// Usernames or `http(s)` URLs of the images.
    #[arg(required = true)]
    keys: Vec<String>,
}

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(bin_name = "octoview", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

fn parse_header(header: &str) -> Result<(HeaderName, HeaderValue), String> {
    let (name, value) = header
        .split_once(':')
        .ok_or_else(|| format!("`{header}` is not of the form NAME:VALUE"))?;
    let name = HeaderName::try_from(name.trim()).map_err(|e| e.to_string())?;
    let value = HeaderValue::try_from(value.trim()).map_err(|e| e.to_string())?;
    Ok((name, value))
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: sentry::release_name!(),
        ..Default::default()
    });

    // SAFETY: We are still single-threaded, the runtime is only created below.
    unsafe { logging::init_logging(&config) };

    if let Some(ref statsd) = config.metrics.statsd {
        let mut tags = config.metrics.custom_tags.clone();
        if let Some(tag) = config.metrics.hostname_tag.clone() {
            if let Some(name) = hostname::get().ok().and_then(|s| s.into_string().ok()) {
                tags.insert(tag, name);
            }
        }
        metrics::configure_statsd(&config.metrics.prefix, statsd.as_str(), tags)
            .context("failed to configure statsd")?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("octoview")
        .build()
        .context("failed to create tokio runtime")?;

    match cli.command {
        Command::Fetch(args) => runtime.block_on(fetch(config, args))?,
    }

    Ok(())
}

async fn fetch(config: Config, args: FetchArgs) -> Result<()> {
    let cache = ImageCache::from_config(&config).context("failed to create HTTP client")?;

    if args.headers.is_empty() {
        for key in &args.keys {
            cache.prefetch(key);
        }
    }

    let outcomes = join_all(args.keys.iter().map(|raw| {
        let cache = &cache;
        let headers = &args.headers;
        async move {
            let key = cache.key(raw);
            let locator = key.as_ref().ok().map(|key| key.to_string());

            let status = match key {
                Ok(key) if !headers.is_empty() => {
                    let request = headers.iter().fold(
                        ImageRequest::new(key.locator().clone()),
                        |request, (name, value)| request.with_header(name.clone(), value.clone()),
                    );
                    cache.fetch_request(request).await
                }
                Ok(_) => cache.fetch(raw).await,
                Err(err) => Err(err),
            };

            FetchOutcome {
                key: raw.clone(),
                locator,
                status: status.into(),
            }
        }
    }))
    .await;

    tracing::debug!(keys = outcomes.len(), "Fetched all keys");

    output::print(args.format, &outcomes, cache.entry_count())
        .context("failed to write output")?;

    Ok(())
}
