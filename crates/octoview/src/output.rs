use std::io;

use clap::ValueEnum;
use octoview_service::caching::CacheContents;
use octoview_service::types::Image;
use prettytable::format::consts::FORMAT_CLEAN;
use prettytable::{Table, row};
use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Outputs one row per key.
    #[default]
    Table,
    /// Outputs all outcomes and the cache size as JSON.
    Json,
}

/// What happened to a single key of the `fetch` command.
#[derive(Clone, Debug, Serialize)]
pub struct FetchOutcome {
    pub key: String,
    /// The URL the key resolved to, if it is a valid key.
    pub locator: Option<String>,
    #[serde(flatten)]
    pub status: FetchStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchStatus {
    Loaded { width: u32, height: u32 },
    Failed { error: String },
}

impl From<CacheContents<Image>> for FetchStatus {
    fn from(result: CacheContents<Image>) -> Self {
        match result {
            Ok(image) => Self::Loaded {
                width: image.width(),
                height: image.height(),
            },
            Err(err) => Self::Failed {
                error: err.to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    images: &'a [FetchOutcome],
    cached_entries: u64,
}

pub fn print(
    format: OutputFormat,
    outcomes: &[FetchOutcome],
    cached_entries: u64,
) -> io::Result<()> {
    match format {
        OutputFormat::Table => {
            table(outcomes).print(&mut io::stdout())?;
            println!();
            println!("{cached_entries} image(s) cached");
            Ok(())
        }
        OutputFormat::Json => {
            let report = Report {
                images: outcomes,
                cached_entries,
            };
            serde_json::to_writer_pretty(io::stdout(), &report)?;
            println!();
            Ok(())
        }
    }
}

fn table(outcomes: &[FetchOutcome]) -> Table {
    let mut table = Table::new();
    table.set_format(*FORMAT_CLEAN);
    table.set_titles(row![b => "Key", "Locator", "Result"]);

    for outcome in outcomes {
        let locator = outcome.locator.as_deref().unwrap_or("-");
        match &outcome.status {
            FetchStatus::Loaded { width, height } => {
                table.add_row(row![outcome.key, locator, format!("{width}x{height}")]);
            }
            FetchStatus::Failed { error } => {
                table.add_row(row![outcome.key, locator, Fr->error]);
            }
        }
    }

    table
}
