//! The profile image cache behind the Octoview directory browser.
//!
//! The interesting part lives in [`caching`]: an in-memory store of decoded images that
//! coalesces concurrent fetches for the same key into a single transport call.

#[macro_use]
pub mod metrics;

pub mod caching;
pub mod config;
pub mod download;
pub mod logging;
pub mod types;
pub mod utils;
