//! Octoview.
//!
//! Octoview loads profile images of directory users into an in-memory cache, sharing a single
//! download between all concurrent requests for the same image. This binary warms and queries
//! that cache from the command line.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod logging;
mod output;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
