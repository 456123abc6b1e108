//! Core library for aprel.
//!
//! Stages, in pipeline order:
//!
//! - [`resolve`]: version selector -> [`aprel_schema::Release`] (through the
//!   time-bounded [`cache`]).
//! - [`acquire`]: idempotent download and unpack of platform archives and the
//!   upstream source snapshot.
//! - [`matrix`]: one build per platform, then the combined bundle.
//! - [`verify`]: smoke tests and upstream test suite replay.
//! - [`publish`]: registry and code-host deployment of a verified build.
//!
//! Every stage is constructed from a shared [`Context`] holding the
//! [`Config`], the [`ProcessRunner`] used for external tools, the [`Fetcher`]
//! used for network access and the [`Reporter`] for operator output.

pub mod acquire;
pub mod archive;
pub mod cache;
pub mod clean;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod fetch;
pub mod matrix;
pub mod process;
pub mod publish;
pub mod reporter;
pub mod resolve;
pub mod verify;

pub use config::Config;
pub use context::Context;
pub use fetch::{Fetcher, HttpFetcher};
pub use process::{ProcessRunner, SystemRunner};
pub use reporter::{NullReporter, Reporter};

/// User Agent string for HTTP requests (the GitHub API rejects requests without one)
pub const USER_AGENT: &str = concat!("aprel/", env!("CARGO_PKG_VERSION"));

/// Extract the filename from a URL.
pub fn filename_from_url(url: &str) -> &str {
    url.split('/').next_back().unwrap_or("")
}
