//! aprel - Release build & verification orchestrator
//!
//! Packages the per-platform releases of async-profiler into ap-loader,
//! verifies the result and publishes it.
//!
//! # Commands
//!
//! Commands run in the order given on one command line. A trailing token
//! starting with a digit selects the upstream version; without it the most
//! recent supported release is used. The version is only resolved when a
//! command needs it, so `clear` works offline.
//!
//! ```text
//! aprel build test 2.9
//! aprel deploy_release
//! ```
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]

pub mod cmd;
pub mod ui;

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

pub const COMMANDS_HELP: &str = "\
Commands:
    current_version   print the most recent supported upstream version
    versions          print all upstream versions supported by this project
    download          download and unpack the given release
    build             build the loaders for the given release
    test              test the given release
    deploy_mvn        deploy the loaders for the given release as a snapshot to the registry
    deploy_gh         deploy the loaders for the given release to the code host
    deploy            deploy the loaders for the given release as a snapshot
    deploy_release    deploy the loaders for the given release
    clear             remove downloaded releases, build output and test directories";

#[derive(Debug, Parser)]
#[command(name = "aprel")]
#[command(author, version, about = "aprel - build, verify and publish ap-loader releases")]
#[command(after_help = COMMANDS_HELP)]
pub struct Cli {
    /// Project root holding the build descriptors and all generated directories
    #[arg(long, env = "APREL_ROOT", default_value = ".")]
    pub root: PathBuf,

    /// Log external commands instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Runtime versions to repeat the tests with (comma-separated)
    #[arg(long, env = "APREL_RUNTIME_VERSIONS", value_delimiter = ',')]
    pub runtimes: Vec<String>,

    /// Deploy without a passing verification report
    #[arg(long)]
    pub skip_verify: bool,

    /// Commands to run, optionally followed by the version
    #[arg(value_name = "COMMAND")]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum Step {
    CurrentVersion,
    Versions,
    Download,
    Build,
    Test,
    DeployMvn,
    DeployGh,
    Deploy,
    DeployRelease,
    Clear,
}

impl Step {
    /// Whether the step works on a specific release.
    pub fn needs_release(self) -> bool {
        !matches!(self, Self::CurrentVersion | Self::Versions | Self::Clear)
    }
}

/// Parsed positional arguments: the steps and the optional version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub steps: Vec<Step>,
    pub version: Option<String>,
}

/// Split positional arguments into steps and a trailing version.
pub fn parse_invocation(args: &[String]) -> Result<Invocation, String> {
    let (version, commands) = match args.split_last() {
        Some((last, rest)) if last.starts_with(|c: char| c.is_ascii_digit()) => {
            (Some(last.clone()), rest)
        }
        _ => (None, args),
    };

    let steps = commands
        .iter()
        .map(|arg| Step::from_str(arg, false).map_err(|_| format!("Unknown command: {arg}")))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Invocation { steps, version })
}

/// Runtime selectors with blanks removed (an empty variable means none).
pub fn runtime_selectors(runtimes: &[String]) -> Vec<String> {
    runtimes
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect()
}
