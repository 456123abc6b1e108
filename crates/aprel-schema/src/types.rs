//! Release, artifact, verification and deployment records.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::Platform;

/// A resolved upstream release.
///
/// Constructed once by the resolver and treated as immutable by every later
/// stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Upstream version without the tag prefix (e.g. "2.8.3").
    pub version: String,

    /// Upstream release title.
    pub name: String,

    /// Platforms derived from the release's archive assets, in asset order.
    pub platforms: Vec<Platform>,

    /// Archive download URL per platform.
    pub asset_urls: BTreeMap<Platform, String>,

    /// URL of the upstream source snapshot for this tag.
    pub source_archive_url: String,

    /// Upstream changelog (release body).
    pub changelog_body: String,

    /// Web page of the upstream release.
    pub html_url: String,

    /// Whether the upstream marked this release as a prerelease.
    pub is_prerelease: bool,

    /// Whether this is the newest release of the supported major version.
    pub is_most_recent: bool,
}

impl Release {
    /// Upstream git tag (`v` + version).
    pub fn tag(&self) -> String {
        format!("v{}", self.version)
    }

    /// Every build matrix entry: each platform in order, then the combined
    /// bundle.
    pub fn matrix(&self) -> impl Iterator<Item = Platform> + '_ {
        self.platforms
            .iter()
            .cloned()
            .chain(std::iter::once(Platform::all()))
    }
}

/// A loader file produced by the build matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// Platform the artifact bundles (or [`Platform::ALL`]).
    pub platform: Platform,

    /// Upstream version.
    pub version: String,

    /// Local packaging revision.
    pub subversion: u32,

    /// Stable output path, derived from version, subversion and platform.
    pub file_path: PathBuf,
}

/// Captured output of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The command line as it was executed.
    pub command: String,

    /// Exit code, `None` when the process was killed by a signal or never ran.
    pub exit_code: Option<i32>,

    /// Captured standard output.
    pub stdout: String,

    /// Captured standard error.
    pub stderr: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.exit_code {
            Some(code) => writeln!(f, "$ {} (exit {code})", self.command)?,
            None => writeln!(f, "$ {} (no exit code)", self.command)?,
        }
        for line in self.stdout.lines() {
            writeln!(f, "  | {line}")?;
        }
        for line in self.stderr.lines() {
            writeln!(f, "  ! {line}")?;
        }
        Ok(())
    }
}

/// Outcome of the basic execution check for one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Platform of the checked artifact.
    pub platform: Platform,

    /// Whether every step of the check succeeded.
    pub passed: bool,

    /// Why the check failed, if it did.
    pub reason: Option<String>,

    /// Output of every command the check ran, in order.
    pub diagnostics: Vec<Diagnostic>,
}

/// Outcome of one replayed upstream test script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptOutcome {
    /// Script file name.
    pub script: String,

    /// Whether the script exited successfully.
    pub passed: bool,

    /// Captured output of the script run.
    pub diagnostic: Diagnostic,
}

/// One complete verification pass, optionally under a selected runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRun {
    /// Runtime version selector, `None` for the ambient runtime.
    pub runtime: Option<String>,

    /// The single platform whose artifact works on this host.
    pub host_platform: Option<Platform>,

    /// Basic execution results, platforms first and the bundle last.
    pub results: Vec<VerificationResult>,

    /// Replayed upstream test scripts.
    pub suite: Vec<ScriptOutcome>,

    /// Failure message when the run did not pass.
    pub failure: Option<String>,
}

impl VerificationRun {
    /// Whether the run passed every check.
    pub fn passed(&self) -> bool {
        self.failure.is_none() && self.host_platform.is_some()
    }
}

/// Aggregated verification outcome for one build of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Upstream version that was verified.
    pub version: String,

    /// Packaging revision that was verified.
    pub subversion: u32,

    /// One entry per runtime (a single entry without runtime selection).
    pub runs: Vec<VerificationRun>,
}

impl VerificationReport {
    /// Whether every run passed. A report without runs never passes.
    pub fn is_passing(&self) -> bool {
        !self.runs.is_empty() && self.runs.iter().all(VerificationRun::passed)
    }
}

/// Distribution channel a build can be published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Channel {
    /// Maven package registry.
    Registry,
    /// GitHub release.
    CodeHost,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry => f.write_str("registry"),
            Self::CodeHost => f.write_str("code-host"),
        }
    }
}

/// Identity a deployment is keyed on: `{version}-{subversion}` plus
/// `-SNAPSHOT` for snapshot deployments.
///
/// ```
/// use aprel_schema::DeploymentIdentity;
///
/// let id = DeploymentIdentity::new("2.8.3", 7, true);
/// assert_eq!(id.to_string(), "2.8.3-7-SNAPSHOT");
/// assert_eq!(id.tag(), "2.8.3-7");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentIdentity {
    /// Upstream version.
    pub version: String,

    /// Packaging revision.
    pub subversion: u32,

    /// Snapshot (overwritable) versus final release.
    pub snapshot: bool,
}

impl DeploymentIdentity {
    /// Create an identity.
    pub fn new(version: impl Into<String>, subversion: u32, snapshot: bool) -> Self {
        Self {
            version: version.into(),
            subversion,
            snapshot,
        }
    }

    /// `-SNAPSHOT` for snapshots, empty otherwise.
    pub fn suffix(&self) -> &'static str {
        if self.snapshot { "-SNAPSHOT" } else { "" }
    }

    /// Release tag without the snapshot suffix.
    pub fn tag(&self) -> String {
        format!("{}-{}", self.version, self.subversion)
    }
}

impl std::fmt::Display for DeploymentIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}{}", self.version, self.subversion, self.suffix())
    }
}
