//! Deployment to the package registry and the code host.
//!
//! Publishing requires a [`VerifiedBuild`], which can only be obtained from
//! a passing [`VerificationReport`] of the same version and subversion, or
//! through an explicit waiver.
//!
//! Code-host publishing is idempotent per tag. Creating a release that
//! already exists moves to the conflict path, which edits the existing
//! release and re-uploads every asset with `--clobber`.

use std::path::{Path, PathBuf};

use aprel_schema::{BuildArtifact, Channel, DeploymentIdentity, Platform, Release, VerificationReport};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::descriptor::{DescriptorParams, PreparedDescriptors};
use crate::matrix::BuildMatrixResult;
use crate::process::{CommandSpec, ProcessError, ProcessRunner};
use crate::reporter::Reporter;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Build {version}-{subversion} is not verified: {reason}")]
    NotVerified {
        version: String,
        subversion: u32,
        reason: String,
    },

    #[error("Failed to prepare build descriptors: {0}")]
    Descriptor(#[source] std::io::Error),

    #[error("Deploying {identity} for {platform} to the registry failed: {source}")]
    Registry {
        identity: String,
        platform: Platform,
        #[source]
        source: ProcessError,
    },

    #[error("Publishing release {tag} failed: {source}")]
    CodeHost {
        tag: String,
        #[source]
        source: ProcessError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A build that passed verification (or whose verification was waived).
#[derive(Debug, Clone)]
pub struct VerifiedBuild {
    build: BuildMatrixResult,
    waived: bool,
}

impl VerifiedBuild {
    /// Accept `build` if `report` is passing and covers the same version
    /// and subversion.
    pub fn new(build: BuildMatrixResult, report: &VerificationReport) -> Result<Self, PublishError> {
        let not_verified = |reason: String| PublishError::NotVerified {
            version: build.version.clone(),
            subversion: build.subversion,
            reason,
        };
        if report.version != build.version || report.subversion != build.subversion {
            return Err(not_verified(format!(
                "report covers {}-{}",
                report.version, report.subversion
            )));
        }
        if !report.is_passing() {
            let reason = report
                .runs
                .iter()
                .find_map(|r| r.failure.clone())
                .unwrap_or_else(|| "verification did not complete".to_string());
            return Err(not_verified(reason));
        }
        Ok(Self {
            build,
            waived: false,
        })
    }

    /// Skip the verification requirement. Logged, since nothing proves the
    /// build works.
    pub fn waived(build: BuildMatrixResult) -> Self {
        warn!(
            "Publishing {}-{} without verification",
            build.version, build.subversion
        );
        Self {
            build,
            waived: true,
        }
    }

    pub fn build(&self) -> &BuildMatrixResult {
        &self.build
    }

    pub fn is_waived(&self) -> bool {
        self.waived
    }
}

/// How a code-host release ended up published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishedVia {
    /// A new release was created.
    Created,
    /// The release already existed and was edited in place.
    Edited,
}

/// States of a code-host publication.
#[derive(Debug)]
pub enum PublishState {
    Publishing,
    Conflict(ProcessError),
    Resolving,
    Published(PublishedVia),
}

/// What a publish run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishSummary {
    /// Registry deployments, one per platform plus the bundle.
    pub registry: Vec<Platform>,
    /// Outcome of the code-host release, if that channel was selected.
    pub code_host: Option<PublishedVia>,
}

pub struct Publisher<'a> {
    config: &'a Config,
    runner: &'a dyn ProcessRunner,
    reporter: &'a dyn Reporter,
}

impl<'a> Publisher<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn ProcessRunner, reporter: &'a dyn Reporter) -> Self {
        Self {
            config,
            runner,
            reporter,
        }
    }

    pub fn publish(
        &self,
        release: &Release,
        verified: &VerifiedBuild,
        channels: &[Channel],
        snapshot: bool,
    ) -> Result<PublishSummary, PublishError> {
        let build = verified.build();
        let identity = DeploymentIdentity::new(&build.version, build.subversion, snapshot);
        let mut summary = PublishSummary::default();
        if verified.is_waived() {
            self.reporter
                .warning(&format!("Deploying {identity} without verification"));
        }

        if channels.contains(&Channel::Registry) {
            self.reporter.section(&format!("Deploy {identity} to the registry"));
            summary.registry = self.publish_registry(build, &identity)?;
        }
        if channels.contains(&Channel::CodeHost) {
            self.reporter.section(&format!("Deploy {} to the code host", identity.tag()));
            summary.code_host = Some(self.publish_code_host(release, build, &identity)?);
        }
        Ok(summary)
    }

    /// Run `spec`; on failure replay it once attached to the terminal so the
    /// operator sees the full output, then return the original error.
    fn run_or_replay(&self, spec: &CommandSpec) -> Result<(), ProcessError> {
        let Err(error) = self.runner.run_checked(spec) else {
            return Ok(());
        };
        self.reporter
            .warning(&format!("`{}` failed, replaying it", spec.command_line()));
        match self.runner.run_interactive(spec) {
            Ok(code) => debug!("Replay exited with {code:?}"),
            Err(e) => warn!("Replay of `{}` failed: {e}", spec.command_line()),
        }
        Err(error)
    }

    pub fn registry_command(&self, identity: &DeploymentIdentity, platform: &Platform, descriptor: &Path) -> CommandSpec {
        CommandSpec::new(&self.config.tools.build_tool)
            .arg("-Duser.name=")
            .arg(format!("-Dproject.vversion={}", identity.version))
            .arg(format!("-Dproject.subversion={}", identity.subversion))
            .arg(format!("-Dproject.platform={platform}"))
            .arg(format!("-Dproject.suffix={}", identity.suffix()))
            .arg("-f")
            .path_arg(descriptor)
            .args(["clean", "deploy"])
            .current_dir(&self.config.root)
    }

    /// Deploy every artifact of `build` to the registry, each with freshly
    /// materialized descriptors.
    pub fn publish_registry(
        &self,
        build: &BuildMatrixResult,
        identity: &DeploymentIdentity,
    ) -> Result<Vec<Platform>, PublishError> {
        let packaging = &self.config.packaging;
        let mut deployed = Vec::new();

        for artifact in &build.artifacts {
            let platform = &artifact.platform;
            self.reporter
                .step(&format!("Deploy {identity} for {platform}"));
            let params = DescriptorParams {
                identity,
                platform,
                artifact_name: &packaging.artifact_name,
            };
            let prepared = PreparedDescriptors::prepare(
                &self.config.root,
                [packaging.descriptor.as_str(), packaging.descriptor_all.as_str()],
                &params,
            )
            .map_err(PublishError::Descriptor)?;

            let spec = self.registry_command(identity, platform, prepared.for_platform(platform));
            self.run_or_replay(&spec)
                .map_err(|source| PublishError::Registry {
                    identity: identity.to_string(),
                    platform: platform.clone(),
                    source,
                })?;
            info!("Deployed {identity} for {platform}");
            deployed.push(platform.clone());
        }
        Ok(deployed)
    }

    /// Title of the code-host release.
    pub fn release_title(&self, release: &Release) -> String {
        format!(
            "Loader for {} (v{}): {}",
            release.version, self.config.packaging.subversion, release.name
        )
    }

    /// Local release notes, an attribution line and the upstream changelog.
    pub fn changelog(&self, release: &Release) -> String {
        let upstream = &self.config.upstream;
        format!(
            "## {} v{}\n\n{}\n\n_The following is copied from the wrapped [{} release]({}) {}. \
             The source code linked below should be ignored._\n\n{}",
            self.config.packaging.artifact_name,
            self.config.packaging.subversion,
            self.config.packaging.release_notes,
            upstream.project,
            release.html_url,
            upstream.attribution,
            release.changelog_body
        )
    }

    fn stage(&self, dir: &Path, artifacts: &[BuildArtifact]) -> Result<Vec<PathBuf>, PublishError> {
        let mut staged = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            let dest = dir.join(self.config.staged_artifact_name(&artifact.platform));
            if self.runner.is_dry_run() {
                debug!("[dry-run] stage {} -> {}", artifact.file_path.display(), dest.display());
            } else {
                std::fs::copy(&artifact.file_path, &dest)?;
            }
            staged.push(dest);
        }
        Ok(staged)
    }

    /// Create the code-host release for `identity`, or update it in place
    /// when it already exists.
    pub fn publish_code_host(
        &self,
        release: &Release,
        build: &BuildMatrixResult,
        identity: &DeploymentIdentity,
    ) -> Result<PublishedVia, PublishError> {
        let tag = identity.tag();
        let staging = tempfile::Builder::new().prefix("aprel-release-").tempdir()?;
        let changelog = staging.path().join("CHANGELOG.md");
        std::fs::write(&changelog, self.changelog(release))?;
        let assets = self.stage(staging.path(), &build.artifacts)?;

        let gh = |subcommand: &str| {
            CommandSpec::new(&self.config.tools.code_host_cli)
                .args(["release", subcommand, tag.as_str()])
                .current_dir(&self.config.root)
        };
        let with_metadata = |spec: CommandSpec| {
            let spec = spec
                .arg("-F")
                .path_arg(&changelog)
                .arg("-t")
                .arg(self.release_title(release));
            let spec = if release.is_most_recent { spec.arg("--latest") } else { spec };
            if release.is_prerelease { spec.arg("--prerelease") } else { spec }
        };
        let with_assets = |spec: CommandSpec| {
            assets.iter().fold(spec, |spec, path| spec.path_arg(path))
        };

        let create = with_assets(with_metadata(gh("create")));
        let edit = with_metadata(gh("edit"));
        let upload = with_assets(gh("upload")).arg("--clobber");

        let mut state = PublishState::Publishing;
        loop {
            debug!("Release {tag}: {state:?}");
            state = match state {
                PublishState::Publishing => {
                    self.reporter.step(&format!("Create release {tag}"));
                    match self.runner.run_checked(&create) {
                        Ok(_) => PublishState::Published(PublishedVia::Created),
                        Err(e) => PublishState::Conflict(e),
                    }
                }
                PublishState::Conflict(error) => {
                    // either a real problem or the release exists; the
                    // update path tells them apart
                    info!("Creating release {tag} failed ({error}), updating the existing release");
                    PublishState::Resolving
                }
                PublishState::Resolving => {
                    self.reporter.step(&format!("Update release {tag}"));
                    self.run_or_replay(&edit)
                        .and_then(|()| self.run_or_replay(&upload))
                        .map_err(|source| PublishError::CodeHost {
                            tag: tag.clone(),
                            source,
                        })?;
                    PublishState::Published(PublishedVia::Edited)
                }
                PublishState::Published(via) => {
                    self.reporter.success(&format!("Published release {tag}"));
                    return Ok(via);
                }
            };
        }
    }
}
