//! Build matrix.
//!
//! One build tool invocation per platform, then one for the combined bundle.
//! Each build's output is copied to a stable path derived from version,
//! subversion and platform. The first failing build aborts the matrix.

use std::path::PathBuf;
use std::time::Instant;

use aprel_schema::{BuildArtifact, Platform, Release};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::Config;
use crate::process::{CommandSpec, ProcessError, ProcessRunner};
use crate::reporter::Reporter;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Build for {platform} failed: {source}")]
    Tool {
        platform: Platform,
        #[source]
        source: ProcessError,
    },

    #[error("Build for {platform} did not produce {}", .path.display())]
    MissingOutput { platform: Platform, path: PathBuf },

    #[error("Missing build artifact {}, run `build` first", .path.display())]
    MissingArtifact { path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Every artifact of one release build, platforms first and the bundle last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildMatrixResult {
    pub version: String,
    pub subversion: u32,
    pub artifacts: Vec<BuildArtifact>,
}

impl BuildMatrixResult {
    /// Per-platform artifacts, without the bundle.
    pub fn platform_artifacts(&self) -> impl Iterator<Item = &BuildArtifact> {
        self.artifacts.iter().filter(|a| !a.platform.is_all())
    }

    /// The combined bundle.
    pub fn bundle(&self) -> Option<&BuildArtifact> {
        self.artifacts.iter().find(|a| a.platform.is_all())
    }

    /// Reload the result of an earlier build from the output directory.
    pub fn from_disk(config: &Config, release: &Release) -> Result<Self, BuildError> {
        let artifacts = release
            .matrix()
            .map(|platform| {
                let file_path = config.artifact_path(&release.version, &platform);
                if !file_path.exists() {
                    return Err(BuildError::MissingArtifact { path: file_path });
                }
                Ok(BuildArtifact {
                    platform,
                    version: release.version.clone(),
                    subversion: config.packaging.subversion,
                    file_path,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            version: release.version.clone(),
            subversion: config.packaging.subversion,
            artifacts,
        })
    }
}

pub struct BuildMatrix<'a> {
    config: &'a Config,
    runner: &'a dyn ProcessRunner,
    reporter: &'a dyn Reporter,
}

impl<'a> BuildMatrix<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn ProcessRunner, reporter: &'a dyn Reporter) -> Self {
        Self {
            config,
            runner,
            reporter,
        }
    }

    /// The build tool invocation for one matrix entry.
    pub fn build_command(&self, version: &str, platform: &Platform) -> CommandSpec {
        let packaging = &self.config.packaging;
        let descriptor = if platform.is_all() {
            &packaging.descriptor_all
        } else {
            &packaging.descriptor
        };
        CommandSpec::new(&self.config.tools.build_tool)
            .arg("-Duser.name=")
            .arg(format!("-Dproject.vversion={version}"))
            .arg(format!("-Dproject.subversion={}", packaging.subversion))
            .arg(format!("-Dproject.platform={platform}"))
            .arg("-f")
            .arg(descriptor)
            .args(["package", "assembly:single"])
            .current_dir(&self.config.root)
    }

    pub fn build(&self, release: &Release) -> Result<BuildMatrixResult, BuildError> {
        let start = Instant::now();
        std::fs::create_dir_all(&self.config.output_dir)?;
        // new artifacts invalidate any earlier verification
        if !self.runner.is_dry_run()
            && crate::verify::discard_report(self.config, &release.version)?
        {
            info!("Discarded verification report of {}", release.version);
        }
        let mut artifacts = Vec::with_capacity(release.platforms.len() + 1);

        for platform in release.matrix() {
            artifacts.push(self.build_one(&release.version, platform)?);
        }

        info!(
            "Built {} artifacts for {} in {:.1}s",
            artifacts.len(),
            release.version,
            start.elapsed().as_secs_f64()
        );
        self.reporter
            .summary(artifacts.len(), "built", start.elapsed().as_secs_f64());

        Ok(BuildMatrixResult {
            version: release.version.clone(),
            subversion: self.config.packaging.subversion,
            artifacts,
        })
    }

    fn build_one(&self, version: &str, platform: Platform) -> Result<BuildArtifact, BuildError> {
        self.reporter.step(&format!("Build release for {platform}"));
        let spec = self.build_command(version, &platform);
        self.runner
            .run_checked(&spec)
            .map_err(|source| BuildError::Tool {
                platform: platform.clone(),
                source,
            })?;

        let output = self.config.build_output_path(version, &platform);
        let file_path = self.config.artifact_path(version, &platform);
        if self.runner.is_dry_run() {
            debug!("[dry-run] copy {} -> {}", output.display(), file_path.display());
        } else {
            if !output.exists() {
                return Err(BuildError::MissingOutput {
                    platform,
                    path: output,
                });
            }
            std::fs::copy(&output, &file_path)?;
            debug!("Copied {} -> {}", output.display(), file_path.display());
        }

        Ok(BuildArtifact {
            platform,
            version: version.to_string(),
            subversion: self.config.packaging.subversion,
            file_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::process::testing::ScriptedRunner;
    use crate::reporter::NullReporter;
    use std::collections::BTreeMap;

    fn release(platforms: &[&str]) -> Release {
        Release {
            version: "2.9".to_string(),
            name: "Async-profiler 2.9".to_string(),
            platforms: platforms.iter().map(|p| Platform::new(*p).unwrap()).collect(),
            asset_urls: BTreeMap::new(),
            source_archive_url: String::new(),
            changelog_body: String::new(),
            html_url: String::new(),
            is_prerelease: false,
            is_most_recent: true,
        }
    }

    /// A runner that behaves like the build tool: writes the `-full.jar`
    /// for the requested platform into `target/`.
    fn build_tool(config: &Config, fail_on: Option<&'static str>) -> ScriptedRunner {
        let target = config.target_dir.clone();
        ScriptedRunner::new(move |spec| {
            let platform = spec
                .args
                .iter()
                .find_map(|a| a.strip_prefix("-Dproject.platform="))
                .unwrap()
                .to_string();
            if fail_on == Some(platform.as_str()) {
                return CommandOutput::failed(1, "[ERROR] BUILD FAILURE");
            }
            std::fs::create_dir_all(&target).unwrap();
            std::fs::write(target.join(format!("ap-loader-{platform}-2.9-7-full.jar")), &platform)
                .unwrap();
            CommandOutput::ok()
        })
    }

    #[test]
    fn test_matrix_builds_platforms_then_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let runner = build_tool(&config, None);
        let matrix = BuildMatrix::new(&config, &runner, &NullReporter);

        let result = matrix.build(&release(&["linux-x64", "macos"])).unwrap();

        assert_eq!(result.artifacts.len(), 3);
        assert_eq!(result.bundle().unwrap().platform, Platform::all());
        assert_eq!(result.platform_artifacts().count(), 2);
        for artifact in &result.artifacts {
            assert_eq!(
                std::fs::read_to_string(&artifact.file_path).unwrap(),
                artifact.platform.as_str()
            );
        }

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].has_arg("pom.xml"));
        assert!(calls[2].has_arg("-Dproject.platform=all"));
        assert!(calls[2].has_arg("pom_all.xml"));
        assert!(calls[0].has_arg("-Dproject.subversion=7"));
    }

    #[test]
    fn test_rebuild_discards_verification_report() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let report = config.report_path("2.9");
        std::fs::create_dir_all(report.parent().unwrap()).unwrap();
        std::fs::write(&report, "{}").unwrap();

        let runner = build_tool(&config, None);
        BuildMatrix::new(&config, &runner, &NullReporter)
            .build(&release(&["macos"]))
            .unwrap();

        assert!(!report.exists());
    }

    #[test]
    fn test_failure_aborts_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let runner = build_tool(&config, Some("linux-x64"));
        let matrix = BuildMatrix::new(&config, &runner, &NullReporter);

        let err = matrix
            .build(&release(&["linux-x64", "macos"]))
            .unwrap_err();

        assert!(matches!(err, BuildError::Tool { ref platform, .. } if platform.as_str() == "linux-x64"));
        assert!(err.to_string().contains("BUILD FAILURE"));
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_missing_output_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let runner = ScriptedRunner::succeeding();
        let matrix = BuildMatrix::new(&config, &runner, &NullReporter);

        let err = matrix.build(&release(&["macos"])).unwrap_err();
        assert!(matches!(err, BuildError::MissingOutput { .. }));
    }

    #[test]
    fn test_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::new(dir.path());
        let release = release(&["macos"]);

        let err = BuildMatrixResult::from_disk(&config, &release).unwrap_err();
        assert!(err.to_string().contains("run `build` first"));

        let runner = build_tool(&config, None);
        BuildMatrix::new(&config, &runner, &NullReporter)
            .build(&release)
            .unwrap();
        let loaded = BuildMatrixResult::from_disk(&config, &release).unwrap();
        assert_eq!(loaded.artifacts.len(), 2);
        assert_eq!(loaded.subversion, 7);
    }
}
