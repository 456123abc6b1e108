//! Verification harness.
//!
//! Proves a build works before it may be published:
//!
//! 1. Basic execution check of every artifact: the loader must report an
//!    existing agent library, record a profile of a small target program
//!    and convert that profile.
//! 2. Cross-check: exactly one platform artifact passes on this host, and
//!    the combined bundle passes too.
//! 3. Replay of the upstream test suite against the combined bundle.
//!
//! With runtime selectors the whole flow repeats once per runtime under a
//! wrapper command. Failures are collected and reported after every runtime
//! ran.

use std::path::{Path, PathBuf};

use aprel_schema::{
    BuildArtifact, Diagnostic, Platform, ScriptOutcome, VerificationReport, VerificationResult,
    VerificationRun,
};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::matrix::BuildMatrixResult;
use crate::process::{CommandOutput, CommandSpec, ProcessError, ProcessRunner, WrappedRunner};
use crate::reporter::Reporter;

#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("None of the platform artifacts for {version} works")]
    NoPlatformPassed { version: String },

    #[error(
        "Multiple platform artifacts work for {version}: {}, this should not be the case",
        .platforms.iter().map(Platform::as_str).collect::<Vec<_>>().join(", ")
    )]
    MultiplePlatformsPassed {
        version: String,
        platforms: Vec<Platform>,
    },

    #[error("The combined artifact for {version} does not work")]
    BundleFailed { version: String },

    #[error("Build of {version} has no combined artifact")]
    MissingBundle { version: String },

    #[error("Source snapshot {} is missing, run `download` first", .path.display())]
    MissingSource { path: PathBuf },

    #[error("Some upstream tests failed: {}", .failed.join(", "))]
    SuiteFailed { failed: Vec<String> },

    #[error("Verification failed for runtimes: {}", .failed.join(", "))]
    RuntimeFailures { failed: Vec<String> },

    #[error("Invalid verification report {}: {source}", .path.display())]
    Report {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to list test sources: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to copy test sources: {0}")]
    Copy(#[from] fs_extra::error::Error),
}

/// Point an upstream test script at the loader instead of the raw agent.
pub fn rewrite_test_script(content: &str, bundle: &Path) -> String {
    let bundle = bundle.display();
    content
        .replace("../profiler.sh ", &format!("java -jar '{bundle}' profiler "))
        .replace(
            "-agentpath:../build/libasyncProfiler.so",
            &format!("-javaagent:{bundle}"),
        )
}

fn is_test_script(name: &str) -> bool {
    name.ends_with(".sh") && !name.starts_with("fd")
}

/// File names in `dir`, sorted.
fn sorted_file_names(dir: &Path) -> Result<Vec<String>, walkdir::Error> {
    let mut names = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(names)
}

fn remove_dir_if_exists(dir: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

pub struct Harness<'a> {
    config: &'a Config,
    runner: &'a dyn ProcessRunner,
    reporter: &'a dyn Reporter,
}

impl<'a> Harness<'a> {
    pub fn new(config: &'a Config, runner: &'a dyn ProcessRunner, reporter: &'a dyn Reporter) -> Self {
        Self {
            config,
            runner,
            reporter,
        }
    }

    /// Verify `build`, once with the ambient runtime or once per entry of
    /// `runtimes`.
    pub fn verify(
        &self,
        build: &BuildMatrixResult,
        runtimes: &[String],
    ) -> Result<VerificationReport, VerifyError> {
        let (report, outcome) = self.run(build, runtimes);
        outcome.map(|()| report)
    }

    /// Like [`Harness::verify`], but persists the report whether it passed
    /// or not, replacing any earlier report of the same version.
    pub fn verify_and_record(
        &self,
        build: &BuildMatrixResult,
        runtimes: &[String],
    ) -> Result<VerificationReport, VerifyError> {
        discard_report(self.config, &build.version)?;
        let (report, outcome) = self.run(build, runtimes);
        let saved = save_report(self.config, &report);
        outcome?;
        let path = saved?;
        debug!("Saved verification report to {}", path.display());
        Ok(report)
    }

    /// The report of every run so far, and whether verification passed.
    pub fn run(
        &self,
        build: &BuildMatrixResult,
        runtimes: &[String],
    ) -> (VerificationReport, Result<(), VerifyError>) {
        let mut report = VerificationReport {
            version: build.version.clone(),
            subversion: build.subversion,
            runs: Vec::new(),
        };

        if runtimes.is_empty() {
            let (run, outcome) = self.run_once(self.runner, build, None);
            report.runs.push(run);
            return (report, outcome);
        }

        let mut failed = Vec::new();
        for runtime in runtimes {
            self.reporter.section(&format!("Test with runtime {runtime}"));
            let template = self.config.tools.runtime_wrapper.replace("{version}", runtime);
            let wrapped = WrappedRunner::new(self.runner, &self.config.tools.shell, template);
            let (run, outcome) = self.run_once(&wrapped, build, Some(runtime));
            if let Err(e) = outcome {
                self.reporter
                    .error(&format!("Tests with runtime {runtime} failed: {e}"));
                failed.push(runtime.clone());
            }
            report.runs.push(run);
        }

        let outcome = if failed.is_empty() {
            Ok(())
        } else {
            Err(VerifyError::RuntimeFailures { failed })
        };
        (report, outcome)
    }

    /// One full pass: prepare, cross-check, replay. The returned run records
    /// everything that happened up to the first fatal error.
    pub fn run_once(
        &self,
        runner: &dyn ProcessRunner,
        build: &BuildMatrixResult,
        runtime: Option<&str>,
    ) -> (VerificationRun, Result<(), VerifyError>) {
        let mut run = VerificationRun {
            runtime: runtime.map(str::to_string),
            host_platform: None,
            results: Vec::new(),
            suite: Vec::new(),
            failure: None,
        };

        let outcome = self.run_steps(runner, build, &mut run);
        if let Err(e) = &outcome {
            run.failure = Some(e.to_string());
        }
        (run, outcome)
    }

    fn run_steps(
        &self,
        runner: &dyn ProcessRunner,
        build: &BuildMatrixResult,
        run: &mut VerificationRun,
    ) -> Result<(), VerifyError> {
        self.prepare_tests(runner, build)?;
        let host = self.check_platforms(runner, build, &mut run.results)?;
        info!("Platform {host} works on this host");
        run.host_platform = Some(host);
        self.replay_suite(runner, &mut run.suite)
    }

    fn bundle<'b>(&self, build: &'b BuildMatrixResult) -> Result<&'b BuildArtifact, VerifyError> {
        build.bundle().ok_or_else(|| VerifyError::MissingBundle {
            version: build.version.clone(),
        })
    }

    /// Copy the source snapshot into the scratch directory, compile the
    /// helper programs and rewrite the test scripts to use the bundle.
    pub fn prepare_tests(
        &self,
        runner: &dyn ProcessRunner,
        build: &BuildMatrixResult,
    ) -> Result<(), VerifyError> {
        self.reporter.step("Build tests");
        let bundle = self.bundle(build)?;
        let source = self.config.source_dir(&build.version);
        if !source.is_dir() {
            return Err(VerifyError::MissingSource { path: source });
        }

        remove_dir_if_exists(&self.config.tests_code_dir)?;
        // reset the loader's own cache of extracted agent libraries
        runner.run_checked(
            &CommandSpec::new(&self.config.tools.java)
                .arg("-jar")
                .path_arg(&bundle.file_path)
                .arg("clear"),
        )?;
        std::fs::create_dir_all(&self.config.tests_dir)?;
        std::fs::create_dir_all(&self.config.tests_code_dir)?;
        fs_extra::dir::copy(
            &source,
            &self.config.tests_code_dir,
            &fs_extra::dir::CopyOptions::new().content_only(true),
        )?;

        let test_dir = self.config.test_scripts_dir();
        for name in sorted_file_names(&test_dir)? {
            let path = test_dir.join(&name);
            if name.ends_with(".java") {
                runner.run_checked(
                    &CommandSpec::new(&self.config.tools.javac)
                        .path_arg(&path)
                        .current_dir(&self.config.root),
                )?;
            }
            if is_test_script(&name) {
                let content = std::fs::read_to_string(&path)?;
                std::fs::write(&path, rewrite_test_script(&content, &bundle.file_path))?;
                debug!("Rewrote {}", path.display());
            }
        }
        Ok(())
    }

    /// Run `spec` as one step of the basic execution check, recording its
    /// output. Returns the failure reason when the step failed.
    fn check_step(
        runner: &dyn ProcessRunner,
        spec: &CommandSpec,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<CommandOutput, String> {
        match runner.run(spec) {
            Ok(output) => {
                diagnostics.push(output.to_diagnostic(spec));
                if output.success() {
                    Ok(output)
                } else {
                    Err(format!("`{}` failed", spec.command_line()))
                }
            }
            Err(e) => {
                diagnostics.push(Diagnostic {
                    command: spec.command_line(),
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                });
                Err(e.to_string())
            }
        }
    }

    /// The smoke test proving the agent embedded in `artifact` loads on this
    /// host and produces a profile.
    pub fn basic_execution(&self, runner: &dyn ProcessRunner, artifact: &BuildArtifact) -> VerificationResult {
        let mut diagnostics = Vec::new();
        let reason = self.basic_execution_steps(runner, &artifact.file_path, &mut diagnostics).err();
        if let Some(reason) = &reason {
            debug!("Basic execution of {} failed: {reason}", artifact.platform);
        }
        VerificationResult {
            platform: artifact.platform.clone(),
            passed: reason.is_none(),
            reason,
            diagnostics,
        }
    }

    fn basic_execution_steps(
        &self,
        runner: &dyn ProcessRunner,
        artifact: &Path,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(), String> {
        let tools = &self.config.tools;
        let tests_dir = &self.config.tests_dir;
        remove_dir_if_exists(tests_dir).map_err(|e| e.to_string())?;
        std::fs::create_dir_all(tests_dir).map_err(|e| e.to_string())?;

        let agentpath = CommandSpec::new(&tools.java)
            .arg("-jar")
            .path_arg(artifact)
            .arg("agentpath");
        let output = Self::check_step(runner, &agentpath, diagnostics)?;
        let lib = output.stdout.trim();
        if !lib.ends_with(&tools.native_lib_extension) || !Path::new(lib).exists() {
            return Err(format!("Invalid agentpath: {lib}"));
        }

        let profile = tests_dir.join("profile.jfr");
        let record = CommandSpec::new(&tools.java)
            .arg(format!(
                "-javaagent:{}=start,file={},jfr",
                artifact.display(),
                profile.display()
            ))
            .arg("-cp")
            .path_arg(&self.config.test_scripts_dir())
            .arg(&tools.smoke_target)
            .current_dir(&self.config.root);
        Self::check_step(runner, &record, diagnostics)?;
        if !profile.exists() {
            return Err(format!("No profile written to {}", profile.display()));
        }

        if tools.convert_profile {
            let flamegraph = tests_dir.join("flamegraph.html");
            let convert = CommandSpec::new(&tools.java)
                .arg("-jar")
                .path_arg(artifact)
                .args(["converter", "jfr2flame"])
                .path_arg(&profile)
                .path_arg(&flamegraph)
                .current_dir(&self.config.root);
            Self::check_step(runner, &convert, diagnostics)?;
            if !flamegraph.exists() {
                return Err(format!("No flame graph written to {}", flamegraph.display()));
            }
        }
        Ok(())
    }

    fn surface(&self, result: &VerificationResult) {
        for diagnostic in &result.diagnostics {
            self.reporter.diagnostic(diagnostic);
        }
        if let Some(reason) = &result.reason {
            self.reporter.error(reason);
        }
    }

    /// Exactly one platform artifact must pass on this host, and the bundle
    /// must pass as well. Returns the passing platform.
    pub fn check_platforms(
        &self,
        runner: &dyn ProcessRunner,
        build: &BuildMatrixResult,
        results: &mut Vec<VerificationResult>,
    ) -> Result<Platform, VerifyError> {
        self.reporter.step("Test basic execution of javaagent");
        let start = results.len();
        let mut passing = Vec::new();
        for artifact in build.platform_artifacts() {
            let result = self.basic_execution(runner, artifact);
            if result.passed {
                passing.push(artifact.platform.clone());
            }
            results.push(result);
        }

        if passing.is_empty() {
            for (slot, artifact) in results[start..].iter_mut().zip(build.platform_artifacts()) {
                self.reporter.warning(&format!(
                    "Test release {} for {} failed:",
                    build.version, artifact.platform
                ));
                *slot = self.basic_execution(runner, artifact);
                self.surface(slot);
            }
            return Err(VerifyError::NoPlatformPassed {
                version: build.version.clone(),
            });
        }
        if passing.len() > 1 {
            return Err(VerifyError::MultiplePlatformsPassed {
                version: build.version.clone(),
                platforms: passing,
            });
        }

        let bundle = self.bundle(build)?;
        let mut result = self.basic_execution(runner, bundle);
        if !result.passed {
            self.reporter.warning(&format!(
                "Test release {} for {} failed:",
                build.version, bundle.platform
            ));
            result = self.basic_execution(runner, bundle);
            self.surface(&result);
        }
        let bundle_passed = result.passed;
        results.push(result);
        if !bundle_passed {
            return Err(VerifyError::BundleFailed {
                version: build.version.clone(),
            });
        }

        Ok(passing.remove(0))
    }

    /// Run every rewritten upstream test script, without stopping at the
    /// first failure.
    pub fn replay_suite(
        &self,
        runner: &dyn ProcessRunner,
        suite: &mut Vec<ScriptOutcome>,
    ) -> Result<(), VerifyError> {
        self.reporter.step("Run upstream tests");
        let test_dir = self.config.test_scripts_dir();
        let mut failed = Vec::new();

        for name in sorted_file_names(&test_dir)?.into_iter().filter(|n| is_test_script(n)) {
            self.reporter.info(&format!("Execute {name}"));
            let spec = CommandSpec::new(&self.config.tools.shell)
                .path_arg(&test_dir.join(&name))
                .current_dir(&test_dir);
            let mut diagnostics = Vec::new();
            let passed = Self::check_step(runner, &spec, &mut diagnostics).is_ok();
            let diagnostic = diagnostics.pop().unwrap_or_default();
            if !passed {
                warn!("Test {name} failed");
                self.reporter.error(&format!("Test {name} failed"));
                self.reporter.diagnostic(&diagnostic);
                failed.push(name.clone());
            }
            suite.push(ScriptOutcome {
                script: name,
                passed,
                diagnostic,
            });
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(VerifyError::SuiteFailed { failed })
        }
    }
}

/// Persist `report` next to the artifacts it covers.
pub fn save_report(config: &Config, report: &VerificationReport) -> Result<PathBuf, VerifyError> {
    let path = config.report_path(&report.version);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report).map_err(|source| VerifyError::Report {
        path: path.clone(),
        source,
    })?;
    std::fs::write(&path, json)?;
    Ok(path)
}

/// Remove the persisted report of `version`. Returns whether one existed.
pub fn discard_report(config: &Config, version: &str) -> std::io::Result<bool> {
    match std::fs::remove_file(config.report_path(version)) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Load the persisted report of `version`, if one exists.
pub fn load_report(config: &Config, version: &str) -> Result<Option<VerificationReport>, VerifyError> {
    let path = config.report_path(version);
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| VerifyError::Report { path, source })
}
