//! External tool invocation.
//!
//! Every build, test and publish step shells out through [`ProcessRunner`]
//! so the orchestration logic can be exercised against scripted results.
//! [`SystemRunner`] is the real implementation; [`WrappedRunner`] re-routes
//! each command through a shell template (used to select a runtime version).

use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use aprel_schema::Diagnostic;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` failed ({status}){output}", status = exit_label(.exit_code), output = output_tail(.stdout, .stderr))]
    Failed {
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

/// Last lines of the captured output, so errors show what the tool said.
fn output_tail(stdout: &str, stderr: &str) -> String {
    const TAIL: usize = 20;
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return String::new();
    }
    let start = lines.len().saturating_sub(TAIL);
    format!(":\n{}", lines[start..].join("\n"))
}

/// A command to execute: program, arguments, working directory and extra
/// environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Path arguments are passed lossily; the pipeline only deals in UTF-8 paths.
    #[must_use]
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy())
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The command as a shell-quoted line, for logs, diagnostics and shell
    /// wrappers.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|s| shell_quote(s))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whether any argument equals `needle`.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

/// Quote `s` for a POSIX shell when it contains anything beyond a safe set.
pub fn shell_quote(s: &str) -> Cow<'_, str> {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(format!("'{}'", s.replace('\'', r"'\''")))
    }
}

/// Exit status and captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful run with no output.
    pub fn ok() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// Successful run printing `stdout`.
    pub fn with_stdout(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed run with the given exit code and error output.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn to_diagnostic(&self, spec: &CommandSpec) -> Diagnostic {
        Diagnostic {
            command: spec.command_line(),
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        }
    }

    /// Turn a non-zero exit into [`ProcessError::Failed`].
    pub fn check(self, spec: &CommandSpec) -> Result<Self, ProcessError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ProcessError::Failed {
                command: spec.command_line(),
                exit_code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Capability to run external commands.
pub trait ProcessRunner: Send + Sync {
    /// Run to completion, capturing stdout and stderr. A non-zero exit is
    /// not an error at this level; see [`ProcessRunner::run_checked`].
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError>;

    /// Run attached to the operator's terminal, so credential prompts and
    /// full tool output reach them. Returns the exit code.
    fn run_interactive(&self, spec: &CommandSpec) -> Result<Option<i32>, ProcessError>;

    /// Whether commands are only logged, not executed.
    fn is_dry_run(&self) -> bool {
        false
    }

    /// Run and fail on a non-zero exit.
    fn run_checked(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.run(spec)?.check(spec)
    }
}

impl<T: ProcessRunner + ?Sized> ProcessRunner for std::sync::Arc<T> {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        (**self).run(spec)
    }
    fn run_interactive(&self, spec: &CommandSpec) -> Result<Option<i32>, ProcessError> {
        (**self).run_interactive(spec)
    }
    fn is_dry_run(&self) -> bool {
        (**self).is_dry_run()
    }
}

/// Runs commands as child processes of the current one.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner {
    dry_run: bool,
}

impl SystemRunner {
    pub fn new(dry_run: bool) -> Self {
        Self { dry_run }
    }

    fn command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        if let Some(cwd) = &spec.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(spec.env.iter().map(|(k, v)| (k, v)));
        cmd
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        let line = spec.command_line();
        if self.dry_run {
            info!("[dry-run] {line}");
            return Ok(CommandOutput::ok());
        }

        debug!("Execute {line}");
        let output = Self::command(spec)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ProcessError::Spawn {
                command: line.clone(),
                source,
            })?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("`{line}` exited with {:?}", result.exit_code);
        Ok(result)
    }

    fn run_interactive(&self, spec: &CommandSpec) -> Result<Option<i32>, ProcessError> {
        let line = spec.command_line();
        if self.dry_run {
            info!("[dry-run] {line}");
            return Ok(Some(0));
        }

        debug!("Execute interactively {line}");
        let status = Self::command(spec)
            .status()
            .map_err(|source| ProcessError::Spawn {
                command: line,
                source,
            })?;
        Ok(status.code())
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Routes every command through `shell -c <template>`, where `{command}` in
/// the template is replaced with the quoted command line.
pub struct WrappedRunner<'a> {
    inner: &'a dyn ProcessRunner,
    shell: String,
    template: String,
}

impl std::fmt::Debug for WrappedRunner<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrappedRunner")
            .field("shell", &self.shell)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl<'a> WrappedRunner<'a> {
    pub fn new(inner: &'a dyn ProcessRunner, shell: &str, template: impl Into<String>) -> Self {
        Self {
            inner,
            shell: shell.to_string(),
            template: template.into(),
        }
    }

    pub fn wrap(&self, spec: &CommandSpec) -> CommandSpec {
        let script = self.template.replace("{command}", &spec.command_line());
        CommandSpec {
            program: self.shell.clone(),
            args: vec!["-c".to_string(), script],
            cwd: spec.cwd.clone(),
            env: spec.env.clone(),
        }
    }
}

impl ProcessRunner for WrappedRunner<'_> {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.inner.run(&self.wrap(spec))
    }

    fn run_interactive(&self, spec: &CommandSpec) -> Result<Option<i32>, ProcessError> {
        self.inner.run_interactive(&self.wrap(spec))
    }

    fn is_dry_run(&self) -> bool {
        self.inner.is_dry_run()
    }
}
