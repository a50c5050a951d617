//! External program runner.
//!
//! make, scp and ssh all go through [`Cmd`]. A non-zero exit surfaces as
//! [`PipelineError::ExternalTool`] carrying the step label and captured
//! stderr, so callers only add context.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use tracing::debug;

use crate::error::PipelineError;

/// Captured output of a finished program.
#[derive(Debug, Clone)]
pub struct Output {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit code; -1 when killed by a signal.
    pub fn code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// One external program invocation, built up by chaining.
pub struct Cmd {
    program: String,
    args: Vec<String>,
    /// Child-only variables; never shown in [`Cmd::display`].
    envs: Vec<(String, String)>,
    input: Option<String>,
    tolerate_failure: bool,
    label: Option<String>,
}

impl Cmd {
    pub fn new(program: impl AsRef<str>) -> Self {
        Self {
            program: program.as_ref().to_string(),
            args: Vec::new(),
            envs: Vec::new(),
            input: None,
            tolerate_failure: false,
            label: None,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_string()));
        self
    }

    pub fn arg_path(self, path: &Path) -> Self {
        let path = path.to_string_lossy().into_owned();
        self.arg(path)
    }

    pub fn env(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.envs
            .push((key.as_ref().to_string(), value.as_ref().to_string()));
        self
    }

    /// Written to the child's stdin, which is then closed.
    pub fn stdin_data(mut self, data: impl Into<String>) -> Self {
        self.input = Some(data.into());
        self
    }

    /// Return the output even when the exit status is non-zero.
    pub fn allow_fail(mut self) -> Self {
        self.tolerate_failure = true;
        self
    }

    /// Step name used in errors, e.g. "Kernel build".
    pub fn label(mut self, label: impl AsRef<str>) -> Self {
        self.label = Some(label.as_ref().to_string());
        self
    }

    /// Program and arguments joined with spaces.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd
    }

    fn check(&self, code: i32, success: bool, stderr: &str) -> Result<()> {
        if success || self.tolerate_failure {
            return Ok(());
        }
        Err(PipelineError::ExternalTool {
            program: self.label.clone().unwrap_or_else(|| self.program.clone()),
            code,
            stderr: stderr.to_string(),
        }
        .into())
    }

    fn not_started(&self) -> String {
        format!("Failed to execute '{}'. Is it installed?", self.program)
    }

    /// Run to completion with stdout and stderr captured.
    pub fn run(self) -> Result<Output> {
        debug!(command = %self.display(), "run");
        let mut child = self
            .command()
            .stdin(if self.input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| self.not_started())?;

        if let (Some(data), Some(mut stdin)) = (&self.input, child.stdin.take()) {
            stdin
                .write_all(data.as_bytes())
                .with_context(|| format!("Failed to write stdin of '{}'", self.program))?;
        }

        let raw = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;
        let output = Output {
            status: raw.status,
            stdout: String::from_utf8_lossy(&raw.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&raw.stderr).into_owned(),
        };

        self.check(output.code(), output.success(), &output.stderr)?;
        Ok(output)
    }

    /// Run attached to the terminal so long builds stream their progress.
    /// Nothing is captured, so failures carry no stderr.
    pub fn run_interactive(self) -> Result<ExitStatus> {
        debug!(command = %self.display(), "run (interactive)");
        let status = self
            .command()
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .with_context(|| self.not_started())?;

        self.check(status.code().unwrap_or(-1), status.success(), "")?;
        Ok(status)
    }
}
