//! External process execution
//!
//! Every profiling tool is driven through [`CommandRunner`] so strategies
//! can be exercised against a fake in tests.

use crate::error::CommandError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A single external command, with optional file redirections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// File fed to the command's standard input
    pub stdin: Option<PathBuf>,
    /// File receiving the command's standard output; captured when unset
    pub stdout: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            stdout: None,
        }
    }

    /// Build from a path-valued program such as a configured tool location
    pub fn for_path(program: &Path) -> Self {
        Self::new(program.display().to_string())
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }
}

/// Captured output of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Empty when stdout was redirected to a file
    pub stdout: String,
    pub stderr: String,
}

/// Capability to execute an external binary and capture its streams
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError>;
}

/// Runs commands as child processes on the tokio runtime
#[derive(Debug, Clone, Default)]
pub struct TokioRunner;

impl TokioRunner {
    pub fn new() -> Self {
        Self
    }

    fn open_stdio(spec: &CommandSpec) -> Result<(Stdio, Stdio), CommandError> {
        let stdin = match &spec.stdin {
            Some(path) => Stdio::from(std::fs::File::open(path).map_err(|source| {
                CommandError::Io {
                    path: path.clone(),
                    source,
                }
            })?),
            None => Stdio::null(),
        };

        let stdout = match &spec.stdout {
            Some(path) => Stdio::from(std::fs::File::create(path).map_err(|source| {
                CommandError::Io {
                    path: path.clone(),
                    source,
                }
            })?),
            None => Stdio::piped(),
        };

        Ok((stdin, stdout))
    }
}

#[async_trait]
impl CommandRunner for TokioRunner {
    async fn run(
        &self,
        spec: &CommandSpec,
        cancel: &CancellationToken,
    ) -> Result<CommandOutput, CommandError> {
        debug!(program = %spec.program, args = ?spec.args, "Running command");

        // Redirection files are owned by the child's stdio and closed with it
        let (stdin, stdout) = Self::open_stdio(spec)?;

        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Spawn {
                program: spec.program.clone(),
                source,
            })?;

        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|source| CommandError::Spawn {
                program: spec.program.clone(),
                source,
            })?,
            _ = cancel.cancelled() => {
                // Dropping the wait future drops the child, which kills it
                return Err(CommandError::Cancelled { program: spec.program.clone() });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        check_status(&spec.program, output.status, &stderr)?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr,
        })
    }
}

fn check_status(program: &str, status: ExitStatus, stderr: &str) -> Result<(), CommandError> {
    if status.success() {
        return Ok(());
    }

    Err(CommandError::Exit {
        program: program.to_string(),
        code: status.code(),
        stderr: stderr.trim().to_string(),
    })
}
