//! Subprocess invocation for the external tools the pipeline drives
//! (terraform, kubectl, git, cloud CLIs, dig, ssh-keygen).
//!
//! Every call is blocking. A non-zero exit becomes [`DevxError::ToolFailed`]
//! carrying stdout and stderr verbatim so the operator sees the tool's own
//! diagnostics.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use crate::error::{DevxError, Result};

/// Resolve `tool` on `PATH`.
pub fn locate(tool: &str) -> Result<PathBuf> {
    which::which(tool).map_err(|_| DevxError::ToolNotInstalled(tool.to_string()))
}

/// Finds external binaries; the `dependencies` stage records what it finds.
pub trait ToolLocator {
    fn locate(&self, tool: &str) -> Result<PathBuf>;
}

/// [`ToolLocator`] backed by the `PATH` search in [`locate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PathLocator;

impl ToolLocator for PathLocator {
    fn locate(&self, tool: &str) -> Result<PathBuf> {
        locate(tool)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// A single invocation of an external binary.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    stdin: Option<String>,
    envs: Vec<(String, String)>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            stdin: None,
            envs: Vec::new(),
        }
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

    pub fn current_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn stdin(mut self, data: impl Into<String>) -> Self {
        self.stdin = Some(data.into());
        self
    }

    /// Set a variable on the child only, leaving the parent environment untouched.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn display(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &self.envs {
            cmd.env(k, v);
        }
        cmd
    }

    /// Run to completion and capture output.
    pub fn run(&self) -> Result<ToolOutput> {
        tracing::debug!(command = %self.display(), "running");
        let mut cmd = self.build();
        cmd.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| self.spawn_error(e))?;

        if let Some(data) = &self.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(data.as_bytes())
                    .map_err(|e| self.spawn_error(e))?;
            }
        }

        let output = child.wait_with_output().map_err(|e| self.spawn_error(e))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(DevxError::ToolFailed {
                tool: self.program.clone(),
                args: self.args.join(" "),
                code: output.status.code().unwrap_or(-1),
                stdout,
                stderr,
            });
        }
        Ok(ToolOutput { stdout, stderr })
    }

    /// Spawn with stdout piped for incremental reading; stderr is discarded.
    pub fn spawn_streaming(&self) -> Result<Child> {
        tracing::debug!(command = %self.display(), "streaming");
        let mut cmd = self.build();
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd.spawn().map_err(|e| self.spawn_error(e))
    }

    fn spawn_error(&self, e: std::io::Error) -> DevxError {
        if e.kind() == std::io::ErrorKind::NotFound {
            DevxError::ToolNotInstalled(self.program.clone())
        } else {
            DevxError::ToolSpawnFailed {
                tool: self.program.clone(),
                reason: e.to_string(),
            }
        }
    }
}
