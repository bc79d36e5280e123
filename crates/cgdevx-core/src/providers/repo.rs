//! Local git working copies and SSH key material.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::io;
use crate::providers::process::{self, ToolCommand};
use crate::state::StateStore;
use crate::types::{internal, param};

/// Identity recorded on commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    /// The Git hosting user recorded by preflight, falling back to the
    /// platform owner's address.
    pub fn from_store(store: &StateStore) -> Self {
        let name = store
            .internal(internal::GIT_USER_NAME)
            .or(store.internal(internal::GIT_USER_LOGIN))
            .unwrap_or("cgdevx");
        let email = store
            .internal(internal::GIT_USER_EMAIL)
            .or(store.param(param::OWNER_EMAIL))
            .unwrap_or("cgdevx@localhost");
        Self {
            name: name.to_string(),
            email: email.to_string(),
        }
    }
}

/// Git operations on local working copies.
pub trait RepoOps {
    /// Clone `url` into `dest`, optionally checking out `branch`.
    fn clone_repo(&self, url: &str, branch: Option<&str>, dest: &Path) -> Result<()>;
    fn create_branch(&self, dir: &Path, branch: &str) -> Result<()>;
    /// Stage everything and commit as `author`. Returns `false` when there was nothing to commit.
    fn commit_all(&self, dir: &Path, message: &str, author: &Author) -> Result<bool>;
    /// Start fresh history in `dir` on `branch` with `origin` set to `url`.
    fn init(&self, dir: &Path, url: &str, branch: &str) -> Result<()>;
    fn push(&self, dir: &Path, branch: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct GitCli {
    binary: PathBuf,
    ssh_key: Option<PathBuf>,
}

impl GitCli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ssh_key: None,
        }
    }

    pub fn detect() -> Result<Self> {
        Ok(Self::new(process::locate("git")?))
    }

    /// Authenticate pushes and clones with this private key.
    pub fn with_ssh_key(mut self, key: impl Into<PathBuf>) -> Self {
        self.ssh_key = Some(key.into());
        self
    }

    fn command(&self, dir: Option<&Path>) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.binary.to_string_lossy());
        if let Some(dir) = dir {
            cmd = cmd.current_dir(dir);
        }
        if let Some(key) = &self.ssh_key {
            cmd = cmd.env(
                "GIT_SSH_COMMAND",
                format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
                    key.display()
                ),
            );
        }
        cmd
    }
}

impl RepoOps for GitCli {
    fn clone_repo(&self, url: &str, branch: Option<&str>, dest: &Path) -> Result<()> {
        let mut cmd = self.command(None).args(["clone", "--depth", "1"]);
        if let Some(branch) = branch {
            cmd = cmd.args(["--branch", branch]);
        }
        cmd.arg(url).arg(dest.to_string_lossy()).run()?;
        Ok(())
    }

    fn create_branch(&self, dir: &Path, branch: &str) -> Result<()> {
        self.command(Some(dir)).args(["checkout", "-b", branch]).run()?;
        Ok(())
    }

    fn commit_all(&self, dir: &Path, message: &str, author: &Author) -> Result<bool> {
        self.command(Some(dir)).args(["add", "--all"]).run()?;
        let status = self
            .command(Some(dir))
            .args(["status", "--porcelain"])
            .run()?;
        if status.stdout.trim().is_empty() {
            return Ok(false);
        }
        self.command(Some(dir))
            .arg("-c")
            .arg(format!("user.name={}", author.name))
            .arg("-c")
            .arg(format!("user.email={}", author.email))
            .args(["commit", "-m", message])
            .run()?;
        Ok(true)
    }

    fn init(&self, dir: &Path, url: &str, branch: &str) -> Result<()> {
        self.command(Some(dir)).args(["init", "-q"]).run()?;
        self.command(Some(dir))
            .args(["symbolic-ref", "HEAD"])
            .arg(format!("refs/heads/{branch}"))
            .run()?;
        self.command(Some(dir))
            .args(["remote", "add", "origin", url])
            .run()?;
        Ok(())
    }

    fn push(&self, dir: &Path, branch: &str) -> Result<()> {
        self.command(Some(dir))
            .args(["push", "--set-upstream", "origin", branch])
            .run()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SSH keys
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub private_key_path: PathBuf,
    pub public_key: String,
}

pub trait KeyGenerator {
    /// Create a key pair under `dir`, or return the existing one.
    fn generate(&self, dir: &Path, comment: &str) -> Result<KeyPair>;
}

pub const SSH_KEY_FILE: &str = "cgdevx_ed25519";

#[derive(Debug, Clone, Default)]
pub struct SshKeygen;

impl KeyGenerator for SshKeygen {
    fn generate(&self, dir: &Path, comment: &str) -> Result<KeyPair> {
        io::ensure_dir(dir)?;
        let private_key_path = dir.join(SSH_KEY_FILE);
        let public_path = dir.join(format!("{SSH_KEY_FILE}.pub"));
        if !private_key_path.exists() {
            ToolCommand::new("ssh-keygen")
                .args(["-q", "-t", "ed25519", "-N", "", "-C", comment, "-f"])
                .arg(private_key_path.to_string_lossy())
                .run()?;
        } else {
            tracing::debug!(path = %private_key_path.display(), "reusing ssh key");
        }
        let public_key = std::fs::read_to_string(&public_path)?.trim().to_string();
        Ok(KeyPair {
            private_key_path,
            public_key,
        })
    }
}
