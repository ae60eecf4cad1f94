//! Git operations against bare mirrors
//!
//! Uses the system `git` binary. SSH remotes ride on a pooled session via
//! `GIT_SSH_COMMAND`; everything else uses git's own transports.

use crate::error::{KeelError, KeelResult};
use crate::source::url::GitUrl;
use crate::ssh::SshSession;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::debug;

/// Variables that would redirect git away from the directories we pass
const GIT_ENV_OVERRIDES: [&str; 4] = ["GIT_DIR", "GIT_WORK_TREE", "GIT_INDEX_FILE", "GIT_COMMON_DIR"];

/// How git reaches the remote
#[derive(Debug, Clone)]
pub enum GitTransport {
    Direct,
    Ssh(Arc<SshSession>),
}

/// Mirror maintenance and checkout
#[async_trait]
pub trait GitBackend: Send + Sync {
    /// Clone the mirror at `mirror_dir`, or update it if it exists
    async fn fetch(&self, url: &GitUrl, mirror_dir: &Path, transport: &GitTransport)
        -> KeelResult<()>;

    /// Commit for `git_ref` (`HEAD` when `None`), or `None` if the mirror lacks it
    async fn resolve_ref(&self, mirror_dir: &Path, git_ref: Option<&str>)
        -> KeelResult<Option<String>>;

    /// Replace `dest` with the tree of `commit`
    async fn checkout(&self, mirror_dir: &Path, commit: &str, dest: &Path) -> KeelResult<()>;
}

/// Backend using the `git` command line
pub struct GitCli;

impl GitCli {
    fn command() -> Command {
        let mut cmd = Command::new("git");
        for key in GIT_ENV_OVERRIDES {
            cmd.env_remove(key);
        }
        cmd.env("GIT_TERMINAL_PROMPT", "0");
        cmd
    }

    async fn run(mut cmd: Command, what: &str) -> KeelResult<std::process::Output> {
        debug!("Executing: git {}", what);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| KeelError::command_failed(format!("git {}", what), e))
    }
}

#[async_trait]
impl GitBackend for GitCli {
    async fn fetch(
        &self,
        url: &GitUrl,
        mirror_dir: &Path,
        transport: &GitTransport,
    ) -> KeelResult<()> {
        let mut cmd = Self::command();
        if let GitTransport::Ssh(session) = transport {
            cmd.env("GIT_SSH_COMMAND", session.git_ssh_command());
        }

        let what = if mirror_dir.join("HEAD").exists() {
            cmd.arg("--git-dir")
                .arg(mirror_dir)
                .args(["remote", "update", "--prune"]);
            "remote update"
        } else {
            if mirror_dir.exists() {
                tokio::fs::remove_dir_all(mirror_dir).await.map_err(|e| {
                    KeelError::io(format!("removing broken mirror {}", mirror_dir.display()), e)
                })?;
            }
            if let Some(parent) = mirror_dir.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    KeelError::io(format!("creating cache dir {}", parent.display()), e)
                })?;
            }
            cmd.args(["clone", "--mirror", url.as_str()]).arg(mirror_dir);
            "clone --mirror"
        };

        let output = Self::run(cmd, what).await?;
        if !output.status.success() {
            return Err(KeelError::fetch(
                url.repo_key(),
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(())
    }

    async fn resolve_ref(
        &self,
        mirror_dir: &Path,
        git_ref: Option<&str>,
    ) -> KeelResult<Option<String>> {
        if !mirror_dir.join("HEAD").exists() {
            return Ok(None);
        }

        let mut cmd = Self::command();
        cmd.arg("--git-dir")
            .arg(mirror_dir)
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("{}^{{commit}}", git_ref.unwrap_or("HEAD")));

        let output = Self::run(cmd, "rev-parse").await?;
        if !output.status.success() {
            return Ok(None);
        }

        let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(sha).filter(|s| !s.is_empty()))
    }

    async fn checkout(&self, mirror_dir: &Path, commit: &str, dest: &Path) -> KeelResult<()> {
        let staging = dest.with_extension("staging");
        let index = dest.with_extension("index");

        for stale in [&staging, dest] {
            if stale.exists() {
                tokio::fs::remove_dir_all(stale)
                    .await
                    .map_err(|e| KeelError::io(format!("removing {}", stale.display()), e))?;
            }
        }
        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| KeelError::io(format!("creating {}", staging.display()), e))?;

        // Private index so the mirror's own index is never touched.
        let mut cmd = Self::command();
        cmd.env("GIT_INDEX_FILE", &index)
            .arg("--git-dir")
            .arg(mirror_dir)
            .arg("--work-tree")
            .arg(&staging)
            .args(["checkout", "-f", commit, "--", "."]);

        let output = Self::run(cmd, "checkout").await?;
        let _ = tokio::fs::remove_file(&index).await;
        if !output.status.success() {
            return Err(KeelError::Fetch {
                key: mirror_dir.display().to_string(),
                reason: format!(
                    "checkout of {} failed: {}",
                    commit,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        tokio::fs::rename(&staging, dest)
            .await
            .map_err(|e| KeelError::io(format!("moving checkout to {}", dest.display()), e))
    }
}
