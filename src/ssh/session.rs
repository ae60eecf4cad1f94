//! OpenSSH ControlMaster sessions
//!
//! A session is a persistent master connection behind a control socket.
//! git reuses it through `GIT_SSH_COMMAND`, so only the first connection to
//! a host pays for the handshake.

use crate::error::{KeelError, KeelResult};
use crate::ssh::auth::SshCredentials;
use crate::ssh::SshTarget;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// An authenticated, shareable transport session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSession {
    target: SshTarget,
    control_path: PathBuf,
}

impl SshSession {
    pub fn new(target: SshTarget, control_path: PathBuf) -> Self {
        Self {
            target,
            control_path,
        }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    pub fn control_path(&self) -> &Path {
        &self.control_path
    }

    /// Value for `GIT_SSH_COMMAND` that rides on this session's master
    pub fn git_ssh_command(&self) -> String {
        format!(
            "ssh -o ControlMaster=no -o ControlPath='{}' -o BatchMode=yes",
            self.control_path.display()
        )
    }
}

/// Performs the authentication handshake for a new session
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Establish a session, failing with `Auth` or `Transport`
    async fn connect(&self, target: &SshTarget, creds: &SshCredentials)
        -> KeelResult<SshSession>;

    /// Tear the session down
    async fn disconnect(&self, session: &SshSession) -> KeelResult<()>;
}

/// Connector backed by the system `ssh` binary
pub struct OpenSshConnector {
    control_dir: PathBuf,
}

impl OpenSshConnector {
    pub fn new(control_dir: PathBuf) -> Self {
        Self { control_dir }
    }

    /// Socket path for a target, short enough for `sun_path`
    fn control_path(&self, target: &SshTarget) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(target.to_string().as_bytes());
        let hash = hex::encode(&hasher.finalize()[..8]);
        self.control_dir.join(format!("{}.sock", hash))
    }
}

#[async_trait]
impl SessionConnector for OpenSshConnector {
    async fn connect(
        &self,
        target: &SshTarget,
        creds: &SshCredentials,
    ) -> KeelResult<SshSession> {
        tokio::fs::create_dir_all(&self.control_dir)
            .await
            .map_err(|e| {
                KeelError::io(
                    format!("creating ssh control dir {}", self.control_dir.display()),
                    e,
                )
            })?;

        let control_path = self.control_path(target);
        let log_path = control_path.with_extension("log");

        // The persisted master keeps inherited fds open, so stderr goes to a
        // file instead of a pipe we would wait on forever.
        let log_file = std::fs::File::create(&log_path)
            .map_err(|e| KeelError::io(format!("creating {}", log_path.display()), e))?;

        let mut cmd = Command::new("ssh");
        cmd.args(["-f", "-N", "-M"])
            .args(["-o", "ControlPersist=yes"])
            .arg("-o")
            .arg(format!("ControlPath={}", control_path.display()))
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"]);

        if let Some(port) = creds.port.or(target.port) {
            cmd.arg("-p").arg(port.to_string());
        }
        if let Some(user) = creds.user.as_deref().or(target.user.as_deref()) {
            cmd.arg("-l").arg(user);
        }
        if let Some(ref identity) = creds.identity_file {
            cmd.arg("-i")
                .arg(identity)
                .args(["-o", "IdentitiesOnly=yes"]);
        }
        cmd.arg(&target.host);

        debug!("Starting ssh master for {}", target);
        let status = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log_file))
            .status()
            .await
            .map_err(|e| KeelError::command_failed("ssh", e))?;

        if !status.success() {
            let stderr = tokio::fs::read_to_string(&log_path)
                .await
                .unwrap_or_default();
            return Err(classify_handshake_failure(target, stderr.trim()));
        }

        info!("SSH session established for {}", target);
        Ok(SshSession::new(target.clone(), control_path))
    }

    async fn disconnect(&self, session: &SshSession) -> KeelResult<()> {
        let output = Command::new("ssh")
            .arg("-o")
            .arg(format!("ControlPath={}", session.control_path.display()))
            .args(["-O", "exit"])
            .arg(&session.target.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| KeelError::command_failed("ssh -O exit", e))?;

        if !output.status.success() {
            warn!(
                "Failed to stop ssh master for {}: {}",
                session.target,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Map ssh's stderr to `Auth` or `Transport`
pub(crate) fn classify_handshake_failure(target: &SshTarget, stderr: &str) -> KeelError {
    let auth_markers = [
        "Permission denied",
        "Authentication failed",
        "Too many authentication failures",
        "Host key verification failed",
    ];

    if auth_markers.iter().any(|m| stderr.contains(m)) {
        KeelError::Auth {
            host: target.to_string(),
            reason: stderr.to_string(),
        }
    } else {
        KeelError::Transport {
            host: target.to_string(),
            reason: if stderr.is_empty() {
                "ssh exited with an error".to_string()
            } else {
                stderr.to_string()
            },
        }
    }
}
