//! Per-host SSH credential providers
//!
//! Providers are consulted in order; the first one that knows the host wins.
//! When none does, ssh falls back to its own defaults (agent, ~/.ssh/config).

use crate::config::schema::SshHostConfig;
use crate::config::Config;
use crate::error::{KeelError, KeelResult};
use crate::ssh::SshTarget;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

/// Environment variable naming the login user for every SSH host
pub const ENV_SSH_USER: &str = "KEEL_SSH_USER";

/// Environment variable naming the private key for every SSH host
pub const ENV_SSH_IDENTITY: &str = "KEEL_SSH_IDENTITY";

/// Credentials handed to the session connector
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshCredentials {
    pub user: Option<String>,
    pub port: Option<u16>,
    pub identity_file: Option<PathBuf>,
}

/// Source of SSH credentials for a host
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &'static str;

    /// Credentials for `target`, or `None` if this provider does not know it
    async fn credentials(&self, target: &SshTarget) -> KeelResult<Option<SshCredentials>>;
}

/// Credentials from the `[[ssh.hosts]]` table
pub struct ConfigAuthProvider {
    hosts: Vec<SshHostConfig>,
}

impl ConfigAuthProvider {
    pub fn new(hosts: Vec<SshHostConfig>) -> Self {
        Self { hosts }
    }
}

#[async_trait]
impl AuthProvider for ConfigAuthProvider {
    fn name(&self) -> &'static str {
        "config"
    }

    async fn credentials(&self, target: &SshTarget) -> KeelResult<Option<SshCredentials>> {
        let entry = self
            .hosts
            .iter()
            .find(|h| h.host.eq_ignore_ascii_case(&target.host));

        Ok(entry.map(|h| SshCredentials {
            user: h.user.clone(),
            port: h.port,
            identity_file: h.identity_file.clone(),
        }))
    }
}

/// Credentials from `KEEL_SSH_USER` / `KEEL_SSH_IDENTITY`
pub struct EnvAuthProvider;

#[async_trait]
impl AuthProvider for EnvAuthProvider {
    fn name(&self) -> &'static str {
        "env"
    }

    async fn credentials(&self, _target: &SshTarget) -> KeelResult<Option<SshCredentials>> {
        let user = std::env::var(ENV_SSH_USER).ok().filter(|v| !v.is_empty());
        let identity_file = std::env::var(ENV_SSH_IDENTITY)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        if user.is_none() && identity_file.is_none() {
            return Ok(None);
        }

        Ok(Some(SshCredentials {
            user,
            port: None,
            identity_file,
        }))
    }
}

/// Ordered chain of providers
pub struct AuthProviders {
    providers: Vec<Box<dyn AuthProvider>>,
}

impl AuthProviders {
    pub fn new(providers: Vec<Box<dyn AuthProvider>>) -> Self {
        Self { providers }
    }

    /// Config host table first, then the environment
    pub fn from_config(config: &Config) -> Self {
        Self::new(vec![
            Box::new(ConfigAuthProvider::new(config.ssh.hosts.clone())),
            Box::new(EnvAuthProvider),
        ])
    }

    /// Resolve credentials for `target`.
    ///
    /// A configured identity file that does not exist is an authentication
    /// failure, not a silent fallback to defaults.
    pub async fn credentials(&self, target: &SshTarget) -> KeelResult<SshCredentials> {
        for provider in &self.providers {
            let Some(creds) = provider.credentials(target).await? else {
                continue;
            };
            debug!("Using {} credentials for {}", provider.name(), target);

            if let Some(ref identity) = creds.identity_file {
                if !identity.exists() {
                    return Err(KeelError::Auth {
                        host: target.to_string(),
                        reason: format!("identity file {} not found", identity.display()),
                    });
                }
            }
            return Ok(creds);
        }

        Ok(SshCredentials::default())
    }
}
