//! Configuration schema for Keel
//!
//! Configuration is stored at `~/.config/keel/config.toml`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Git source cache settings
    pub cache: CacheConfig,

    /// Deployment run settings
    pub deploy: DeployConfig,

    /// SSH transport settings
    pub ssh: SshConfig,
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging of deploy runs
    pub audit_log: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
        }
    }
}

/// Git source cache configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache root directory (defaults to `<cache_dir>/keel/git`)
    pub dir: Option<PathBuf>,

    /// Minimum seconds between fetches of the same repository.
    /// 0 always checks for updates.
    pub update_interval_secs: u64,

    /// Local overrides in the form `host:org/repo[:ref]=/local/path`
    pub overrides: Vec<String>,
}

/// How `-initial` / `-upgrade` hooks decide whether this is a first deploy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitialDetection {
    /// Initial when the hook's own resource does not exist yet
    #[default]
    Hook,
    /// Initial when none of the ordinary resources exist yet
    Deployment,
}

/// Deployment run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    /// Deadline for the whole run, including source resolution
    pub timeout_secs: u64,

    /// Concurrent applies within an ordinary wave
    pub workers: usize,

    /// Stop an ordinary wave at its first failure
    pub fail_fast: bool,

    /// Kubernetes context to deploy to (current context when unset)
    pub context: Option<String>,

    /// Existence scope for `-initial` / `-upgrade` hook tags
    pub initial_detection: InitialDetection,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            workers: 8,
            fail_fast: false,
            context: None,
            initial_detection: InitialDetection::Hook,
        }
    }
}

/// SSH transport configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    /// Directory holding ControlMaster sockets
    pub control_dir: Option<PathBuf>,

    /// Per-host credentials
    pub hosts: Vec<SshHostConfig>,
}

/// Credentials for a single SSH host
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SshHostConfig {
    /// Host name as it appears in git URLs
    pub host: String,

    /// Login user (defaults to the URL user, then ssh's default)
    pub user: Option<String>,

    /// Port override
    pub port: Option<u16>,

    /// Private key to authenticate with
    pub identity_file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.deploy.timeout_secs, 600);
        assert_eq!(config.deploy.workers, 8);
        assert_eq!(config.cache.update_interval_secs, 0);
        assert_eq!(config.deploy.initial_detection, InitialDetection::Hook);
        assert!(config.general.audit_log);
    }

    #[test]
    fn parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [cache]
            update_interval_secs = 300
            overrides = ["github.com:org/repo=/tmp/repo"]

            [deploy]
            initial_detection = "deployment"

            [[ssh.hosts]]
            host = "git.example.com"
            user = "deploy"
            "#,
        )
        .unwrap();

        assert_eq!(config.cache.update_interval_secs, 300);
        assert_eq!(config.cache.overrides.len(), 1);
        assert_eq!(
            config.deploy.initial_detection,
            InitialDetection::Deployment
        );
        assert_eq!(config.deploy.workers, 8);
        assert_eq!(config.ssh.hosts[0].user.as_deref(), Some("deploy"));
    }
}
