//! Error types for Keel
//!
//! All modules use `KeelResult<T>` as their return type. Every variant that
//! can reach a caller-facing report carries the identity it belongs to
//! (repository key, host, or resource key).

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Keel operations
pub type KeelResult<T> = Result<T, KeelError>;

/// All errors that can occur in Keel
#[derive(Error, Debug)]
pub enum KeelError {
    // Source errors
    #[error("Failed to fetch {key}: {reason}")]
    Fetch { key: String, reason: String },

    #[error("Invalid git URL '{url}': {reason}")]
    InvalidRepoUrl { url: String, reason: String },

    #[error("Invalid local git override '{0}'. Expected host:org/repo[:ref]=/local/path")]
    InvalidOverride(String),

    // Transport errors
    #[error("Authentication failed for {host}: {reason}")]
    Auth { host: String, reason: String },

    #[error("Transport error for {host}: {reason}")]
    Transport { host: String, reason: String },

    #[error("Connection pool is closed")]
    PoolClosed,

    // Planning errors
    #[error("Invalid hook annotation on {resource}: {reason}")]
    InvalidHookSpec { resource: String, reason: String },

    #[error("Failed to parse manifest {path}: {reason}")]
    ManifestParse { path: PathBuf, reason: String },

    // Execution errors
    #[error("Failed to apply {resource}: {reason}")]
    Apply { resource: String, reason: String },

    #[error("Failed to look up {resource}: {reason}")]
    Lookup { resource: String, reason: String },

    #[error("Failed to delete {resource}: {reason}")]
    Delete { resource: String, reason: String },

    #[error("Hook {hook} failed: {reason}")]
    HookFailed { hook: String, reason: String },

    #[error("Hook {hook} did not become ready before the deadline")]
    HookTimeout { hook: String },

    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl KeelError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a fetch error for a repository key
    pub fn fetch(key: impl ToString, reason: impl Into<String>) -> Self {
        Self::Fetch {
            key: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error for the named operation
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Whether this error was caused by the run deadline elapsing
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::HookTimeout { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Auth { .. } => Some("Check ssh-agent, [[ssh.hosts]] in config, or KEEL_SSH_IDENTITY"),
            Self::Timeout { .. } | Self::HookTimeout { .. } => {
                Some("Increase the deadline with --timeout")
            }
            Self::InvalidOverride(_) => {
                Some("Example: --local-git-override github.com:my-org/my-repo=/path/to/checkout")
            }
            _ => None,
        }
    }
}
