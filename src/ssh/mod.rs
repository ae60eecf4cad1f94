//! Authenticated SSH transport for git
//!
//! - [`ConnectionPool`]: one reusable session per target, one handshake in flight
//! - [`AuthProviders`]: per-host credentials (config table, environment)
//! - [`OpenSshConnector`]: sessions as OpenSSH ControlMaster sockets

pub mod auth;
mod pool;
mod session;

pub use auth::{AuthProvider, AuthProviders, SshCredentials};
pub use pool::ConnectionPool;
pub use session::{OpenSshConnector, SessionConnector, SshSession};

use crate::source::GitUrl;
use std::fmt;

/// Identity of an SSH endpoint: `[user@]host[:port]`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SshTarget {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl SshTarget {
    pub fn from_url(url: &GitUrl) -> Self {
        Self {
            user: url.user().map(str::to_string),
            host: url.host().to_ascii_lowercase(),
            port: url.port(),
        }
    }
}

impl fmt::Display for SshTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref user) = self.user {
            write!(f, "{}@", user)?;
        }
        f.write_str(&self.host)?;
        if let Some(port) = self.port {
            write!(f, ":{}", port)?;
        }
        Ok(())
    }
}
