//! Git URL parsing and repository identity
//!
//! Accepts the URL shapes git itself accepts: `https://`, `http://`,
//! `ssh://`, `git://`, `file://`, scp-like `user@host:path` and `host:path`.

use crate::error::{KeelError, KeelResult};
use std::fmt;

/// How a repository is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Authenticated SSH session from the connection pool
    Ssh,
    /// Direct git transport (http, https, git, file)
    Direct,
}

/// A parsed git remote URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitUrl {
    raw: String,
    scheme: String,
    user: Option<String>,
    host: String,
    port: Option<u16>,
    path: String,
}

impl GitUrl {
    /// Parse a git remote URL
    pub fn parse(raw: &str) -> KeelResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid(raw, "empty URL"));
        }

        if raw.contains("://") {
            return Self::parse_standard(raw);
        }
        Self::parse_scp_like(raw)
    }

    fn parse_standard(raw: &str) -> KeelResult<Self> {
        let url = url::Url::parse(raw).map_err(|e| invalid(raw, &e.to_string()))?;
        let scheme = url.scheme().to_ascii_lowercase();

        match scheme.as_str() {
            "http" | "https" | "ssh" | "git" | "file" => {}
            other => return Err(invalid(raw, &format!("unsupported scheme '{}'", other))),
        }

        let host = url.host_str().unwrap_or_default().to_string();
        if host.is_empty() && scheme != "file" {
            return Err(invalid(raw, "missing host"));
        }

        let user = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        Ok(Self {
            raw: raw.to_string(),
            scheme,
            user,
            host,
            port: url.port(),
            path: url.path().to_string(),
        })
    }

    /// `[user@]host:path`, where `host` never contains a slash
    fn parse_scp_like(raw: &str) -> KeelResult<Self> {
        let (authority, path) = raw
            .split_once(':')
            .ok_or_else(|| invalid(raw, "expected scheme://host/path or host:path"))?;

        if authority.contains('/') || authority.is_empty() {
            return Err(invalid(raw, "expected scheme://host/path or host:path"));
        }
        if path.is_empty() {
            return Err(invalid(raw, "missing repository path"));
        }

        let (user, host) = match authority.split_once('@') {
            Some((user, host)) => (Some(user.to_string()), host.to_string()),
            None => (None, authority.to_string()),
        };
        if host.is_empty() {
            return Err(invalid(raw, "missing host"));
        }

        Ok(Self {
            raw: raw.to_string(),
            scheme: "ssh".to_string(),
            user,
            host,
            port: None,
            path: path.to_string(),
        })
    }

    /// The URL as given, suitable for passing to git
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Login user embedded in the URL
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Host name without port
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Explicit port, if any
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// Transport class used to reach this repository
    pub fn transport(&self) -> TransportKind {
        if self.scheme == "ssh" {
            TransportKind::Ssh
        } else {
            TransportKind::Direct
        }
    }

    /// Scheme-independent identity of this repository
    pub fn repo_key(&self) -> RepoKey {
        let path = self.path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let path = path.trim_end_matches('/');

        if self.scheme == "file" {
            return RepoKey(format!("file/{}", path));
        }

        let host = match self.port {
            Some(port) => format!("{}:{}", self.host.to_ascii_lowercase(), port),
            None => self.host.to_ascii_lowercase(),
        };
        RepoKey(format!("{}/{}", host, path.to_ascii_lowercase()))
    }
}

impl fmt::Display for GitUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Normalized identity of a remote repository: `host[:port]/path`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoKey(String);

impl RepoKey {
    /// Parse any git URL into its key
    pub fn parse(raw: &str) -> KeelResult<Self> {
        Ok(GitUrl::parse(raw)?.repo_key())
    }

    /// The normalized key string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn invalid(url: &str, reason: &str) -> KeelError {
    KeelError::InvalidRepoUrl {
        url: url.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_ignore_scheme_user_and_trailing_slash() {
        let variants = [
            "https://github.com/Org/Repo.git",
            "https://github.com/org/repo/",
            "http://github.com/org/repo",
            "ssh://git@github.com/org/repo.git",
            "git@github.com:org/repo.git",
            "github.com:org/repo",
        ];

        for v in variants {
            assert_eq!(
                RepoKey::parse(v).unwrap().as_str(),
                "github.com/org/repo",
                "variant {}",
                v
            );
        }
    }

    #[test]
    fn port_is_part_of_identity() {
        let a = RepoKey::parse("ssh://git@git.example.com:2222/team/app.git").unwrap();
        let b = RepoKey::parse("ssh://git@git.example.com/team/app.git").unwrap();
        assert_eq!(a.as_str(), "git.example.com:2222/team/app");
        assert_ne!(a, b);
    }

    #[test]
    fn transport_kind() {
        assert_eq!(
            GitUrl::parse("git@github.com:org/repo.git").unwrap().transport(),
            TransportKind::Ssh
        );
        assert_eq!(
            GitUrl::parse("ssh://github.com/org/repo").unwrap().transport(),
            TransportKind::Ssh
        );
        assert_eq!(
            GitUrl::parse("https://github.com/org/repo").unwrap().transport(),
            TransportKind::Direct
        );
        assert_eq!(
            GitUrl::parse("file:///srv/git/repo.git").unwrap().transport(),
            TransportKind::Direct
        );
    }

    #[test]
    fn scp_like_user_and_host() {
        let url = GitUrl::parse("deploy@git.example.com:infra/base.git").unwrap();
        assert_eq!(url.user(), Some("deploy"));
        assert_eq!(url.host(), "git.example.com");
        assert_eq!(url.port(), None);
    }

    #[test]
    fn file_urls_keep_path_case() {
        let key = RepoKey::parse("file:///tmp/Repos/App.git").unwrap();
        assert_eq!(key.as_str(), "file/tmp/Repos/App");
    }

    #[test]
    fn rejects_malformed_urls() {
        assert!(GitUrl::parse("").is_err());
        assert!(GitUrl::parse("/local/path").is_err());
        assert!(GitUrl::parse("ftp://example.com/repo").is_err());
        assert!(GitUrl::parse("github.com:").is_err());
    }
}
