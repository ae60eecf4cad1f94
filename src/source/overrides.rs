//! Local path substitution for remote repositories

use crate::error::{KeelError, KeelResult};
use crate::source::url::{GitUrl, RepoKey};
use std::path::{Path, PathBuf};

/// Serve a repository (optionally a single ref of it) from a local directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoOverride {
    pub key: RepoKey,
    pub git_ref: Option<String>,
    pub local_path: PathBuf,
}

impl RepoOverride {
    /// Parse `host:org/repo[:ref]=/local/path`
    pub fn parse(s: &str) -> KeelResult<Self> {
        let (repo, path) = s
            .split_once('=')
            .ok_or_else(|| KeelError::InvalidOverride(s.to_string()))?;
        if path.is_empty() {
            return Err(KeelError::InvalidOverride(s.to_string()));
        }

        let parts: Vec<&str> = repo.split(':').collect();
        if parts.len() < 2 || parts.len() > 3 {
            return Err(KeelError::InvalidOverride(s.to_string()));
        }

        let url = GitUrl::parse(&format!("{}:{}", parts[0], parts[1]))
            .map_err(|_| KeelError::InvalidOverride(s.to_string()))?;

        let git_ref = parts
            .get(2)
            .filter(|r| !r.is_empty())
            .map(|r| r.to_string());

        Ok(Self {
            key: url.repo_key(),
            git_ref,
            local_path: PathBuf::from(path),
        })
    }
}

/// Lookup table of configured overrides
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    entries: Vec<RepoOverride>,
}

impl Overrides {
    pub fn new(entries: Vec<RepoOverride>) -> Self {
        Self { entries }
    }

    /// Parse every override string, failing on the first malformed one
    pub fn parse_all<S: AsRef<str>>(raw: &[S]) -> KeelResult<Self> {
        raw.iter()
            .map(|s| RepoOverride::parse(s.as_ref()))
            .collect::<KeelResult<Vec<_>>>()
            .map(Self::new)
    }

    /// Find the local path for `(key, git_ref)`.
    ///
    /// A ref-scoped override beats a key-wide one.
    pub fn lookup(&self, key: &RepoKey, git_ref: Option<&str>) -> Option<&Path> {
        let scoped = git_ref.and_then(|r| {
            self.entries
                .iter()
                .find(|o| &o.key == key && o.git_ref.as_deref() == Some(r))
        });

        scoped
            .or_else(|| {
                self.entries
                    .iter()
                    .find(|o| &o.key == key && o.git_ref.is_none())
            })
            .map(|o| o.local_path.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
