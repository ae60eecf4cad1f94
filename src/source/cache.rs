//! Shared cache of git sources
//!
//! Resolves `(repository, ref)` to a local directory. Concurrency rules:
//!
//! - Overrides short-circuit everything: no lock, no network.
//! - Each repository key has its own async lock; unrelated keys never contend.
//! - A caller that queued behind a fetch of the same key reuses that fetch.
//! - Sequential callers skip the network while inside the update interval.
//!
//! # Layout
//!
//! ```text
//! <root>/<key-dir>/mirror/               bare mirror of the remote
//! <root>/<key-dir>/fetch.json            {url, last_fetch}
//! <root>/<key-dir>/checkouts/<ref-dir>/  materialized tree per ref
//! ```
//!
//! The layout only depends on the key and ref, so a reused cache root keeps
//! its update-interval state across restarts. [`SourceCache::clear`] drops
//! whole key directories, stamps included.

use crate::config::{Config, ConfigManager};
use crate::error::{KeelError, KeelResult};
use crate::source::git::{GitBackend, GitCli, GitTransport};
use crate::source::overrides::Overrides;
use crate::source::url::{GitUrl, RepoKey, TransportKind};
use crate::ssh::{ConnectionPool, SshTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::fs;
use tokio::time::Instant;
use tracing::{debug, info};

const STAMP_FILE: &str = "fetch.json";

/// A resolved source tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    /// Directory holding the tree
    pub path: PathBuf,
    /// Checked out commit (`None` for overrides)
    pub commit: Option<String>,
    /// Whether a local override satisfied the request
    pub overridden: bool,
}

/// Persisted fetch metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FetchStamp {
    url: String,
    last_fetch: DateTime<Utc>,
}

/// Per-key cache state, guarded by the key's lock
#[derive(Debug)]
struct CacheEntry {
    key: RepoKey,
    dir: PathBuf,
    last_fetch: Option<DateTime<Utc>>,
    stamp_loaded: bool,
}

impl CacheEntry {
    fn new(key: RepoKey, root: &Path) -> Self {
        let dir = root.join(dir_name(key.as_str()));
        Self {
            key,
            dir,
            last_fetch: None,
            stamp_loaded: false,
        }
    }

    fn mirror_dir(&self) -> PathBuf {
        self.dir.join("mirror")
    }

    fn checkout_dir(&self, git_ref: Option<&str>) -> PathBuf {
        self.dir
            .join("checkouts")
            .join(dir_name(git_ref.unwrap_or("HEAD")))
    }

    fn is_fresh(&self, interval: Duration, now: DateTime<Utc>) -> bool {
        if interval.is_zero() {
            return false;
        }
        self.last_fetch
            .and_then(|t| (now - t).to_std().ok())
            .is_some_and(|age| age < interval)
    }

    async fn load_stamp(&mut self) {
        if self.stamp_loaded {
            return;
        }
        self.stamp_loaded = true;

        let path = self.dir.join(STAMP_FILE);
        let Ok(content) = fs::read_to_string(&path).await else {
            return;
        };
        match serde_json::from_str::<FetchStamp>(&content) {
            Ok(stamp) => self.last_fetch = Some(stamp.last_fetch),
            Err(e) => debug!("Ignoring unreadable {}: {}", path.display(), e),
        }
    }

    async fn save_stamp(&self, url: &GitUrl) -> KeelResult<()> {
        let Some(last_fetch) = self.last_fetch else {
            return Ok(());
        };
        let stamp = FetchStamp {
            url: url.to_string(),
            last_fetch,
        };
        let path = self.dir.join(STAMP_FILE);
        fs::write(&path, serde_json::to_string_pretty(&stamp)?)
            .await
            .map_err(|e| KeelError::io(format!("writing {}", path.display()), e))
    }
}

/// Lock plus completed-fetch counter for one key
struct EntrySlot {
    fetches: AtomicU64,
    entry: tokio::sync::Mutex<CacheEntry>,
}

/// Deduplicating, rate-limited git source cache
pub struct SourceCache {
    root: PathBuf,
    overrides: Overrides,
    update_interval: Duration,
    deadline: Option<Instant>,
    backend: Arc<dyn GitBackend>,
    pool: Arc<ConnectionPool>,
    slots: Mutex<HashMap<RepoKey, Arc<EntrySlot>>>,
}

impl SourceCache {
    /// Create a cache rooted at `root` using the git CLI
    pub fn new(root: PathBuf, pool: Arc<ConnectionPool>) -> Self {
        Self::with_backend(root, pool, Arc::new(GitCli))
    }

    /// Create a cache with a custom git backend
    pub fn with_backend(
        root: PathBuf,
        pool: Arc<ConnectionPool>,
        backend: Arc<dyn GitBackend>,
    ) -> Self {
        Self {
            root,
            overrides: Overrides::default(),
            update_interval: Duration::ZERO,
            deadline: None,
            backend,
            pool,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Build from configuration (root, interval, overrides)
    pub fn from_config(config: &Config, pool: Arc<ConnectionPool>) -> KeelResult<Self> {
        Ok(Self::new(ConfigManager::cache_dir(config), pool)
            .with_overrides(Overrides::parse_all(&config.cache.overrides)?)
            .with_update_interval(Duration::from_secs(config.cache.update_interval_secs)))
    }

    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Minimum time between fetches of one key. Zero always fetches.
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Deadline every resolve must finish by
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `url` at `git_ref` to a local tree
    pub async fn resolve(&self, url: &GitUrl, git_ref: Option<&str>) -> KeelResult<ResolvedSource> {
        let key = url.repo_key();

        if let Some(path) = self.overrides.lookup(&key, git_ref) {
            info!("Using local override {} for {}", path.display(), key);
            return Ok(ResolvedSource {
                path: path.to_path_buf(),
                commit: None,
                overridden: true,
            });
        }

        let resolve = self.resolve_cached(url, &key, git_ref);
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, resolve)
                .await
                .map_err(|_| KeelError::timeout(format!("resolving {}", key)))?,
            None => resolve.await,
        }
    }

    async fn resolve_cached(
        &self,
        url: &GitUrl,
        key: &RepoKey,
        git_ref: Option<&str>,
    ) -> KeelResult<ResolvedSource> {
        let slot = self.slot(key)?;
        let seen_fetches = slot.fetches.load(Ordering::SeqCst);

        let mut entry = slot.entry.lock().await;
        entry.load_stamp().await;

        let mirror = entry.mirror_dir();
        let joined = slot.fetches.load(Ordering::SeqCst) != seen_fetches;
        let fresh = entry.is_fresh(self.update_interval, Utc::now());

        let mut commit = None;
        if joined || fresh {
            commit = self.backend.resolve_ref(&mirror, git_ref).await?;
            match commit {
                Some(_) => debug!(
                    "Reusing mirror of {} ({})",
                    key,
                    if joined { "concurrent fetch" } else { "within update interval" }
                ),
                None => debug!("Ref {:?} missing from mirror of {}", git_ref, key),
            }
        }

        let commit = match commit {
            Some(commit) => commit,
            None => {
                self.fetch(url, &mut entry).await?;
                slot.fetches.fetch_add(1, Ordering::SeqCst);

                self.backend
                    .resolve_ref(&mirror, git_ref)
                    .await?
                    .ok_or_else(|| {
                        KeelError::fetch(
                            key,
                            format!("ref '{}' not found", git_ref.unwrap_or("HEAD")),
                        )
                    })?
            }
        };

        let dest = entry.checkout_dir(git_ref);
        self.materialize(&mirror, &commit, &dest).await?;

        Ok(ResolvedSource {
            path: dest,
            commit: Some(commit),
            overridden: false,
        })
    }

    /// Fetch the mirror. The stamp only moves on success.
    async fn fetch(&self, url: &GitUrl, entry: &mut CacheEntry) -> KeelResult<()> {
        let transport = match url.transport() {
            TransportKind::Ssh => {
                let target = SshTarget::from_url(url);
                let session = self
                    .pool
                    .acquire(&target, self.deadline)
                    .await
                    .map_err(|e| match e {
                        KeelError::Auth { .. } | KeelError::Transport { .. } => {
                            KeelError::fetch(&entry.key, e.to_string())
                        }
                        other => other,
                    })?;
                GitTransport::Ssh(session)
            }
            TransportKind::Direct => GitTransport::Direct,
        };

        fs::create_dir_all(&entry.dir)
            .await
            .map_err(|e| KeelError::io(format!("creating {}", entry.dir.display()), e))?;

        info!("Fetching {}", entry.key);
        self.backend
            .fetch(url, &entry.mirror_dir(), &transport)
            .await?;

        entry.last_fetch = Some(Utc::now());
        entry.save_stamp(url).await
    }

    async fn materialize(&self, mirror: &Path, commit: &str, dest: &Path) -> KeelResult<()> {
        let marker = dest.with_extension("commit");
        if dest.exists() {
            if let Ok(current) = fs::read_to_string(&marker).await {
                if current.trim() == commit {
                    return Ok(());
                }
            }
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| KeelError::io(format!("creating {}", parent.display()), e))?;
        }

        debug!("Checking out {} into {}", commit, dest.display());
        self.backend.checkout(mirror, commit, dest).await?;
        fs::write(&marker, commit)
            .await
            .map_err(|e| KeelError::io(format!("writing {}", marker.display()), e))
    }

    /// Remove every cached repository and forget in-memory entries.
    ///
    /// Mirrors, checkouts and fetch stamps all go, so the next resolve of
    /// any key fetches. Only call once all resolves returned.
    pub async fn clear(&self) -> KeelResult<usize> {
        self.slots
            .lock()
            .map_err(|_| KeelError::Internal("source cache lock poisoned".to_string()))?
            .clear();

        if !self.root.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        let mut entries = fs::read_dir(&self.root)
            .await
            .map_err(|e| KeelError::io("reading cache root", e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| KeelError::io("reading cache entry", e))?
        {
            let dir = entry.path();
            if dir.is_dir() {
                fs::remove_dir_all(&dir)
                    .await
                    .map_err(|e| KeelError::io(format!("removing {}", dir.display()), e))?;
                removed += 1;
            }
        }

        debug!("Cleared {} cached repositories", removed);
        Ok(removed)
    }

    /// Number of keys resolved through the cache in this process
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, key: &RepoKey) -> KeelResult<Arc<EntrySlot>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| KeelError::Internal("source cache lock poisoned".to_string()))?;

        Ok(Arc::clone(slots.entry(key.clone()).or_insert_with(|| {
            Arc::new(EntrySlot {
                fetches: AtomicU64::new(0),
                entry: tokio::sync::Mutex::new(CacheEntry::new(key.clone(), &self.root)),
            })
        })))
    }
}

/// Filesystem-safe, collision-resistant directory name
fn dir_name(s: &str) -> String {
    let readable: String = s
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .collect();

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    let hash = hex::encode(&hasher.finalize()[..4]);

    format!("{}-{}", readable.trim_matches('-'), hash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::{AuthProviders, SessionConnector, SshCredentials, SshSession};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Fake git: a mirror is a directory with HEAD, every ref resolves to "c0ffee"
    /// unless listed in `missing`.
    struct FakeGit {
        fetches: AtomicUsize,
        fail_fetches: AtomicUsize,
        delay: Duration,
        missing: Vec<String>,
    }

    impl FakeGit {
        fn new(delay: Duration) -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                fail_fetches: AtomicUsize::new(0),
                delay,
                missing: vec![],
            }
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GitBackend for FakeGit {
        async fn fetch(
            &self,
            url: &GitUrl,
            mirror_dir: &Path,
            _transport: &GitTransport,
        ) -> KeelResult<()> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail_fetches.load(Ordering::SeqCst) > 0 {
                self.fail_fetches.fetch_sub(1, Ordering::SeqCst);
                return Err(KeelError::fetch(url.repo_key(), "connection reset"));
            }
            std::fs::create_dir_all(mirror_dir).unwrap();
            std::fs::write(mirror_dir.join("HEAD"), "ref: refs/heads/main").unwrap();
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
            if git_ref.is_some_and(|r| self.missing.iter().any(|m| m == r)) {
                return Ok(None);
            }
            Ok(Some("c0ffee".to_string()))
        }

        async fn checkout(&self, _mirror: &Path, commit: &str, dest: &Path) -> KeelResult<()> {
            std::fs::create_dir_all(dest).unwrap();
            std::fs::write(dest.join("COMMIT"), commit).unwrap();
            Ok(())
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl SessionConnector for RefusingConnector {
        async fn connect(
            &self,
            target: &SshTarget,
            _creds: &SshCredentials,
        ) -> KeelResult<SshSession> {
            Err(KeelError::Auth {
                host: target.to_string(),
                reason: "Permission denied (publickey)".to_string(),
            })
        }

        async fn disconnect(&self, _session: &SshSession) -> KeelResult<()> {
            Ok(())
        }
    }

    fn pool() -> Arc<ConnectionPool> {
        Arc::new(ConnectionPool::new(
            Arc::new(RefusingConnector),
            Arc::new(AuthProviders::new(vec![])),
        ))
    }

    fn cache(root: &Path, git: Arc<FakeGit>) -> SourceCache {
        SourceCache::with_backend(root.to_path_buf(), pool(), git)
    }

    fn url(s: &str) -> GitUrl {
        GitUrl::parse(s).unwrap()
    }

    #[tokio::test]
    async fn concurrent_resolves_share_one_fetch() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new(Duration::from_millis(50)));
        let cache = Arc::new(cache(temp.path(), Arc::clone(&git)));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                cache
                    .resolve(&url("https://example.com/org/base.git"), Some("main"))
                    .await
            }));
        }

        let mut paths = Vec::new();
        for task in tasks {
            paths.push(task.await.unwrap().unwrap().path);
        }

        assert_eq!(git.fetches(), 1);
        assert!(paths.iter().all(|p| p == &paths[0]));
        assert!(paths[0].join("COMMIT").exists());
    }

    #[tokio::test]
    async fn zero_interval_fetches_every_sequential_call() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new(Duration::ZERO));
        let cache = cache(temp.path(), Arc::clone(&git));
        let u = url("https://example.com/org/base.git");

        cache.resolve(&u, None).await.unwrap();
        cache.resolve(&u, None).await.unwrap();
        assert_eq!(git.fetches(), 2);
    }

    #[tokio::test]
    async fn interval_skips_network_and_survives_restart() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new(Duration::ZERO));
        let u = url("https://example.com/org/base.git");

        let first = cache(temp.path(), Arc::clone(&git)).with_update_interval(Duration::from_secs(3600));
        first.resolve(&u, Some("main")).await.unwrap();
        first.resolve(&u, Some("main")).await.unwrap();
        assert_eq!(git.fetches(), 1);

        // Same root, new process-level cache: stamp is read back from disk.
        let second = cache(temp.path(), Arc::clone(&git)).with_update_interval(Duration::from_secs(3600));
        second.resolve(&u, Some("main")).await.unwrap();
        assert_eq!(git.fetches(), 1);
    }

    #[tokio::test]
    async fn missing_ref_fetches_inside_interval() {
        let temp = TempDir::new().unwrap();
        let mut fake = FakeGit::new(Duration::ZERO);
        fake.missing = vec!["release".to_string()];
        let git = Arc::new(fake);
        let cache = cache(temp.path(), Arc::clone(&git)).with_update_interval(Duration::from_secs(3600));
        let u = url("https://example.com/org/base.git");

        cache.resolve(&u, Some("main")).await.unwrap();
        let err = cache.resolve(&u, Some("release")).await.unwrap_err();

        assert_eq!(git.fetches(), 2);
        assert!(matches!(err, KeelError::Fetch { ref reason, .. } if reason.contains("release")));
    }

    #[tokio::test]
    async fn unrelated_keys_fetch_independently() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new(Duration::ZERO));
        let cache = cache(temp.path(), Arc::clone(&git));

        let a = cache.resolve(&url("https://example.com/org/a.git"), None).await.unwrap();
        let b = cache.resolve(&url("https://example.com/org/b.git"), None).await.unwrap();

        assert_ne!(a.path, b.path);
        assert_eq!(git.fetches(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn override_never_touches_network() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new(Duration::ZERO));
        let overrides = Overrides::parse_all(&["github.com:org/repo=/work/repo"]).unwrap();
        let cache = cache(temp.path(), Arc::clone(&git)).with_overrides(overrides);

        // An SSH URL would fail in the refusing pool if it were ever fetched.
        let resolved = cache
            .resolve(&url("git@github.com:org/repo.git"), Some("main"))
            .await
            .unwrap();

        assert!(resolved.overridden);
        assert_eq!(resolved.path, PathBuf::from("/work/repo"));
        assert_eq!(git.fetches(), 0);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn failed_fetch_does_not_move_stamp() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new(Duration::ZERO));
        git.fail_fetches.store(1, Ordering::SeqCst);
        let cache = cache(temp.path(), Arc::clone(&git)).with_update_interval(Duration::from_secs(3600));
        let u = url("https://example.com/org/base.git");

        let err = cache.resolve(&u, None).await.unwrap_err();
        assert!(matches!(err, KeelError::Fetch { .. }));

        cache.resolve(&u, None).await.unwrap();
        assert_eq!(git.fetches(), 2);
    }

    #[tokio::test]
    async fn ssh_auth_failure_surfaces_as_fetch_error() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new(Duration::ZERO));
        let cache = cache(temp.path(), Arc::clone(&git));

        let err = cache
            .resolve(&url("git@github.com:org/private.git"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, KeelError::Fetch { ref key, .. } if key == "github.com/org/private"));
        assert_eq!(git.fetches(), 0);
    }

    #[tokio::test]
    async fn resolve_observes_deadline() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new(Duration::from_secs(5)));
        let cache = cache(temp.path(), git).with_deadline(Instant::now() + Duration::from_millis(20));

        let err = cache
            .resolve(&url("https://example.com/org/slow.git"), None)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn clear_forces_refetch_inside_interval() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new(Duration::ZERO));
        let cache = cache(temp.path(), Arc::clone(&git)).with_update_interval(Duration::from_secs(3600));
        let u = url("https://example.com/org/base.git");

        let resolved = cache.resolve(&u, Some("main")).await.unwrap();
        let key_dir = resolved.path.parent().unwrap().parent().unwrap().to_path_buf();
        assert!(key_dir.join(STAMP_FILE).exists());

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert!(!key_dir.exists());
        assert!(cache.is_empty());

        let again = cache.resolve(&u, Some("main")).await.unwrap();
        assert_eq!(git.fetches(), 2);
        assert_eq!(again.path, resolved.path);
        assert!(again.path.join("COMMIT").exists());
    }

    #[tokio::test]
    async fn clear_on_missing_root_is_a_noop() {
        let temp = TempDir::new().unwrap();
        let git = Arc::new(FakeGit::new(Duration::ZERO));
        let cache = cache(&temp.path().join("absent"), git);

        assert_eq!(cache.clear().await.unwrap(), 0);
    }

    #[test]
    fn dir_names_are_safe_and_distinct() {
        let a = dir_name("github.com/org/repo");
        let b = dir_name("github.com/org-repo");
        assert!(a.starts_with("github-com-org-repo-"));
        assert_ne!(a, b);
        assert!(!dir_name("v1.2.0").contains('.'));
    }
}
