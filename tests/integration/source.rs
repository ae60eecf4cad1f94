//! Source cache against real git repositories on disk

use keel::source::{GitUrl, SourceCache};
use keel::ssh::{AuthProviders, ConnectionPool, OpenSshConnector};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=keel", "-c", "user.email=keel@example.com"])
        .args(["-c", "commit.gpgsign=false", "-c", "init.defaultBranch=main"])
        .args(args)
        .current_dir(dir)
        .env_remove("GIT_DIR")
        .env_remove("GIT_WORK_TREE")
        .env_remove("GIT_INDEX_FILE")
        .status()
        .unwrap();
    assert!(status.success(), "git {:?} failed", args);
}

fn commit_manifest(repo: &Path, name: &str) {
    let dir = repo.join("deploy");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("app.yaml"),
        format!("apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: {}\n", name),
    )
    .unwrap();
    git(repo, &["add", "."]);
    git(repo, &["commit", "-q", "-m", name]);
}

fn upstream() -> (TempDir, GitUrl) {
    let repo = TempDir::new().unwrap();
    git(repo.path(), &["init", "-q"]);
    commit_manifest(repo.path(), "first");
    let url = GitUrl::parse(&format!("file://{}", repo.path().display())).unwrap();
    (repo, url)
}

fn pool(dir: &TempDir) -> Arc<ConnectionPool> {
    Arc::new(ConnectionPool::new(
        Arc::new(OpenSshConnector::new(dir.path().join("ssh"))),
        Arc::new(AuthProviders::new(vec![])),
    ))
}

fn manifest_name(tree: &Path) -> String {
    let resources = keel::manifest::load_dir(&tree.join("deploy")).unwrap();
    resources[0].name.clone()
}

#[tokio::test]
async fn resolves_and_materializes_checkout() {
    if !git_available() {
        return;
    }
    let (_repo, url) = upstream();
    let cache_root = TempDir::new().unwrap();
    let cache = SourceCache::new(cache_root.path().to_path_buf(), pool(&cache_root));

    let resolved = cache.resolve(&url, None).await.unwrap();

    assert!(!resolved.overridden);
    assert_eq!(resolved.commit.as_deref().map(str::len), Some(40));
    assert!(resolved.path.starts_with(cache_root.path()));
    assert_eq!(manifest_name(&resolved.path), "first");
}

#[tokio::test]
async fn update_interval_holds_back_new_commits() {
    if !git_available() {
        return;
    }
    let (repo, url) = upstream();
    let cache_root = TempDir::new().unwrap();

    let lazy = SourceCache::new(cache_root.path().to_path_buf(), pool(&cache_root))
        .with_update_interval(Duration::from_secs(3600));
    let first = lazy.resolve(&url, None).await.unwrap();

    commit_manifest(repo.path(), "second");

    let again = lazy.resolve(&url, None).await.unwrap();
    assert_eq!(again.commit, first.commit);
    assert_eq!(manifest_name(&again.path), "first");

    // Interval 0 always checks the remote.
    let eager = SourceCache::new(cache_root.path().to_path_buf(), pool(&cache_root));
    let fresh = eager.resolve(&url, None).await.unwrap();
    assert_ne!(fresh.commit, first.commit);
    assert_eq!(manifest_name(&fresh.path), "second");
}

#[tokio::test]
async fn concurrent_resolves_share_one_tree() {
    if !git_available() {
        return;
    }
    let (_repo, url) = upstream();
    let cache_root = TempDir::new().unwrap();
    let cache = Arc::new(SourceCache::new(
        cache_root.path().to_path_buf(),
        pool(&cache_root),
    ));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let cache = Arc::clone(&cache);
        let url = url.clone();
        tasks.push(tokio::spawn(async move { cache.resolve(&url, None).await }));
    }

    let mut paths = Vec::new();
    for task in tasks {
        paths.push(task.await.unwrap().unwrap().path);
    }
    assert!(paths.iter().all(|p| p == &paths[0]));
}

#[tokio::test]
async fn unknown_ref_is_a_fetch_error() {
    if !git_available() {
        return;
    }
    let (_repo, url) = upstream();
    let cache_root = TempDir::new().unwrap();
    let cache = SourceCache::new(cache_root.path().to_path_buf(), pool(&cache_root));

    let err = cache.resolve(&url, Some("no-such-branch")).await.unwrap_err();
    assert!(matches!(err, keel::KeelError::Fetch { .. }));
}

#[tokio::test]
async fn clear_drops_cached_repository() {
    if !git_available() {
        return;
    }
    let (repo, url) = upstream();
    let cache_root = TempDir::new().unwrap();
    let cache = SourceCache::new(cache_root.path().to_path_buf(), pool(&cache_root))
        .with_update_interval(Duration::from_secs(3600));

    let resolved = cache.resolve(&url, None).await.unwrap();
    commit_manifest(repo.path(), "second");

    assert_eq!(cache.clear().await.unwrap(), 1);
    assert!(!resolved.path.exists());

    // The stamp went with the mirror, so the interval no longer holds back
    // the new commit.
    let again = cache.resolve(&url, None).await.unwrap();
    assert_eq!(again.path, resolved.path);
    assert_ne!(again.commit, resolved.commit);
    assert_eq!(manifest_name(&again.path), "second");
}
