//! Wiring shared by commands

use crate::cli::args::SourceArgs;
use crate::config::{Config, ConfigManager};
use crate::error::{KeelError, KeelResult};
use crate::manifest::{self, Resource};
use crate::source::{GitUrl, SourceCache};
use crate::ssh::{AuthProviders, ConnectionPool, OpenSshConnector};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Run deadline from `deploy.timeout_secs`
pub fn deadline(config: &Config) -> Instant {
    Instant::now() + Duration::from_secs(config.deploy.timeout_secs)
}

/// Connection pool over OpenSSH master sockets
pub fn connection_pool(config: &Config) -> Arc<ConnectionPool> {
    let control_dir = config
        .ssh
        .control_dir
        .clone()
        .unwrap_or_else(ConfigManager::default_ssh_control_dir);

    Arc::new(ConnectionPool::new(
        Arc::new(OpenSshConnector::new(control_dir)),
        Arc::new(AuthProviders::from_config(config)),
    ))
}

/// Source cache bound to the run deadline
pub fn source_cache(
    config: &Config,
    pool: Arc<ConnectionPool>,
    deadline: Instant,
) -> KeelResult<SourceCache> {
    Ok(SourceCache::from_config(config, pool)?.with_deadline(deadline))
}

/// Release pooled sessions, logging instead of failing
pub async fn close_pool(pool: &ConnectionPool) {
    if let Err(e) = pool.close().await {
        warn!("Failed to close ssh sessions: {}", e);
    }
}

/// Manifests selected by the command line, with where they came from
pub struct LoadedSource {
    pub dir: PathBuf,
    pub commit: Option<String>,
    pub resources: Vec<Resource>,
}

/// Resolve `args` to a directory and load its manifests.
///
/// An existing local directory is used as-is; anything else is a git URL.
pub async fn load_source(args: &SourceArgs, cache: &SourceCache) -> KeelResult<LoadedSource> {
    let local = Path::new(&args.source);

    let (root, commit) = if local.is_dir() {
        if args.git_ref.is_some() {
            return Err(KeelError::User(format!(
                "--ref cannot be used with local directory {}",
                local.display()
            )));
        }
        (local.to_path_buf(), None)
    } else {
        let url = GitUrl::parse(&args.source)?;
        let resolved = cache.resolve(&url, args.git_ref.as_deref()).await?;
        (resolved.path, resolved.commit)
    };

    let dir = match args.subdir {
        Some(ref subdir) => root.join(subdir),
        None => root,
    };
    debug!("Loading manifests from {}", dir.display());

    let resources = manifest::load_dir(&dir)?;
    Ok(LoadedSource {
        dir,
        commit,
        resources,
    })
}
