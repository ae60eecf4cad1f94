//! Cache command - inspect or clear the git source cache

use crate::cli::args::{CacheAction, CacheArgs};
use crate::cli::commands::common;
use crate::config::{Config, ConfigManager};
use crate::error::KeelResult;
use crate::source::SourceCache;
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> KeelResult<()> {
    match args.action {
        CacheAction::Path => {
            println!("{}", ConfigManager::cache_dir(config).display());
            Ok(())
        }
        CacheAction::Clear => clear(config).await,
    }
}

async fn clear(config: &Config) -> KeelResult<()> {
    let cache = SourceCache::from_config(config, common::connection_pool(config))?;
    let removed = cache.clear().await?;

    if removed == 0 {
        println!("Cache is already empty.");
    } else {
        println!(
            "{} Removed {} cached repositories from {}",
            style("✓").green(),
            removed,
            cache.root().display()
        );
    }
    Ok(())
}
