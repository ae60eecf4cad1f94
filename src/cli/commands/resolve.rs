//! Resolve command - fetch a repository into the cache

use crate::cli::args::ResolveArgs;
use crate::cli::commands::common;
use crate::config::Config;
use crate::error::KeelResult;
use crate::source::GitUrl;
use console::style;

/// Execute the resolve command
pub async fn execute(args: ResolveArgs, config: &Config) -> KeelResult<()> {
    let url = GitUrl::parse(&args.url)?;
    let pool = common::connection_pool(config);
    let cache = common::source_cache(config, pool.clone(), common::deadline(config))?;

    let resolved = cache.resolve(&url, args.git_ref.as_deref()).await;
    common::close_pool(&pool).await;
    let resolved = resolved?;

    if resolved.overridden {
        eprintln!(
            "{} {} served from local override",
            style("!").yellow(),
            url.repo_key()
        );
    } else if let Some(ref commit) = resolved.commit {
        eprintln!(
            "{} {} at {}",
            style("✓").green(),
            url.repo_key(),
            style(&commit[..commit.len().min(12)]).dim()
        );
    }
    println!("{}", resolved.path.display());

    Ok(())
}
