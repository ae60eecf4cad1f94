//! Deploy command - apply manifests with their hooks

use crate::audit::AuditLog;
use crate::cli::args::DeployArgs;
use crate::cli::commands::common;
use crate::config::Config;
use crate::deploy::{self, ExecuteOptions, KubectlApplier, RunResult};
use crate::error::{KeelError, KeelResult};
use crate::hooks::{RunState, Scheduler};
use console::style;
use std::sync::Arc;
use tracing::info;

/// Execute the deploy command
pub async fn execute(args: DeployArgs, config: &Config) -> KeelResult<()> {
    let deadline = common::deadline(config);
    let pool = common::connection_pool(config);
    let cache = common::source_cache(config, pool.clone(), deadline)?;
    let loaded = common::load_source(&args.source, &cache).await;
    common::close_pool(&pool).await;
    let loaded = loaded?;

    if let Some(ref commit) = loaded.commit {
        info!("Deploying {} at {}", args.source.source, commit);
    }

    let state = RunState::new(Arc::new(KubectlApplier::new(config.deploy.context.clone())));
    let plan = Scheduler::new(config.deploy.initial_detection)
        .plan(&loaded.resources, &state)
        .await?;

    let audit = AuditLog::new(config);
    audit
        .deploy_started(state.id(), &args.source.source, args.dry_run)
        .await;

    let options = ExecuteOptions {
        dry_run: args.dry_run,
        deadline,
        workers: args.workers.unwrap_or(config.deploy.workers),
        fail_fast: args.fail_fast || config.deploy.fail_fast,
    };
    let result = deploy::execute(&plan, &state, &options).await;

    audit.deploy_finished(state.id(), &result, args.dry_run).await;
    print_summary(&result, args.dry_run);

    if result.is_success() {
        Ok(())
    } else {
        Err(KeelError::User(format!(
            "deployment failed with {} error(s)",
            result.errors.len()
        )))
    }
}

fn print_summary(result: &RunResult, dry_run: bool) {
    let verb = if dry_run { "Would apply" } else { "Applied" };
    for key in &result.applied {
        println!("{} {} {}", style("+").green(), verb, key);
    }
    for key in &result.skipped_hooks {
        println!("{} Skipped hook {}", style("-").dim(), style(key).dim());
    }
    for key in &result.deleted_hooks {
        println!("{} Deleted hook {}", style("x").yellow(), key);
    }
    for err in &result.errors {
        eprintln!("{} {}", style("✗").red(), err);
    }

    println!();
    let summary = format!(
        "{} resource(s) {}, {} hook(s) skipped",
        result.applied_count,
        if dry_run { "would be applied" } else { "applied" },
        result.skipped_hooks.len()
    );
    if result.is_success() {
        println!("{} {}", style("✓").green(), summary);
    } else if result.aborted {
        println!("{} {} (run aborted)", style("✗").red(), summary);
    } else {
        println!("{} {}", style("!").yellow(), summary);
    }
}
