//! Plan command - show waves without applying

use crate::cli::args::PlanArgs;
use crate::cli::commands::common;
use crate::config::Config;
use crate::deploy::{ClusterApplier, KubectlApplier, MemoryCluster};
use crate::error::KeelResult;
use crate::hooks::{Plan, RunState, Scheduler, Wave};
use console::style;
use std::sync::Arc;

/// Execute the plan command
pub async fn execute(args: PlanArgs, config: &Config) -> KeelResult<()> {
    let pool = common::connection_pool(config);
    let cache = common::source_cache(config, pool.clone(), common::deadline(config))?;
    let loaded = common::load_source(&args.source, &cache).await;
    common::close_pool(&pool).await;
    let loaded = loaded?;

    let applier: Arc<dyn ClusterApplier> = if args.offline {
        Arc::new(MemoryCluster::new())
    } else {
        Arc::new(KubectlApplier::new(config.deploy.context.clone()))
    };
    let state = RunState::new(applier);
    let plan = Scheduler::new(config.deploy.initial_detection)
        .plan(&loaded.resources, &state)
        .await?;

    println!(
        "{} {} resource(s) from {}",
        style("Plan").bold(),
        loaded.resources.len(),
        loaded.dir.display()
    );
    print_plan(&plan);
    Ok(())
}

/// Print waves in execution order
pub fn print_plan(plan: &Plan) {
    for wave in &plan.waves {
        println!();
        match wave {
            Wave::Hooks { phase, hooks } => {
                println!("{}", style(format!("{} hooks", phase)).cyan());
                for hook in hooks {
                    if hook.applicable {
                        println!("  {} {}", style("+").green(), hook.key());
                    } else {
                        println!(
                            "  {} {} {}",
                            style("-").dim(),
                            style(hook.key()).dim(),
                            style("(skipped)").dim()
                        );
                    }
                }
            }
            Wave::Resources(resources) => {
                println!("{}", style("resources").cyan());
                for resource in resources {
                    println!("  {} {}", style("+").green(), resource.key());
                }
            }
        }
    }

    if !plan.inert_hooks.is_empty() {
        println!();
        println!("{}", style("ignored hooks").dim());
        for resource in &plan.inert_hooks {
            println!("  {} {}", style("-").dim(), style(resource.key()).dim());
        }
    }
}
