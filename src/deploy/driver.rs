//! Plan execution
//!
//! Walks the waves in order. Ordinary waves run up to `workers` applies at
//! once; hook waves run one hook at a time and block on readiness. Any hook
//! failure ends the run.

use crate::error::{KeelError, KeelResult};
use crate::hooks::{Plan, PlannedHook, RunState, Wave};
use crate::manifest::{Resource, ResourceKey};
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Knobs for one execution
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Report what would happen without any create, update or delete
    pub dry_run: bool,
    /// Deadline for the whole run
    pub deadline: Instant,
    /// Concurrent applies in an ordinary wave
    pub workers: usize,
    /// Cancel an ordinary wave at its first failure
    pub fail_fast: bool,
}

/// Outcome of a run
#[derive(Debug, Default)]
pub struct RunResult {
    /// Applies performed (or, in dry-run, that would be performed)
    pub applied_count: usize,
    /// Applied keys in completion order
    pub applied: Vec<ResourceKey>,
    /// Hooks that ran to readiness
    pub executed_hooks: Vec<ResourceKey>,
    /// Hooks not applicable to this run
    pub skipped_hooks: Vec<ResourceKey>,
    /// Hooks removed after running by their deletion policy
    pub deleted_hooks: Vec<ResourceKey>,
    pub errors: Vec<KeelError>,
    /// Whether later waves were abandoned
    pub aborted: bool,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && !self.aborted
    }

    fn record_apply(&mut self, key: ResourceKey) {
        self.applied_count += 1;
        self.applied.push(key);
    }

    fn fail(&mut self, err: KeelError) {
        self.errors.push(err);
        self.aborted = true;
    }
}

/// Run `plan` against the run's cluster
pub async fn execute(plan: &Plan, state: &RunState, options: &ExecuteOptions) -> RunResult {
    let mut driver = Driver {
        state,
        options,
        result: RunResult::default(),
        created: HashSet::new(),
    };

    for resource in &plan.inert_hooks {
        driver.result.skipped_hooks.push(resource.key());
    }

    for wave in &plan.waves {
        if Instant::now() >= options.deadline {
            driver.result.fail(KeelError::timeout("deployment run"));
            break;
        }

        let keep_going = match wave {
            Wave::Resources(resources) => driver.ordinary_wave(resources).await,
            Wave::Hooks { phase, hooks } => {
                info!("Running {} {} hook(s)", hooks.len(), phase);
                driver.hook_wave(hooks).await
            }
        };

        if !keep_going {
            driver.result.aborted = true;
            warn!("Run {} aborted; later waves not attempted", state.id());
            break;
        }
    }

    driver.result
}

struct Driver<'a> {
    state: &'a RunState,
    options: &'a ExecuteOptions,
    result: RunResult,
    /// Hooks created by this run and still present
    created: HashSet<ResourceKey>,
}

impl Driver<'_> {
    /// Apply a wave of ordinary resources. Returns whether to continue.
    async fn ordinary_wave(&mut self, resources: &[Arc<Resource>]) -> bool {
        if self.options.dry_run {
            for resource in resources {
                info!("Would apply {}", resource.key());
                self.result.record_apply(resource.key());
            }
            return true;
        }

        let applier = Arc::clone(self.state.applier());
        let mut applies = stream::iter(resources.iter().cloned())
            .map(|resource| {
                let applier = Arc::clone(&applier);
                async move {
                    let key = resource.key();
                    debug!("Applying {}", key);
                    let outcome = applier.apply(&resource).await;
                    (key, outcome)
                }
            })
            .buffer_unordered(self.options.workers.max(1));

        let mut failed = false;
        loop {
            let next = match tokio::time::timeout_at(self.options.deadline, applies.next()).await {
                Ok(next) => next,
                Err(_) => {
                    // In-flight applies are dropped; nothing is rolled back.
                    self.result.fail(KeelError::timeout("applying ordinary resources"));
                    return false;
                }
            };

            let Some((key, outcome)) = next else {
                break;
            };

            match outcome {
                Ok(()) => {
                    info!("Applied {}", key);
                    self.result.record_apply(key);
                }
                Err(e) => {
                    warn!("Failed to apply {}: {}", key, e);
                    self.result.errors.push(as_apply_error(&key, e));
                    failed = true;
                    if self.options.fail_fast {
                        break;
                    }
                }
            }
        }

        !(failed && self.options.fail_fast)
    }

    /// Run hooks one at a time. Returns whether to continue.
    async fn hook_wave(&mut self, hooks: &[PlannedHook]) -> bool {
        for hook in hooks {
            let key = hook.key();

            if !hook.applicable {
                debug!("Skipping hook {}", key);
                self.result.skipped_hooks.push(key);
                continue;
            }

            if self.options.dry_run {
                info!("Would run hook {}", key);
                self.result.record_apply(key.clone());
                self.result.executed_hooks.push(key);
                continue;
            }

            if let Err(e) = self.run_hook(hook, &key).await {
                warn!("Hook {} failed: {}", key, e);
                if hook.spec.delete.hook_failed {
                    if let Err(del) = self.delete_hook(&key).await {
                        self.result.errors.push(del);
                    } else {
                        self.result.deleted_hooks.push(key.clone());
                    }
                }
                self.result.fail(e);
                return false;
            }

            self.result.executed_hooks.push(key.clone());
            if hook.spec.delete.hook_succeeded {
                match self.delete_hook(&key).await {
                    Ok(()) => self.result.deleted_hooks.push(key),
                    Err(e) => {
                        self.result.fail(e);
                        return false;
                    }
                }
            }
        }
        true
    }

    async fn run_hook(&mut self, hook: &PlannedHook, key: &ResourceKey) -> KeelResult<()> {
        let deadline = self.options.deadline;
        let applier = Arc::clone(self.state.applier());

        if hook.spec.delete.before_hook_creation && (hook.existed || self.created.contains(key)) {
            debug!("Deleting previous instance of hook {}", key);
            self.delete_hook(key).await?;
        }

        info!("Running hook {}", key);
        bounded(deadline, key, applier.apply(&hook.resource))
            .await
            .map_err(|e| as_hook_error(key, e))?;
        self.created.insert(key.clone());
        self.result.record_apply(key.clone());

        if hook.spec.wait {
            bounded(deadline, key, applier.wait_ready(key, deadline))
                .await
                .map_err(|e| as_hook_error(key, e))?;
            debug!("Hook {} is ready", key);
        }
        Ok(())
    }

    async fn delete_hook(&mut self, key: &ResourceKey) -> KeelResult<()> {
        let applier = Arc::clone(self.state.applier());
        tokio::time::timeout_at(self.options.deadline, applier.delete(key))
            .await
            .map_err(|_| KeelError::timeout(format!("deleting hook {}", key)))??;
        self.created.remove(key);
        Ok(())
    }
}

/// Run a hook's apply or readiness wait under the run deadline
async fn bounded<F>(deadline: Instant, key: &ResourceKey, op: F) -> KeelResult<()>
where
    F: Future<Output = KeelResult<()>>,
{
    tokio::time::timeout_at(deadline, op)
        .await
        .map_err(|_| KeelError::HookTimeout {
            hook: key.to_string(),
        })?
}

fn as_apply_error(key: &ResourceKey, err: KeelError) -> KeelError {
    match err {
        KeelError::Apply { .. } | KeelError::Timeout { .. } => err,
        other => KeelError::Apply {
            resource: key.to_string(),
            reason: other.to_string(),
        },
    }
}

fn as_hook_error(key: &ResourceKey, err: KeelError) -> KeelError {
    match err {
        KeelError::HookFailed { .. } | KeelError::HookTimeout { .. } => err,
        other => KeelError::HookFailed {
            hook: key.to_string(),
            reason: other.to_string(),
        },
    }
}
