//! Wave planning
//!
//! The plan is fixed before anything is applied: every hook's applicability
//! is decided from existence as observed at planning time.

use crate::config::InitialDetection;
use crate::error::KeelResult;
use crate::hooks::spec::{HookSpec, Phase};
use crate::hooks::state::RunState;
use crate::manifest::{Resource, ResourceKey};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A hook in its phase slot
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedHook {
    pub resource: Arc<Resource>,
    pub spec: HookSpec,
    /// Existence at planning time
    pub existed: bool,
    /// Whether it runs in this slot. Skipped hooks keep their slot.
    pub applicable: bool,
}

impl PlannedHook {
    pub fn key(&self) -> ResourceKey {
        self.resource.key()
    }
}

/// A batch executed under one sequencing rule
#[derive(Debug, Clone, PartialEq)]
pub enum Wave {
    /// Sequential, with readiness waits
    Hooks { phase: Phase, hooks: Vec<PlannedHook> },
    /// Ordinary resources, concurrent within the wave
    Resources(Vec<Arc<Resource>>),
}

/// Ordered wave sequence for one run
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Plan {
    pub waves: Vec<Wave>,
    /// Hooks that declare no deploy phase (Helm test/delete/rollback hooks)
    pub inert_hooks: Vec<Arc<Resource>>,
}

impl Plan {
    /// Keys in execution order, with whether each will run
    pub fn steps(&self) -> Vec<(ResourceKey, bool)> {
        self.waves
            .iter()
            .flat_map(|wave| match wave {
                Wave::Hooks { hooks, .. } => hooks
                    .iter()
                    .map(|h| (h.key(), h.applicable))
                    .collect::<Vec<_>>(),
                Wave::Resources(resources) => {
                    resources.iter().map(|r| (r.key(), true)).collect()
                }
            })
            .collect()
    }
}

/// Turns a rendered resource set into waves
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler {
    initial_detection: InitialDetection,
}

impl Scheduler {
    pub fn new(initial_detection: InitialDetection) -> Self {
        Self { initial_detection }
    }

    /// Build the plan: pre-deploy hooks, ordinary resources, post-deploy hooks.
    ///
    /// Classification fails closed: a malformed hook aborts before any
    /// cluster lookup.
    pub async fn plan(&self, resources: &[Resource], state: &RunState) -> KeelResult<Plan> {
        let mut ordinary = Vec::new();
        let mut hooks = Vec::new();
        let mut inert_hooks = Vec::new();

        for resource in resources {
            let resource = Arc::new(resource.clone());
            match HookSpec::from_resource(&resource)? {
                None => ordinary.push(resource),
                Some(spec) if spec.tags.is_empty() => {
                    debug!("Ignoring hook {} with no deploy phase", resource.key());
                    inert_hooks.push(resource);
                }
                Some(spec) => hooks.push((resource, spec)),
            }
        }

        warn_duplicates(&hooks);

        let deployment_existed = match self.initial_detection {
            InitialDetection::Deployment if !ordinary.is_empty() => {
                let mut any = false;
                for resource in &ordinary {
                    if state.existed(&resource.key()).await? {
                        any = true;
                        break;
                    }
                }
                info!(
                    "Deployment is {}",
                    if any { "an upgrade" } else { "initial" }
                );
                Some(any)
            }
            _ => None,
        };

        let mut planned = Vec::with_capacity(hooks.len());
        for (resource, spec) in hooks {
            let existed = state.existed(&resource.key()).await?;
            planned.push(Candidate {
                resource,
                spec,
                existed,
                upgrade: deployment_existed.unwrap_or(existed),
            });
        }

        let mut waves = Vec::new();
        if let Some(wave) = hook_wave(Phase::PreDeploy, &planned) {
            waves.push(wave);
        }
        if !ordinary.is_empty() {
            waves.push(Wave::Resources(ordinary));
        }
        if let Some(wave) = hook_wave(Phase::PostDeploy, &planned) {
            waves.push(wave);
        }

        Ok(Plan { waves, inert_hooks })
    }
}

/// A classified hook with its existence snapshot
struct Candidate {
    resource: Arc<Resource>,
    spec: HookSpec,
    /// The hook's own resource existed
    existed: bool,
    /// `-upgrade` tags apply (otherwise `-initial` ones do)
    upgrade: bool,
}

fn hook_wave(phase: Phase, planned: &[Candidate]) -> Option<Wave> {
    let hooks: Vec<PlannedHook> = planned
        .iter()
        .filter(|c| c.spec.declares(phase))
        .map(|c| {
            let applicable = c.spec.applies(phase, c.upgrade);
            debug!(
                "{} hook {}: {} (existed: {})",
                phase,
                c.resource.key(),
                if applicable { "runs" } else { "skipped" },
                c.existed
            );
            PlannedHook {
                resource: Arc::clone(&c.resource),
                spec: c.spec.clone(),
                existed: c.existed,
                applicable,
            }
        })
        .collect();

    if hooks.is_empty() {
        None
    } else {
        Some(Wave::Hooks { phase, hooks })
    }
}

/// Two hooks with the same key keep declaration order; flag it
fn warn_duplicates(hooks: &[(Arc<Resource>, HookSpec)]) {
    let mut seen = HashSet::new();
    for (resource, _) in hooks {
        let key = resource.key();
        if !seen.insert(key.clone()) {
            warn!(
                "Hook {} is declared more than once; keeping declaration order",
                key
            );
        }
    }
}
