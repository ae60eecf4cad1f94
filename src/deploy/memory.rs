//! In-memory cluster
//!
//! Records every call so runs can be inspected afterwards. Backs `keel plan`
//! when no cluster is reachable and the engine's tests.

use crate::deploy::applier::ClusterApplier;
use crate::error::{KeelError, KeelResult};
use crate::manifest::{Resource, ResourceKey};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    Apply(ResourceKey),
    Delete(ResourceKey),
    WaitReady(ResourceKey),
}

#[derive(Default)]
struct MemoryState {
    live: BTreeSet<ResourceKey>,
    events: Vec<ClusterEvent>,
    exists_calls: usize,
    fail_apply: HashSet<String>,
    fail_ready: HashSet<String>,
    never_ready: HashSet<String>,
    apply_delay: HashMap<String, Duration>,
    delete_delay: HashMap<String, Duration>,
}

/// Cluster that lives in a set of keys
#[derive(Default)]
pub struct MemoryCluster {
    state: Mutex<MemoryState>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `keys` already live
    pub fn with_existing(keys: impl IntoIterator<Item = ResourceKey>) -> Self {
        let cluster = Self::new();
        cluster.state().live.extend(keys);
        cluster
    }

    /// Make applies of objects named `name` fail
    pub fn fail_apply(&self, name: &str) {
        self.state().fail_apply.insert(name.to_string());
    }

    /// Make objects named `name` report a failed readiness
    pub fn fail_ready(&self, name: &str) {
        self.state().fail_ready.insert(name.to_string());
    }

    /// Make objects named `name` never become ready
    pub fn never_ready(&self, name: &str) {
        self.state().never_ready.insert(name.to_string());
    }

    /// Make applies of objects named `name` take `delay`
    pub fn slow_apply(&self, name: &str, delay: Duration) {
        self.state().apply_delay.insert(name.to_string(), delay);
    }

    /// Make deletes of objects named `name` take `delay`
    pub fn slow_delete(&self, name: &str, delay: Duration) {
        self.state().delete_delay.insert(name.to_string(), delay);
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.state().live.contains(key)
    }

    /// Whether any live object has this name
    pub fn contains_name(&self, name: &str) -> bool {
        self.state().live.iter().any(|k| k.name == name)
    }

    pub fn events(&self) -> Vec<ClusterEvent> {
        self.state().events.clone()
    }

    /// Names of applied objects, in call order
    pub fn applied_names(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|e| match e {
                ClusterEvent::Apply(key) => Some(key.name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of apply and delete calls
    pub fn mutation_count(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|e| matches!(e, ClusterEvent::Apply(_) | ClusterEvent::Delete(_)))
            .count()
    }

    pub fn exists_calls(&self) -> usize {
        self.state().exists_calls
    }

    /// Forget recorded events, keeping live objects
    pub fn clear_events(&self) {
        let mut state = self.state();
        state.events.clear();
        state.exists_calls = 0;
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ClusterApplier for MemoryCluster {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, key: &ResourceKey) -> KeelResult<bool> {
        let mut state = self.state();
        state.exists_calls += 1;
        Ok(state.live.contains(key))
    }

    async fn apply(&self, resource: &Resource) -> KeelResult<()> {
        let key = resource.key();
        let delay = {
            let mut state = self.state();
            state.events.push(ClusterEvent::Apply(key.clone()));
            state.apply_delay.get(&resource.name).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();

        if state.fail_apply.contains(&resource.name) {
            return Err(KeelError::Apply {
                resource: key.to_string(),
                reason: "admission webhook denied the request".to_string(),
            });
        }
        state.live.insert(key);
        Ok(())
    }

    async fn delete(&self, key: &ResourceKey) -> KeelResult<()> {
        let delay = {
            let mut state = self.state();
            state.events.push(ClusterEvent::Delete(key.clone()));
            state.delete_delay.get(&key.name).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.state().live.remove(key);
        Ok(())
    }

    async fn wait_ready(&self, key: &ResourceKey, deadline: Instant) -> KeelResult<()> {
        let never = {
            let mut state = self.state();
            state.events.push(ClusterEvent::WaitReady(key.clone()));
            if state.fail_ready.contains(&key.name) {
                return Err(KeelError::HookFailed {
                    hook: key.to_string(),
                    reason: "job reached condition Failed".to_string(),
                });
            }
            state.never_ready.contains(&key.name)
        };

        if never {
            tokio::time::sleep_until(deadline).await;
            return Err(KeelError::HookTimeout {
                hook: key.to_string(),
            });
        }
        Ok(())
    }
}
