//! Per-run state

use crate::deploy::ClusterApplier;
use crate::error::KeelResult;
use crate::manifest::ResourceKey;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

/// State of one deployment run against one cluster.
///
/// Existence lookups are memoized: the first answer for a key is the answer
/// for the whole run, even after the run itself creates or deletes it.
pub struct RunState {
    id: Uuid,
    applier: Arc<dyn ClusterApplier>,
    existence: Mutex<HashMap<ResourceKey, bool>>,
}

impl RunState {
    pub fn new(applier: Arc<dyn ClusterApplier>) -> Self {
        Self {
            id: Uuid::new_v4(),
            applier,
            existence: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn applier(&self) -> &Arc<dyn ClusterApplier> {
        &self.applier
    }

    /// Whether `key` existed when this run first asked
    pub async fn existed(&self, key: &ResourceKey) -> KeelResult<bool> {
        if let Some(&known) = self.existence.lock().await.get(key) {
            return Ok(known);
        }

        let exists = self.applier.exists(key).await?;
        let mut memo = self.existence.lock().await;
        let answer = *memo.entry(key.clone()).or_insert(exists);
        debug!("Existence of {} in run {}: {}", key, self.id, answer);
        Ok(answer)
    }

    /// Number of memoized lookups
    pub async fn lookups(&self) -> usize {
        self.existence.lock().await.len()
    }
}
