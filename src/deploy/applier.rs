//! Cluster applier seam
//!
//! The engine only needs existence, apply, delete, and readiness. It never
//! looks inside live objects.

use crate::error::KeelResult;
use crate::manifest::{Resource, ResourceKey};
use async_trait::async_trait;
use tokio::time::Instant;

/// Side-effecting operations against one cluster context
#[async_trait]
pub trait ClusterApplier: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Whether the object currently exists
    async fn exists(&self, key: &ResourceKey) -> KeelResult<bool>;

    /// Create or update the object
    async fn apply(&self, resource: &Resource) -> KeelResult<()>;

    /// Delete the object; deleting a missing object succeeds
    async fn delete(&self, key: &ResourceKey) -> KeelResult<()>;

    /// Block until the object is ready.
    ///
    /// Fails with `HookFailed` if it can never become ready, `HookTimeout`
    /// once `deadline` passes.
    async fn wait_ready(&self, key: &ResourceKey, deadline: Instant) -> KeelResult<()>;
}
