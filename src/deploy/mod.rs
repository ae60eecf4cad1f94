//! Deployment execution
//!
//! - [`ClusterApplier`]: the cluster seam
//! - [`KubectlApplier`]: applier shelling out to `kubectl`
//! - [`MemoryCluster`]: in-memory applier
//! - [`execute`]: walks a plan's waves

mod applier;
mod driver;
mod kubectl;
mod memory;

pub use applier::ClusterApplier;
pub use driver::{execute, ExecuteOptions, RunResult};
pub use kubectl::{readiness_of, KubectlApplier, Readiness};
pub use memory::{ClusterEvent, MemoryCluster};
