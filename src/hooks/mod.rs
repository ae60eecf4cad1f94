//! Hook classification and scheduling
//!
//! - [`HookSpec`]: normalized hook annotations
//! - [`RunState`]: per-run existence memo
//! - [`Scheduler`]: resource set to [`Plan`] of waves

mod plan;
mod spec;
mod state;

pub use plan::{Plan, PlannedHook, Scheduler, Wave};
pub use spec::{DeletePolicies, HookSpec, Phase, PhaseTag, Qualifier};
pub use state::RunState;
