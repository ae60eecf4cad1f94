//! Keel - GitOps deployment orchestrator
//!
//! Resolves deployment sources through a shared git cache and applies the
//! resulting manifests to a cluster, honoring pre/post-deploy hooks.

pub mod audit;
pub mod cli;
pub mod config;
pub mod deploy;
pub mod error;
pub mod hooks;
pub mod manifest;
pub mod source;
pub mod ssh;

pub use error::{KeelError, KeelResult};
