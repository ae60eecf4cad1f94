//! Git sources
//!
//! Resolves remote repositories to local directories through a shared,
//! deduplicating cache with optional local overrides.

mod cache;
mod git;
mod overrides;
mod url;

pub use cache::{ResolvedSource, SourceCache};
pub use git::{GitBackend, GitCli, GitTransport};
pub use overrides::{Overrides, RepoOverride};
pub use url::{GitUrl, RepoKey, TransportKind};
