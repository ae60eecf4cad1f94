//! CLI command implementations

pub mod cache;
mod common;
pub mod config;
pub mod deploy;
pub mod plan;
pub mod resolve;

pub use cache::execute as cache;
pub use config::execute as config;
pub use deploy::execute as deploy;
pub use plan::execute as plan;
pub use resolve::execute as resolve;
