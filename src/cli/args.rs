//! CLI argument definitions using clap derive

use crate::config::Config;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Keel - GitOps deployments with lifecycle hooks
///
/// Resolves manifests from local directories or git repositories and
/// applies them to a cluster, running pre/post-deploy hooks in order.
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "KEEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Serve a repository from a local path: host:org/repo[:ref]=/local/path
    #[arg(long = "local-git-override", global = true, value_name = "OVERRIDE")]
    pub local_git_overrides: Vec<String>,

    /// Seconds between fetches of the same repository (0 = always fetch)
    #[arg(long, global = true, value_name = "SECS")]
    pub git_cache_update_interval: Option<u64>,

    /// Deadline for the whole run in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Kubernetes context to use
    #[arg(long, global = true)]
    pub context: Option<String>,
}

impl Cli {
    /// Layer command-line flags over the loaded configuration
    pub fn apply_overrides(&self, config: &mut Config) {
        config
            .cache
            .overrides
            .extend(self.local_git_overrides.iter().cloned());
        if let Some(interval) = self.git_cache_update_interval {
            config.cache.update_interval_secs = interval;
        }
        if let Some(timeout) = self.timeout {
            config.deploy.timeout_secs = timeout;
        }
        if let Some(ref context) = self.context {
            config.deploy.context = Some(context.clone());
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a git repository into the local cache and print its path
    Resolve(ResolveArgs),

    /// Show the waves a deployment would run
    Plan(PlanArgs),

    /// Apply manifests with their hooks
    Deploy(DeployArgs),

    /// Manage the git source cache
    Cache(CacheArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Where manifests come from
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Local directory or git URL
    pub source: String,

    /// Git ref to deploy (branch, tag, or commit)
    #[arg(long = "ref", value_name = "REF")]
    pub git_ref: Option<String>,

    /// Directory inside the source holding the manifests
    #[arg(long, value_name = "PATH")]
    pub subdir: Option<PathBuf>,
}

/// Arguments for the resolve command
#[derive(Parser, Debug)]
pub struct ResolveArgs {
    /// Git URL (https://, ssh://, or git@host:org/repo)
    pub url: String,

    /// Git ref to check out
    #[arg(long = "ref", value_name = "REF")]
    pub git_ref: Option<String>,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Plan against an empty cluster instead of querying kubectl
    #[arg(long)]
    pub offline: bool,
}

/// Arguments for the deploy command
#[derive(Parser, Debug)]
pub struct DeployArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Report what would be applied without changing the cluster
    #[arg(long)]
    pub dry_run: bool,

    /// Stop at the first failed resource
    #[arg(long)]
    pub fail_fast: bool,

    /// Concurrent applies for ordinary resources
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print the cache directory
    Path,

    /// Remove every cached repository (mirrors, checkouts, fetch stamps)
    Clear,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}
