//! Hook ordering across repeated runs against one cluster

use keel::config::InitialDetection;
use keel::deploy::{execute, ExecuteOptions, MemoryCluster, RunResult};
use keel::hooks::{RunState, Scheduler};
use keel::manifest::{load_str, Resource};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn project(hook: &str, deletion_policy: Option<&str>) -> Vec<Resource> {
    let policy = deletion_policy
        .map(|p| format!("\n    keel.io/hook-deletion-policy: {}", p))
        .unwrap_or_default();
    let yaml = format!(
        r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm1
  namespace: hooks
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: hook1
  namespace: hooks
  annotations:
    keel.io/hook: {hook}{policy}
"#
    );
    load_str(&yaml, Path::new("project.yaml"), 0).unwrap()
}

fn options(dry_run: bool) -> ExecuteOptions {
    ExecuteOptions {
        dry_run,
        deadline: Instant::now() + Duration::from_secs(10),
        workers: 4,
        fail_fast: false,
    }
}

async fn deploy_with(
    cluster: &Arc<MemoryCluster>,
    resources: &[Resource],
    detection: InitialDetection,
    dry_run: bool,
) -> RunResult {
    let state = RunState::new(cluster.clone());
    let plan = Scheduler::new(detection)
        .plan(resources, &state)
        .await
        .unwrap();
    execute(&plan, &state, &options(dry_run)).await
}

/// Deploy and return the names applied, in order
async fn deploy(cluster: &Arc<MemoryCluster>, resources: &[Resource]) -> Vec<String> {
    cluster.clear_events();
    let result = deploy_with(cluster, resources, InitialDetection::Hook, false).await;
    assert!(result.is_success(), "{:?}", result.errors);
    cluster.applied_names()
}

#[tokio::test]
async fn pre_deploy_initial_runs_once() {
    let cluster = Arc::new(MemoryCluster::new());
    let resources = project("pre-deploy-initial", None);

    assert_eq!(deploy(&cluster, &resources).await, vec!["hook1", "cm1"]);
    assert_eq!(deploy(&cluster, &resources).await, vec!["cm1"]);
}

#[tokio::test]
async fn post_deploy_initial_runs_once() {
    let cluster = Arc::new(MemoryCluster::new());
    let resources = project("post-deploy-initial", None);

    assert_eq!(deploy(&cluster, &resources).await, vec!["cm1", "hook1"]);
    assert_eq!(deploy(&cluster, &resources).await, vec!["cm1"]);
}

#[tokio::test]
async fn initial_and_upgrade_together_always_run() {
    let cluster = Arc::new(MemoryCluster::new());
    let resources = project("pre-deploy-initial,pre-deploy-upgrade", None);

    for _ in 0..3 {
        assert_eq!(deploy(&cluster, &resources).await, vec!["hook1", "cm1"]);
    }
}

#[tokio::test]
async fn unqualified_post_deploy_always_runs() {
    let cluster = Arc::new(MemoryCluster::new());
    let resources = project("post-deploy-initial,post-deploy-upgrade", None);

    for _ in 0..2 {
        assert_eq!(deploy(&cluster, &resources).await, vec!["cm1", "hook1"]);
    }
}

#[tokio::test]
async fn pre_and_post_deploy_surround_ordinary_resources() {
    let cluster = Arc::new(MemoryCluster::new());
    let resources = project("pre-deploy,post-deploy", None);

    for _ in 0..2 {
        assert_eq!(
            deploy(&cluster, &resources).await,
            vec!["hook1", "cm1", "hook1"]
        );
    }
}

#[tokio::test]
async fn upgrade_hooks_follow_deployment_existence() {
    let cluster = Arc::new(MemoryCluster::new());
    let resources = project("pre-deploy-upgrade", None);

    let first = deploy_with(&cluster, &resources, InitialDetection::Deployment, false).await;
    assert!(first.is_success());
    assert_eq!(cluster.applied_names(), vec!["cm1"]);

    cluster.clear_events();
    let second = deploy_with(&cluster, &resources, InitialDetection::Deployment, false).await;
    assert!(second.is_success());
    assert_eq!(cluster.applied_names(), vec!["hook1", "cm1"]);
}

#[tokio::test]
async fn hook_succeeded_removes_hook_only_on_success() {
    let resources = project("pre-deploy", Some("hook-succeeded"));

    let healthy = Arc::new(MemoryCluster::new());
    let result = deploy_with(&healthy, &resources, InitialDetection::Hook, false).await;
    assert!(result.is_success());
    assert!(!healthy.contains_name("hook1"));
    assert!(healthy.contains_name("cm1"));
    assert_eq!(result.deleted_hooks.len(), 1);

    let broken = Arc::new(MemoryCluster::new());
    broken.fail_ready("hook1");
    let result = deploy_with(&broken, &resources, InitialDetection::Hook, false).await;
    assert!(result.aborted);
    assert!(broken.contains_name("hook1"));
    assert!(!broken.contains_name("cm1"));
}

#[tokio::test]
async fn dry_run_never_mutates() {
    for hook in [
        "pre-deploy",
        "post-deploy-upgrade",
        "pre-deploy-initial,post-deploy",
    ] {
        for policy in [None, Some("hook-succeeded"), Some("hook-failed,before-hook-creation")] {
            let resources = project(hook, policy);
            let existing = resources.iter().map(Resource::key).collect::<Vec<_>>();

            for cluster in [
                Arc::new(MemoryCluster::new()),
                Arc::new(MemoryCluster::with_existing(existing.clone())),
            ] {
                let result = deploy_with(&cluster, &resources, InitialDetection::Hook, true).await;
                assert!(result.is_success());
                assert_eq!(cluster.mutation_count(), 0, "{} {:?}", hook, policy);
            }
        }
    }
}

#[tokio::test]
async fn dry_run_reflects_live_existence() {
    let resources = project("pre-deploy-initial", None);
    let hook_key = resources[1].key();

    let fresh = Arc::new(MemoryCluster::new());
    let result = deploy_with(&fresh, &resources, InitialDetection::Hook, true).await;
    assert_eq!(result.applied_count, 2);
    assert!(result.skipped_hooks.is_empty());

    let upgraded = Arc::new(MemoryCluster::with_existing([hook_key.clone()]));
    let result = deploy_with(&upgraded, &resources, InitialDetection::Hook, true).await;
    assert_eq!(result.applied_count, 1);
    assert_eq!(result.skipped_hooks, vec![hook_key]);
}
