//! `kubectl`-backed cluster applier

use crate::deploy::applier::ClusterApplier;
use crate::error::{KeelError, KeelResult};
use crate::manifest::{Resource, ResourceKey};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

/// Readiness of a live object
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending,
    Failed(String),
}

/// Applier that shells out to `kubectl`
pub struct KubectlApplier {
    context: Option<String>,
    poll_interval: Duration,
}

impl KubectlApplier {
    pub fn new(context: Option<String>) -> Self {
        Self {
            context,
            poll_interval: Duration::from_secs(2),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("kubectl");
        if let Some(ref context) = self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.kill_on_drop(true);
        cmd
    }

    /// Execute a kubectl command against one object
    async fn exec(&self, key: &ResourceKey, args: &[&str]) -> KeelResult<std::process::Output> {
        let mut cmd = self.command();
        cmd.args(args).arg(object_ref(key));
        if let Some(ref ns) = key.namespace {
            cmd.arg("-n").arg(ns);
        }

        debug!("Executing: kubectl {:?} {}", args, key);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| KeelError::command_failed(format!("kubectl {:?}", args), e))
    }

    async fn readiness(&self, key: &ResourceKey) -> KeelResult<Readiness> {
        let output = self
            .exec(key, &["get", "--ignore-not-found", "-o", "json"])
            .await?;
        if !output.status.success() {
            return Err(KeelError::HookFailed {
                hook: key.to_string(),
                reason: stderr_of(&output),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Readiness::Pending);
        }
        let object: Value = serde_json::from_str(&stdout)?;
        Ok(readiness_of(&key.kind, &object))
    }
}

#[async_trait]
impl ClusterApplier for KubectlApplier {
    fn name(&self) -> &'static str {
        "kubectl"
    }

    async fn exists(&self, key: &ResourceKey) -> KeelResult<bool> {
        let output = self
            .exec(key, &["get", "--ignore-not-found", "-o", "name"])
            .await?;
        exists_from(key, &output)
    }

    async fn apply(&self, resource: &Resource) -> KeelResult<()> {
        let key = resource.key();
        let body = serde_json::to_vec(&resource.body)?;

        debug!("Executing: kubectl apply -f - ({})", key);
        let mut child = self
            .command()
            .args(["apply", "-f", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KeelError::command_failed("kubectl apply", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&body)
                .await
                .map_err(|e| KeelError::io("writing manifest to kubectl", e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| KeelError::command_failed("kubectl apply", e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(KeelError::Apply {
                resource: key.to_string(),
                reason: stderr_of(&output),
            })
        }
    }

    async fn delete(&self, key: &ResourceKey) -> KeelResult<()> {
        let output = self
            .exec(key, &["delete", "--ignore-not-found", "--wait=true"])
            .await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(KeelError::Delete {
                resource: key.to_string(),
                reason: stderr_of(&output),
            })
        }
    }

    async fn wait_ready(&self, key: &ResourceKey, deadline: Instant) -> KeelResult<()> {
        loop {
            match self.readiness(key).await? {
                Readiness::Ready => return Ok(()),
                Readiness::Failed(reason) => {
                    return Err(KeelError::HookFailed {
                        hook: key.to_string(),
                        reason,
                    })
                }
                Readiness::Pending => {}
            }

            if Instant::now() + self.poll_interval >= deadline {
                return Err(KeelError::HookTimeout {
                    hook: key.to_string(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// `kind[.group]/name` as kubectl expects it
fn object_ref(key: &ResourceKey) -> String {
    if key.group.is_empty() {
        format!("{}/{}", key.kind, key.name)
    } else {
        format!("{}.{}/{}", key.kind, key.group, key.name)
    }
}

/// Interpret `kubectl get --ignore-not-found -o name`
fn exists_from(key: &ResourceKey, output: &std::process::Output) -> KeelResult<bool> {
    if !output.status.success() {
        return Err(KeelError::Lookup {
            resource: key.to_string(),
            reason: stderr_of(output),
        });
    }
    Ok(!output.stdout.iter().all(u8::is_ascii_whitespace))
}

fn stderr_of(output: &std::process::Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

fn condition_true<'a>(object: &'a Value, kind: &str) -> Option<&'a Value> {
    object
        .pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c["type"] == kind && c["status"] == "True")
}

/// Readiness of a live object as returned by `kubectl get -o json`
pub fn readiness_of(kind: &str, object: &Value) -> Readiness {
    match kind {
        "Job" => {
            if condition_true(object, "Complete").is_some() {
                Readiness::Ready
            } else if let Some(failed) = condition_true(object, "Failed") {
                Readiness::Failed(
                    failed["message"]
                        .as_str()
                        .unwrap_or("job failed")
                        .to_string(),
                )
            } else {
                Readiness::Pending
            }
        }
        "Pod" => match object.pointer("/status/phase").and_then(Value::as_str) {
            Some("Succeeded") => Readiness::Ready,
            Some("Failed") => Readiness::Failed(format!(
                "pod failed: {}",
                object
                    .pointer("/status/reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown reason")
            )),
            Some("Running") if condition_true(object, "Ready").is_some() => Readiness::Ready,
            _ => Readiness::Pending,
        },
        _ => Readiness::Ready,
    }
}
