//! Audit log of deployment runs
//!
//! Appends JSON lines to `<state_dir>/keel/audit.log`, one per event:
//! `deploy.started`, `hook.executed`, `deploy.finished`.

use crate::config::{Config, ConfigManager};
use crate::deploy::RunResult;
use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

/// File-based audit logger that appends JSON lines
pub struct AuditLog {
    enabled: bool,
    path: PathBuf,
}

impl AuditLog {
    pub fn new(config: &Config) -> Self {
        Self {
            enabled: config.general.audit_log,
            path: ConfigManager::audit_log_path(),
        }
    }

    pub async fn deploy_started(&self, run_id: Uuid, source: &str, dry_run: bool) {
        self.log(
            "deploy.started",
            &json!({"run_id": run_id, "source": source, "dry_run": dry_run}),
        )
        .await;
    }

    /// One `hook.executed` line per hook, then `deploy.finished`
    pub async fn deploy_finished(&self, run_id: Uuid, result: &RunResult, dry_run: bool) {
        if !dry_run {
            for hook in &result.executed_hooks {
                self.log(
                    "hook.executed",
                    &json!({
                        "run_id": run_id,
                        "hook": hook.to_string(),
                        "deleted": result.deleted_hooks.contains(hook),
                    }),
                )
                .await;
            }
        }

        let errors: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
        self.log(
            "deploy.finished",
            &json!({
                "run_id": run_id,
                "dry_run": dry_run,
                "success": result.is_success(),
                "applied": result.applied_count,
                "skipped_hooks": result.skipped_hooks.len(),
                "aborted": result.aborted,
                "errors": errors,
            }),
        )
        .await;
    }

    /// Log an audit event as a JSON line.
    ///
    /// IO failures are logged and dropped.
    pub async fn log(&self, event: &str, data: &serde_json::Value) {
        if !self.enabled {
            return;
        }

        let entry = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "event": event,
            "data": data,
        });

        let mut line = match serde_json::to_string(&entry) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to serialize audit event: {}", e);
                return;
            }
        };
        line.push('\n');

        if let Err(e) = self.append(&line).await {
            warn!("Failed to write audit log: {}", e);
        }
    }

    async fn append(&self, line: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
