//! Integration tests for Keel

mod hooks;
mod source;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn keel(config_dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("keel");
        cmd.env("KEEL_CONFIG", config_dir.path().join("config.toml"));
        cmd
    }

    fn write_manifests(dir: &TempDir, content: &str) {
        std::fs::write(dir.path().join("app.yaml"), content).unwrap();
    }

    #[test]
    fn help_displays() {
        let config = TempDir::new().unwrap();
        keel(&config)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("GitOps deployments"));
    }

    #[test]
    fn version_displays() {
        let config = TempDir::new().unwrap();
        keel(&config)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("keel"));
    }

    #[test]
    fn config_path_honors_env() {
        let config = TempDir::new().unwrap();
        keel(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show_defaults() {
        let config = TempDir::new().unwrap();
        keel(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[general]"))
            .stdout(predicate::str::contains("timeout_secs = 600"));
    }

    #[test]
    fn config_init_then_refuses_overwrite() {
        let config = TempDir::new().unwrap();
        keel(&config).args(["config", "init"]).assert().success();
        assert!(config.path().join("config.toml").exists());

        keel(&config)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));
    }

    #[test]
    fn cache_path_from_config() {
        let config = TempDir::new().unwrap();
        std::fs::write(
            config.path().join("config.toml"),
            "[cache]\ndir = \"/var/cache/keel-test\"\n",
        )
        .unwrap();

        keel(&config)
            .args(["cache", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("/var/cache/keel-test"));
    }

    #[test]
    fn plan_offline_shows_waves() {
        let config = TempDir::new().unwrap();
        let manifests = TempDir::new().unwrap();
        write_manifests(
            &manifests,
            r#"
apiVersion: batch/v1
kind: Job
metadata:
  name: migrate
  namespace: apps
  annotations:
    keel.io/hook: pre-deploy-initial
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: cm1
  namespace: apps
"#,
        );

        keel(&config)
            .args(["plan", "--offline"])
            .arg(manifests.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("pre-deploy hooks"))
            .stdout(predicate::str::contains("batch/Job/apps/migrate"))
            .stdout(predicate::str::contains("ConfigMap/apps/cm1"));
    }

    #[test]
    fn plan_rejects_malformed_hook() {
        let config = TempDir::new().unwrap();
        let manifests = TempDir::new().unwrap();
        write_manifests(
            &manifests,
            "kind: ConfigMap\nmetadata:\n  name: bad\n  annotations:\n    keel.io/hook: pre-deploy-someday\n",
        );

        keel(&config)
            .args(["plan", "--offline"])
            .arg(manifests.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid hook annotation"));
    }

    #[test]
    fn malformed_override_shows_hint() {
        let config = TempDir::new().unwrap();
        keel(&config)
            .args([
                "resolve",
                "https://example.invalid/org/repo.git",
                "--local-git-override",
                "not-an-override",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid local git override"))
            .stderr(predicate::str::contains("Hint:"));
    }

    #[test]
    fn override_resolves_without_network() {
        let config = TempDir::new().unwrap();
        keel(&config)
            .args([
                "resolve",
                "git@example.invalid:org/repo.git",
                "--local-git-override",
                "example.invalid:org/repo=/src/repo",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("/src/repo"));
    }
}
