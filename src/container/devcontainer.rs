// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! `devcontainer` CLI backed runtime.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use super::ContainerRuntime;
use crate::config::ResolvedConfig;
use crate::error::{BerthError, BerthResult};

/// Label the devcontainer CLI stamps on every container it creates.
const LOCAL_FOLDER_LABEL: &str = "devcontainer.local_folder";

/// Runtime that shells out to `devcontainer` for lifecycle and `docker`
/// for liveness and teardown.
#[derive(Debug, Clone)]
pub struct DevcontainerCli {
    cli: String,
    docker: String,
}

impl DevcontainerCli {
    pub fn new(cli: impl Into<String>, docker: impl Into<String>) -> Self {
        Self {
            cli: cli.into(),
            docker: docker.into(),
        }
    }

    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::new(&config.container_cli, &config.docker_cli)
    }

    /// Arguments for `devcontainer up`.
    pub fn up_args(workspace: &Path, override_config: Option<&Path>) -> Vec<String> {
        let mut args = vec![
            "up".to_string(),
            "--workspace-folder".to_string(),
            workspace.display().to_string(),
        ];
        if let Some(cfg) = override_config {
            args.push("--override-config".to_string());
            args.push(cfg.display().to_string());
        }
        args
    }

    async fn container_ids(&self, workspace: &Path, all: bool) -> BerthResult<Vec<String>> {
        let filter = format!("label={LOCAL_FOLDER_LABEL}={}", workspace.display());
        let mut args = vec!["ps", "-q", "--filter", filter.as_str()];
        if all {
            args.insert(1, "-a");
        }
        let stdout = run(&self.docker, &args).await?;
        Ok(stdout.lines().map(str::to_string).filter(|l| !l.is_empty()).collect())
    }
}

impl Default for DevcontainerCli {
    fn default() -> Self {
        Self::new("devcontainer", "docker")
    }
}

#[async_trait]
impl ContainerRuntime for DevcontainerCli {
    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(workspace = %workspace.display())))]
    async fn up<'a>(&self, workspace: &Path, override_config: Option<&'a Path>) -> BerthResult<()> {
        let args = Self::up_args(workspace, override_config);
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        info!("Starting container");
        run(&self.cli, &args).await?;
        Ok(())
    }

    async fn is_running(&self, workspace: &Path) -> bool {
        match self.container_ids(workspace, false).await {
            Ok(ids) => !ids.is_empty(),
            Err(e) => {
                debug!(error = %e, "Liveness probe failed");
                false
            }
        }
    }

    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(workspace = %workspace.display())))]
    async fn stop(&self, workspace: &Path) -> BerthResult<()> {
        let ids = self.container_ids(workspace, true).await?;
        if ids.is_empty() {
            debug!("No containers to stop");
            return Ok(());
        }

        let mut args = vec!["rm", "-f"];
        args.extend(ids.iter().map(String::as_str));
        run(&self.docker, &args).await?;
        info!(count = ids.len(), "Removed containers");
        Ok(())
    }

    fn exec_prefix(&self) -> Vec<String> {
        vec![self.cli.clone(), "exec".to_string()]
    }
}

/// Run an external tool, mapping failure to `Provisioning` with its stderr.
async fn run(program: &str, args: &[&str]) -> BerthResult<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| BerthError::provisioning(program, format!("failed to spawn {program}: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(program, code = ?output.status.code(), "External tool failed");
        Err(BerthError::provisioning(program, stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_up_args() {
        let args = DevcontainerCli::up_args(
            Path::new("/clones/api/feat-x"),
            Some(Path::new("/cache/overrides/ab/devcontainer.json")),
        );
        assert_eq!(
            args,
            vec![
                "up",
                "--workspace-folder",
                "/clones/api/feat-x",
                "--override-config",
                "/cache/overrides/ab/devcontainer.json",
            ]
        );
        assert_eq!(DevcontainerCli::up_args(Path::new("/w"), None).len(), 3);
    }

    #[test]
    fn test_exec_prefix_uses_configured_cli() {
        let cli = DevcontainerCli::new("/opt/bin/devcontainer", "podman");
        assert_eq!(cli.exec_prefix(), vec!["/opt/bin/devcontainer", "exec"]);
    }

    #[tokio::test]
    async fn test_missing_binary_is_provisioning_error() {
        let cli = DevcontainerCli::new("berth-no-such-devcontainer", "berth-no-such-docker");
        let err = cli.up(Path::new("/w"), None).await.unwrap_err();
        assert_eq!(err.code(), "provisioning_failed");
        assert!(!cli.is_running(Path::new("/w")).await);
    }
}
