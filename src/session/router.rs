// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Routing of agent shell commands to the host or the bound workspace.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use super::{
    command_argv, shell_quote, strip_escape, CommandClass, HostAllowList, SessionBinding,
    SessionStore, WorkspaceKind,
};
use crate::config::DEFAULT_START_TIMEOUT_SECONDS;
use crate::container::{override_path, ContainerRuntime};
use crate::error::{BerthError, BerthResult};
use crate::jobs::{JobStatus, JobStore};
use crate::telemetry::GLOBAL_METRICS;

/// Where a routed command ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTarget {
    /// Unchanged, on the host.
    Host,
    /// On the host, inside a worktree.
    Worktree,
    /// Inside the workspace's container.
    Container,
    /// Replaced by a failing no-op because the container is not ready.
    Blocked,
}

/// A command after routing, ready to hand to `sh -c`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedCommand {
    pub class: CommandClass,
    pub target: RouteTarget,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl RoutedCommand {
    fn host(class: CommandClass, command: &str) -> Self {
        Self {
            class,
            target: RouteTarget::Host,
            command: command.to_string(),
            cwd: None,
        }
    }

    /// Whether routing changed anything relative to `original`.
    pub fn is_rewritten(&self, original: &str) -> bool {
        self.command != original || self.cwd.is_some()
    }
}

/// Captured result of [`SessionRouter::execute`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub routed: RoutedCommand,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Classifies and rewrites commands for the session they come from.
pub struct SessionRouter {
    sessions: Arc<SessionStore>,
    jobs: Arc<JobStore>,
    allow_list: HostAllowList,
    exec_prefix: Vec<String>,
    overrides_dir: PathBuf,
    start_timeout: Duration,
}

impl SessionRouter {
    pub fn new(
        sessions: Arc<SessionStore>,
        jobs: Arc<JobStore>,
        allow_list: HostAllowList,
        runtime: &dyn ContainerRuntime,
        overrides_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sessions,
            jobs,
            allow_list,
            exec_prefix: runtime.exec_prefix(),
            overrides_dir: overrides_dir.into(),
            start_timeout: Duration::from_secs(DEFAULT_START_TIMEOUT_SECONDS),
        }
    }

    /// Age after which an unfinished start is treated as abandoned.
    pub fn with_start_timeout(mut self, limit: Duration) -> Self {
        self.start_timeout = limit;
        self
    }

    /// Build a router and garbage-collect finished jobs older than `job_retention`.
    pub async fn open(
        sessions: Arc<SessionStore>,
        jobs: Arc<JobStore>,
        allow_list: HostAllowList,
        runtime: &dyn ContainerRuntime,
        overrides_dir: impl Into<PathBuf>,
        job_retention: Duration,
    ) -> Self {
        if let Err(e) = jobs.cleanup(job_retention).await {
            warn!(error = %e, "Job cleanup failed");
        }
        Self::new(sessions, jobs, allow_list, runtime, overrides_dir)
    }

    pub fn classify(&self, command: &str) -> CommandClass {
        self.allow_list.classify(command)
    }

    /// Route `command` for `session_id`'s binding, if any.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, command)))]
    pub async fn route(&self, session_id: Option<&str>, command: &str) -> BerthResult<RoutedCommand> {
        let binding = match session_id {
            Some(id) => self.sessions.get(id).await?,
            None => None,
        };
        self.route_binding(binding.as_ref(), command).await
    }

    /// Route `command` against an explicit binding.
    pub async fn route_binding(
        &self,
        binding: Option<&SessionBinding>,
        command: &str,
    ) -> BerthResult<RoutedCommand> {
        let class = self.classify(command);
        GLOBAL_METRICS.record_route(class);

        if class == CommandClass::Escape {
            let stripped = strip_escape(command).unwrap_or(command);
            return Ok(RoutedCommand::host(class, stripped));
        }

        let Some((binding, workspace)) =
            binding.and_then(|b| b.workspace.as_deref().map(|ws| (b, ws)))
        else {
            return Ok(RoutedCommand::host(class, command));
        };

        match binding.kind {
            WorkspaceKind::Worktree => Ok(RoutedCommand {
                class,
                target: RouteTarget::Worktree,
                command: command.to_string(),
                cwd: Some(workspace.to_path_buf()),
            }),
            WorkspaceKind::ContainerClone if class == CommandClass::Host => {
                Ok(RoutedCommand::host(class, command))
            }
            WorkspaceKind::ContainerClone => {
                if binding.starting {
                    if let Some(message) = self.not_ready_message(binding, workspace).await? {
                        debug!(workspace = %workspace.display(), "Workspace not ready");
                        return Ok(RoutedCommand {
                            class,
                            target: RouteTarget::Blocked,
                            command: format!("printf '%s\\n' {} >&2; exit 1", shell_quote(&message)),
                            cwd: None,
                        });
                    }
                }
                Ok(RoutedCommand {
                    class,
                    target: RouteTarget::Container,
                    command: self.container_command(workspace, command).await,
                    cwd: None,
                })
            }
        }
    }

    /// Status text when the container behind a starting binding is not usable yet.
    async fn not_ready_message(
        &self,
        binding: &SessionBinding,
        workspace: &Path,
    ) -> BerthResult<Option<String>> {
        let Some(mut job) = self.jobs.get(workspace).await? else {
            return Ok(None);
        };
        if !job.status.is_terminal() {
            if let Some(failed) = self.jobs.fail_if_abandoned(workspace, self.start_timeout).await? {
                job = failed;
            }
        }
        let message = match job.status {
            JobStatus::Completed => return Ok(None),
            JobStatus::Failed => format!(
                "berth: workspace {} failed to start: {}. Run `berth start {}` to retry.",
                workspace.display(),
                job.error.as_deref().unwrap_or("unknown error"),
                binding.branch
            ),
            status => format!(
                "berth: workspace {} is still starting ({status}). Retry shortly, or prefix the command with HOST: to run it on the host.",
                workspace.display()
            ),
        };
        Ok(Some(message))
    }

    async fn container_command(&self, workspace: &Path, command: &str) -> String {
        let mut parts: Vec<String> = self
            .exec_prefix
            .iter()
            .map(|p| shell_quote(p).into_owned())
            .collect();
        parts.push("--workspace-folder".to_string());
        parts.push(shell_quote(&workspace.to_string_lossy()).into_owned());

        let override_cfg = override_path(&self.overrides_dir, workspace);
        if tokio::fs::try_exists(&override_cfg).await.unwrap_or(false) {
            parts.push("--override-config".to_string());
            parts.push(shell_quote(&override_cfg.to_string_lossy()).into_owned());
        }

        parts.push("--".to_string());
        parts.push(command_argv(command));
        parts.join(" ")
    }

    /// Route and run `command`, capturing its output.
    ///
    /// Flipping `cancel` to `true` stops waiting and returns
    /// [`BerthError::Cancelled`]; the child is killed when its handle drops.
    pub async fn execute(
        &self,
        session_id: Option<&str>,
        command: &str,
        cwd: Option<&Path>,
        cancel: watch::Receiver<bool>,
    ) -> BerthResult<CommandOutput> {
        let routed = self.route(session_id, command).await?;
        run_routed(routed, cwd, cancel).await
    }
}

/// Run an already-routed command with `sh -c`.
pub async fn run_routed(
    routed: RoutedCommand,
    cwd: Option<&Path>,
    mut cancel: watch::Receiver<bool>,
) -> BerthResult<CommandOutput> {
    if *cancel.borrow() {
        return Err(BerthError::Cancelled);
    }

    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(&routed.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = routed.cwd.as_deref().or(cwd) {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn()?;
    let output = child.wait_with_output();
    tokio::pin!(output);

    let output = loop {
        tokio::select! {
            res = &mut output => break res?,
            changed = cancel.changed() => {
                if changed.is_err() {
                    // Sender gone: nobody can cancel any more.
                    break (&mut output).await?;
                }
                if *cancel.borrow() {
                    return Err(BerthError::Cancelled);
                }
            }
        }
    };

    Ok(CommandOutput {
        routed,
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{write_port_override, MockContainerRuntime};
    use crate::jobs::JobDetail;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        sessions: Arc<SessionStore>,
        jobs: Arc<JobStore>,
        router: SessionRouter,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path().join("sessions")));
        let jobs = Arc::new(JobStore::new(dir.path().join("jobs")));
        let mut runtime = MockContainerRuntime::new();
        runtime
            .expect_exec_prefix()
            .returning(|| vec!["devcontainer".to_string(), "exec".to_string()]);
        let router = SessionRouter::new(
            Arc::clone(&sessions),
            Arc::clone(&jobs),
            HostAllowList::default(),
            &runtime,
            dir.path().join("overrides"),
        );
        Fixture {
            dir,
            sessions,
            jobs,
            router,
        }
    }

    fn container_binding(ws: &str) -> SessionBinding {
        SessionBinding::new("s1", ws, "my api", "feat/x", WorkspaceKind::ContainerClone)
    }

    #[tokio::test]
    async fn test_no_binding_passes_through() {
        let f = fixture();
        let routed = f.router.route(Some("unknown"), "npm test").await.unwrap();
        assert_eq!(routed.target, RouteTarget::Host);
        assert_eq!(routed.command, "npm test");
        assert!(!routed.is_rewritten("npm test"));

        let routed = f.router.route(None, "npm test").await.unwrap();
        assert_eq!(routed.class, CommandClass::Workspace);
    }

    #[tokio::test]
    async fn test_escape_is_stripped_even_when_bound() {
        let f = fixture();
        f.sessions.put(&container_binding("/work/my api/feat-x")).await.unwrap();

        let routed = f.router.route(Some("s1"), "HOST: git status").await.unwrap();
        assert_eq!(routed.class, CommandClass::Escape);
        assert_eq!(routed.target, RouteTarget::Host);
        assert_eq!(routed.command, "git status");
    }

    #[tokio::test]
    async fn test_container_rewrite_with_override() {
        let f = fixture();
        let ws = Path::new("/work/my api/feat-x");
        f.sessions.put(&container_binding("/work/my api/feat-x")).await.unwrap();
        write_port_override(&f.dir.path().join("overrides"), ws, 4100)
            .await
            .unwrap();

        let routed = f.router.route(Some("s1"), "npm test").await.unwrap();
        assert_eq!(routed.target, RouteTarget::Container);
        assert!(routed.command.ends_with("-- npm test"));

        let shown = routed
            .command
            .replace(f.dir.path().to_str().unwrap(), "<tmp>");
        insta::assert_snapshot!(shown, @"devcontainer exec --workspace-folder '/work/my api/feat-x' --override-config <tmp>/overrides/cd174f0ec8f23cb1/devcontainer.json -- npm test");
    }

    #[tokio::test]
    async fn test_container_rewrite_without_override() {
        let f = fixture();
        f.sessions.put(&container_binding("/clones/api/feat-x")).await.unwrap();

        let routed = f
            .router
            .route(Some("s1"), "pytest -k 'not slow' | tail")
            .await
            .unwrap();
        insta::assert_snapshot!(routed.command, @r"devcontainer exec --workspace-folder /clones/api/feat-x -- sh -c 'pytest -k '\''not slow'\'' | tail'");
    }

    #[tokio::test]
    async fn test_host_commands_stay_on_host_for_containers() {
        let f = fixture();
        f.sessions.put(&container_binding("/clones/api/feat-x")).await.unwrap();

        let routed = f.router.route(Some("s1"), "git log -1").await.unwrap();
        assert_eq!(routed.target, RouteTarget::Host);
        assert_eq!(routed.command, "git log -1");
    }

    #[tokio::test]
    async fn test_worktree_redirects_cwd_only() {
        let f = fixture();
        let binding =
            SessionBinding::new("s1", "/w/api/feat-x", "api", "feat-x", WorkspaceKind::Worktree);
        f.sessions.put(&binding).await.unwrap();

        let routed = f.router.route(Some("s1"), "npm test").await.unwrap();
        assert_eq!(routed.target, RouteTarget::Worktree);
        assert_eq!(routed.command, "npm test");
        assert_eq!(routed.cwd, Some(PathBuf::from("/w/api/feat-x")));
        assert!(routed.is_rewritten("npm test"));
    }

    #[tokio::test]
    async fn test_starting_container_blocks_workspace_commands() {
        let f = fixture();
        let ws = Path::new("/clones/api/feat-x");
        f.sessions
            .put(&container_binding("/clones/api/feat-x").starting(true))
            .await
            .unwrap();
        f.jobs
            .record(ws, JobStatus::Pending, JobDetail::port(4100))
            .await
            .unwrap();
        f.jobs
            .record(ws, JobStatus::Running, JobDetail::default())
            .await
            .unwrap();

        let routed = f.router.route(Some("s1"), "npm test").await.unwrap();
        assert_eq!(routed.target, RouteTarget::Blocked);
        assert!(routed.command.contains("still starting (running)"));
        assert!(routed.command.ends_with("exit 1"));

        // Host commands are unaffected
        let routed = f.router.route(Some("s1"), "ls").await.unwrap();
        assert_eq!(routed.target, RouteTarget::Host);

        f.jobs
            .record(ws, JobStatus::Completed, JobDetail::default())
            .await
            .unwrap();
        let routed = f.router.route(Some("s1"), "npm test").await.unwrap();
        assert_eq!(routed.target, RouteTarget::Container);
    }

    #[tokio::test]
    async fn test_dead_worker_reports_failure_instead_of_starting() {
        let f = fixture();
        let ws = Path::new("/clones/api/crashed");
        f.sessions
            .put(&container_binding("/clones/api/crashed").starting(true))
            .await
            .unwrap();
        f.jobs
            .record(ws, JobStatus::Pending, JobDetail::port(4100))
            .await
            .unwrap();
        f.jobs
            .record(
                ws,
                JobStatus::Running,
                JobDetail {
                    pid: Some(999_999),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let routed = f.router.route(Some("s1"), "npm test").await.unwrap();
        assert_eq!(routed.target, RouteTarget::Blocked);
        assert!(routed.command.contains("failed to start"), "{}", routed.command);
        assert!(routed.command.contains("berth start feat/x"));
        assert_eq!(
            f.jobs.get(ws).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_blocked_command_exits_nonzero() {
        let f = fixture();
        let ws = Path::new("/clones/api/broken");
        f.sessions
            .put(&container_binding("/clones/api/broken").starting(true))
            .await
            .unwrap();
        f.jobs
            .record(ws, JobStatus::Pending, JobDetail::default())
            .await
            .unwrap();
        f.jobs
            .record(ws, JobStatus::Failed, JobDetail::error("image pull failed"))
            .await
            .unwrap();

        let (_tx, rx) = watch::channel(false);
        let out = f.router.execute(Some("s1"), "npm test", None, rx).await.unwrap();
        assert_eq!(out.exit_code, 1);
        assert!(out.stderr.contains("image pull failed"));
        assert!(out.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_execute_in_worktree() {
        let f = fixture();
        let ws = f.dir.path().join("wt");
        std::fs::create_dir(&ws).unwrap();
        let binding = SessionBinding::new("s1", &ws, "api", "main", WorkspaceKind::Worktree);
        f.sessions.put(&binding).await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let out = f
            .router
            .execute(Some("s1"), "ls", None, rx)
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.routed.cwd.as_deref(), Some(ws.as_path()));
    }

    #[tokio::test]
    async fn test_execute_cancellation() {
        let f = fixture();
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            f.router.execute(None, "sleep 5", None, rx).await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("cancellation should be prompt")
            .unwrap();
        assert!(matches!(result, Err(BerthError::Cancelled)));
    }

    #[tokio::test]
    async fn test_open_cleans_old_jobs() {
        let dir = TempDir::new().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path().join("sessions")));
        let jobs = Arc::new(JobStore::new(dir.path().join("jobs")));
        let ws = Path::new("/clones/api/old");
        jobs.record(ws, JobStatus::Pending, JobDetail::default())
            .await
            .unwrap();
        let mut done = jobs
            .record(ws, JobStatus::Completed, JobDetail::default())
            .await
            .unwrap();
        done.updated_at = chrono::Utc::now() - chrono::Duration::hours(3);
        let file = jobs
            .dir()
            .join(format!("{}.json", crate::store::workspace_key(ws)));
        crate::store::write_json(&file, &done).await.unwrap();

        let mut runtime = MockContainerRuntime::new();
        runtime.expect_exec_prefix().returning(Vec::new);
        let _router = SessionRouter::open(
            sessions,
            Arc::clone(&jobs),
            HostAllowList::default(),
            &runtime,
            dir.path().join("overrides"),
            Duration::from_secs(3600),
        )
        .await;

        assert!(jobs.get(ws).await.unwrap().is_none());
    }
}
