// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workspace lifecycle: the operations behind each CLI command.
//!
//! [`Berth`] wires the provisioner, port allocator, container runtime, job
//! tracker and session store together. Everything it owns is built from a
//! [`ResolvedConfig`] and [`Paths`] handed in by the caller.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::{Paths, ResolvedConfig};
use crate::container::{
    override_path, remove_port_override, watch as watch_task, with_watchdog,
    write_port_override, ContainerRuntime, Watched,
};
use crate::error::{BerthError, BerthResult};
use crate::inventory::{workspace_status, EntryKind, Inventory, WorkspaceDescriptor};
use crate::jobs::{Job, JobDetail, JobStatus, JobStore};
use crate::ports::{PortAllocator, PortAssignment};
use crate::provision::{repo_name, CloneRequest, Provenance, Provisioner};
use crate::session::{
    run_routed, validate_session_id, CommandOutput, HostAllowList, RouteTarget, SessionBinding,
    SessionRouter, SessionStore, WorkspaceKind,
};

/// How long `start` waits for a container before returning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Wait up to the budget, then continue in a background task.
    Wait(Duration),
    /// Return immediately; a detached worker process brings the container up.
    Detach,
}

/// Parameters for [`Berth::start`].
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub repo_root: PathBuf,
    pub branch: String,
    pub kind: WorkspaceKind,
    pub force: bool,
    pub session: Option<String>,
    pub mode: StartMode,
}

/// What `start` did.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartReport {
    pub workspace: PathBuf,
    pub kind: WorkspaceKind,
    pub repo: String,
    pub branch: String,
    pub created: bool,
    pub copied: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_repo: Option<PathBuf>,
}

/// [`StartReport`] plus the task still bringing the container up, if any.
#[derive(Debug)]
pub struct StartOutcome {
    pub report: StartReport,
    pub background: Option<JoinHandle<BerthResult<()>>>,
    /// A detached start recorded a fresh job that no process is running yet.
    pub needs_worker: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StopReport {
    pub workspace: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub unbound_sessions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub ports: Vec<PortAssignment>,
    pub jobs: Vec<Job>,
    /// Unfinished jobs whose worker was gone, now failed.
    pub abandoned: Vec<Job>,
    pub sessions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveReport {
    pub workspace: PathBuf,
    pub unbound_sessions: Vec<String>,
}

/// Records the terminal state of a container start.
///
/// Owned (not borrowed) so it can move into a background task.
#[derive(Clone)]
struct JobFinisher {
    jobs: Arc<JobStore>,
    sessions: Arc<SessionStore>,
    ports: PortAllocator,
    overrides_dir: PathBuf,
}

impl JobFinisher {
    async fn finish(&self, workspace: &Path, result: BerthResult<()>) -> BerthResult<()> {
        match result {
            Ok(()) => {
                self.jobs
                    .record(workspace, JobStatus::Completed, JobDetail::default())
                    .await?;
                for binding in self.sessions.bound_to(workspace).await? {
                    if binding.starting {
                        self.sessions.put(&binding.starting(false)).await?;
                    }
                }
                info!(workspace = %workspace.display(), "Container ready");
                Ok(())
            }
            Err(e) => {
                warn!(workspace = %workspace.display(), error = %e, "Container start failed");
                self.jobs
                    .record(workspace, JobStatus::Failed, JobDetail::error(e.to_string()))
                    .await?;
                self.ports.release(workspace).await?;
                remove_port_override(&self.overrides_dir, workspace).await?;
                Err(e)
            }
        }
    }

    /// Fail an unfinished job that will never finish and free its port.
    async fn abandon(&self, workspace: &Path, reason: String) -> BerthResult<Job> {
        warn!(workspace = %workspace.display(), %reason, "Abandoning container start");
        let job = self
            .jobs
            .record(workspace, JobStatus::Failed, JobDetail::error(reason))
            .await?;
        self.ports.release(workspace).await?;
        remove_port_override(&self.overrides_dir, workspace).await?;
        Ok(job)
    }
}

/// Entry point for every workspace operation.
pub struct Berth {
    config: ResolvedConfig,
    paths: Paths,
    runtime: Arc<dyn ContainerRuntime>,
    ports: PortAllocator,
    provisioner: Provisioner,
    sessions: Arc<SessionStore>,
    jobs: Arc<JobStore>,
    inventory: Inventory,
    router: SessionRouter,
}

impl Berth {
    /// Build every component. Finished jobs past retention are cleaned up.
    pub async fn open(
        config: ResolvedConfig,
        paths: Paths,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        let ports = PortAllocator::from_config(&paths, &config);
        let provisioner = Provisioner::from_config(&paths, &config);
        let sessions = Arc::new(SessionStore::new(&paths.sessions_dir));
        let jobs = Arc::new(JobStore::new(paths.jobs_dir()));
        let inventory = Inventory::new(
            &paths.clones_dir,
            &paths.worktrees_dir,
            Arc::clone(&sessions),
            ports.table().clone(),
        );
        let router = SessionRouter::open(
            Arc::clone(&sessions),
            Arc::clone(&jobs),
            HostAllowList::from_config(&config),
            runtime.as_ref(),
            paths.overrides_dir(),
            Duration::from_secs(config.job_retention_seconds),
        )
        .await
        .with_start_timeout(Duration::from_secs(config.start_timeout_seconds));

        Self {
            config,
            paths,
            runtime,
            ports,
            provisioner,
            sessions,
            jobs,
            inventory,
            router,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn router(&self) -> &SessionRouter {
        &self.router
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    fn start_timeout(&self) -> Duration {
        Duration::from_secs(self.config.start_timeout_seconds)
    }

    /// `runtime.up` under the start timeout. A missed deadline fails the
    /// start; the runtime call itself is left to finish on its own.
    fn up_with_timeout(
        &self,
        workspace: &Path,
        override_cfg: Option<PathBuf>,
    ) -> impl std::future::Future<Output = BerthResult<()>> + Send + 'static {
        let runtime = Arc::clone(&self.runtime);
        let workspace = workspace.to_path_buf();
        let limit = self.start_timeout();
        async move {
            let up = async move { runtime.up(&workspace, override_cfg.as_deref()).await };
            with_watchdog("container start", limit, up).await?
        }
    }

    /// Fail `job` if its worker is gone or it outlived the start timeout.
    async fn reap_if_abandoned(&self, job: &Job) -> BerthResult<Option<Job>> {
        match job.abandoned_reason(chrono::Utc::now(), self.start_timeout()) {
            Some(reason) => Ok(Some(self.finisher().abandon(&job.workspace, reason).await?)),
            None => Ok(None),
        }
    }

    fn finisher(&self) -> JobFinisher {
        JobFinisher {
            jobs: Arc::clone(&self.jobs),
            sessions: Arc::clone(&self.sessions),
            ports: self.ports.clone(),
            overrides_dir: self.paths.overrides_dir(),
        }
    }

    /// Provision a workspace for a branch and, for containers, bring it up.
    #[cfg_attr(feature = "telemetry", instrument(skip(self, request), fields(branch = %request.branch, kind = %request.kind)))]
    pub async fn start(&self, request: StartRequest) -> BerthResult<StartOutcome> {
        if let Some(session) = &request.session {
            validate_session_id(session)?;
        }
        let repo = repo_name(&request.repo_root)?;

        match request.kind {
            WorkspaceKind::Worktree => {
                let outcome = self
                    .provisioner
                    .create_worktree(&request.repo_root, &request.branch)
                    .await?;
                if let Some(session) = &request.session {
                    let binding = SessionBinding::new(
                        session,
                        &outcome.workspace,
                        &repo,
                        &request.branch,
                        WorkspaceKind::Worktree,
                    );
                    self.sessions.put(&binding).await?;
                }
                Ok(StartOutcome {
                    report: StartReport {
                        workspace: outcome.workspace,
                        kind: WorkspaceKind::Worktree,
                        repo,
                        branch: request.branch,
                        created: outcome.created,
                        copied: outcome.copied,
                        port: None,
                        status: None,
                        session: request.session,
                        main_repo: Some(outcome.main_repo),
                    },
                    background: None,
                    needs_worker: false,
                })
            }
            WorkspaceKind::ContainerClone => self.start_container(request, repo).await,
        }
    }

    async fn start_container(&self, request: StartRequest, repo: String) -> BerthResult<StartOutcome> {
        let clone_request =
            CloneRequest::new(&request.repo_root, &request.branch).force(request.force);
        let clone = self.provisioner.create_clone(&clone_request).await?;
        let workspace = clone.workspace.clone();

        let mut report = StartReport {
            workspace: workspace.clone(),
            kind: WorkspaceKind::ContainerClone,
            repo: repo.clone(),
            branch: request.branch.clone(),
            created: clone.created,
            copied: clone.copied,
            port: None,
            status: None,
            session: request.session.clone(),
            main_repo: None,
        };

        // A live start already in flight is joined, not duplicated. A forced
        // start replaces it.
        if let Some(job) = self.jobs.get(&workspace).await? {
            let start_fresh = if job.status.is_terminal() {
                true
            } else if request.force {
                self.finisher()
                    .abandon(&workspace, "replaced by a forced start".to_string())
                    .await?;
                true
            } else {
                self.reap_if_abandoned(&job).await?.is_some()
            };
            if !start_fresh {
                info!(workspace = %workspace.display(), status = %job.status, "Start already in progress");
                report.port = job.port;
                report.status = Some(job.status);
                self.bind_session(&request, &repo, &workspace, clone.provenance.as_ref())
                    .await?;
                return Ok(StartOutcome {
                    report,
                    background: None,
                    needs_worker: false,
                });
            }
        }

        let port = self.ports.acquire(&workspace).await?;
        report.port = Some(port);
        let overrides_dir = self.paths.overrides_dir();
        let override_cfg = match write_port_override(&overrides_dir, &workspace, port).await {
            Ok(path) => path,
            Err(e) => {
                let _ = self.ports.release(&workspace).await;
                return Err(e);
            }
        };

        self.jobs
            .record(&workspace, JobStatus::Pending, JobDetail::port(port))
            .await?;
        self.bind_session(&request, &repo, &workspace, clone.provenance.as_ref())
            .await?;

        let budget = match request.mode {
            StartMode::Detach => {
                report.status = Some(JobStatus::Pending);
                return Ok(StartOutcome {
                    report,
                    background: None,
                    needs_worker: true,
                });
            }
            StartMode::Wait(budget) => budget,
        };

        self.jobs
            .record(
                &workspace,
                JobStatus::Running,
                JobDetail {
                    pid: Some(std::process::id()),
                    ..Default::default()
                },
            )
            .await?;

        let up = self.up_with_timeout(&workspace, Some(override_cfg));

        let finisher = self.finisher();
        let result = match watch_task(budget, up).await {
            Ok(Watched::Finished(result)) => result,
            Ok(Watched::Pending(handle)) => {
                info!(
                    workspace = %workspace.display(),
                    budget_secs = budget.as_secs(),
                    "Container still starting, continuing in background"
                );
                let background = tokio::spawn(async move {
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(BerthError::provisioning("task", e.to_string())),
                    };
                    finisher.finish(&workspace, result).await
                });
                report.status = Some(JobStatus::Running);
                return Ok(StartOutcome {
                    report,
                    background: Some(background),
                    needs_worker: false,
                });
            }
            Err(e) => Err(e),
        };

        finisher.finish(&workspace, result).await?;
        report.status = Some(JobStatus::Completed);
        Ok(StartOutcome {
            report,
            background: None,
            needs_worker: false,
        })
    }

    async fn bind_session(
        &self,
        request: &StartRequest,
        repo: &str,
        workspace: &Path,
        provenance: Option<&Provenance>,
    ) -> BerthResult<()> {
        let Some(session) = &request.session else {
            return Ok(());
        };
        let binding = SessionBinding::new(
            session,
            workspace,
            repo,
            &request.branch,
            WorkspaceKind::ContainerClone,
        )
        .starting(true)
        .with_provenance(provenance.cloned());
        self.sessions.put(&binding).await
    }

    /// Run a pending container start to completion. Used by the detached worker.
    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(workspace = %workspace.display())))]
    pub async fn complete_job(&self, workspace: &Path) -> BerthResult<Job> {
        let job = self
            .jobs
            .get(workspace)
            .await?
            .ok_or_else(|| BerthError::not_found("job", workspace.display().to_string()))?;
        if job.status != JobStatus::Pending {
            return Err(BerthError::InvalidTransition {
                from: job.status.to_string(),
                to: JobStatus::Running.to_string(),
            });
        }

        self.jobs
            .record(
                workspace,
                JobStatus::Running,
                JobDetail {
                    pid: Some(std::process::id()),
                    ..Default::default()
                },
            )
            .await?;

        let override_cfg = override_path(&self.paths.overrides_dir(), workspace);
        let override_cfg = override_cfg.exists().then_some(override_cfg);
        let result = self.up_with_timeout(workspace, override_cfg).await;
        let finished = self.finisher().finish(workspace, result).await;

        let job = self
            .jobs
            .get(workspace)
            .await?
            .ok_or_else(|| BerthError::not_found("job", workspace.display().to_string()))?;
        finished.map(|()| job)
    }

    /// Launch `berth start --job-worker <workspace>` as a detached process.
    pub fn spawn_job_worker(&self, workspace: &Path) -> BerthResult<u32> {
        let exe = std::env::current_exe()?;
        let mut cmd = std::process::Command::new(exe);
        cmd.arg("start")
            .arg("--job-worker")
            .arg(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd.spawn()?;
        debug!(pid = child.id(), workspace = %workspace.display(), "Spawned job worker");
        Ok(child.id())
    }

    /// Resolve a CLI target: an existing directory path, or a branch name.
    pub async fn resolve_target(
        &self,
        target: &str,
        repo: Option<&str>,
    ) -> BerthResult<WorkspaceDescriptor> {
        let as_path = Path::new(target);
        if as_path.is_absolute() || target.starts_with('.') {
            let path = tokio::fs::canonicalize(as_path)
                .await
                .map_err(|_| BerthError::not_found("workspace", target))?;
            return self
                .inventory
                .list_workspaces()
                .await?
                .into_iter()
                .find(|ws| {
                    ws.path == path
                        || std::fs::canonicalize(&ws.path).is_ok_and(|p| p == path)
                })
                .ok_or_else(|| BerthError::not_found("workspace", target));
        }

        self.inventory
            .resolve(target, repo)
            .await?
            .into_result(target)
    }

    /// Bind `session` to the existing workspace for `branch`.
    pub async fn target(
        &self,
        session: &str,
        branch: &str,
        repo: Option<&str>,
    ) -> BerthResult<SessionBinding> {
        validate_session_id(session)?;
        let ws = self.resolve_target(branch, repo).await?;
        let kind = ws
            .kind
            .workspace_kind()
            .ok_or_else(|| BerthError::not_found("workspace", branch))?;

        let starting = match kind {
            WorkspaceKind::ContainerClone => self
                .jobs
                .get(&ws.path)
                .await?
                .is_some_and(|job| job.status != JobStatus::Completed),
            WorkspaceKind::Worktree => false,
        };

        let binding = SessionBinding::new(session, &ws.path, &ws.repo, branch, kind)
            .starting(starting);
        self.sessions.put(&binding).await?;
        info!(session, workspace = %ws.path.display(), "Session targeted");
        Ok(binding)
    }

    /// Unbind `session`.
    pub async fn off(&self, session: &str) -> BerthResult<()> {
        if self.sessions.delete(session).await? {
            Ok(())
        } else {
            Err(BerthError::not_found("session", session))
        }
    }

    /// Path of a workspace, for `cd $(berth cd <target>)`.
    pub async fn cd(&self, target: &str, repo: Option<&str>) -> BerthResult<PathBuf> {
        Ok(self.resolve_target(target, repo).await?.path)
    }

    /// Run `command` in the workspace named by `target`.
    ///
    /// Unlike hook routing, host-classified commands also run from the
    /// workspace directory.
    pub async fn exec(
        &self,
        target: &str,
        repo: Option<&str>,
        command: &str,
        cancel: watch::Receiver<bool>,
    ) -> BerthResult<CommandOutput> {
        let ws = self.resolve_target(target, repo).await?;
        let kind = ws
            .kind
            .workspace_kind()
            .ok_or_else(|| BerthError::not_found("workspace", target))?;
        let binding = SessionBinding::new("exec", &ws.path, &ws.repo, &ws.branch, kind);

        let mut routed = self.router.route_binding(Some(&binding), command).await?;
        if routed.target == RouteTarget::Host && routed.cwd.is_none() {
            routed.cwd = Some(ws.path.clone());
        }
        run_routed(routed, None, cancel).await
    }

    /// Stop a container workspace and release what it holds.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn stop(&self, target: &str, repo: Option<&str>) -> BerthResult<StopReport> {
        let ws = self.resolve_target(target, repo).await?;
        if ws.kind != EntryKind::Clone {
            return Err(BerthError::validation(format!(
                "{} is a worktree; there is no container to stop",
                ws.path.display()
            )));
        }

        self.runtime.stop(&ws.path).await?;
        let port = self.release_container_state(&ws.path).await?;
        let unbound_sessions = self.unbind_all(&ws.path).await?;
        info!(workspace = %ws.path.display(), ?port, "Stopped workspace");

        Ok(StopReport {
            workspace: ws.path,
            port,
            unbound_sessions,
        })
    }

    async fn release_container_state(&self, workspace: &Path) -> BerthResult<Option<u16>> {
        let port = self.ports.release(workspace).await?;
        remove_port_override(&self.paths.overrides_dir(), workspace).await?;
        self.jobs.remove(workspace).await?;
        Ok(port)
    }

    async fn unbind_all(&self, workspace: &Path) -> BerthResult<Vec<String>> {
        let mut unbound = Vec::new();
        for binding in self.sessions.bound_to(workspace).await? {
            self.sessions.delete(&binding.session_id).await?;
            unbound.push(binding.session_id);
        }
        Ok(unbound)
    }

    /// Fail abandoned jobs, release ports of dead workspaces, drop old jobs
    /// and orphaned sessions.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn prune(&self) -> BerthResult<PruneReport> {
        let mut abandoned = Vec::new();
        for job in self.jobs.list().await? {
            if let Some(failed) = self.reap_if_abandoned(&job).await? {
                abandoned.push(failed);
            }
        }

        let ports = self.ports.prune(self.runtime.as_ref()).await?;
        for assignment in &ports {
            remove_port_override(&self.paths.overrides_dir(), &assignment.workspace).await?;
        }
        let jobs = self
            .jobs
            .cleanup(Duration::from_secs(self.config.job_retention_seconds))
            .await?;

        let mut sessions = Vec::new();
        for binding in self.sessions.list().await? {
            let orphaned = match &binding.workspace {
                Some(ws) => !tokio::fs::try_exists(ws).await.unwrap_or(false),
                None => true,
            };
            if orphaned {
                self.sessions.delete(&binding.session_id).await?;
                sessions.push(binding.session_id);
            }
        }

        Ok(PruneReport {
            ports,
            jobs,
            abandoned,
            sessions,
        })
    }

    /// Delete a workspace. Refuses dirty or unpushed work unless `force`.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn remove(
        &self,
        target: &str,
        repo: Option<&str>,
        force: bool,
    ) -> BerthResult<RemoveReport> {
        let ws = self.resolve_target(target, repo).await?;

        if !force {
            let status = workspace_status(&ws.path).await;
            if status.is_git && !(status.clean && status.pushed) {
                return Err(BerthError::validation(format!(
                    "{} has uncommitted or unpushed changes; pass --force to delete anyway",
                    ws.path.display()
                )));
            }
        }

        if ws.kind == EntryKind::Clone {
            if let Err(e) = self.runtime.stop(&ws.path).await {
                warn!(error = %e, "Could not stop container before removal");
            }
            self.release_container_state(&ws.path).await?;
        }

        self.provisioner.remove_workspace(&ws.path).await?;
        let unbound_sessions = self.unbind_all(&ws.path).await?;

        Ok(RemoveReport {
            workspace: ws.path,
            unbound_sessions,
        })
    }
}
