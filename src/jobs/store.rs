// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One JSON file per job, keyed by workspace.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{Job, JobDetail, JobStatus};
use crate::error::{BerthError, BerthResult};
use crate::store;

/// Directory of job records.
#[derive(Debug, Clone)]
pub struct JobStore {
    dir: PathBuf,
}

impl JobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, workspace: &Path) -> PathBuf {
        self.dir
            .join(format!("{}.json", store::workspace_key(workspace)))
    }

    pub async fn get(&self, workspace: &Path) -> BerthResult<Option<Job>> {
        store::read_json(&self.path_for(workspace)).await
    }

    /// Move the job for `workspace` to `status`.
    ///
    /// Creating a record requires `Pending`; a terminal record is replaced
    /// by a new `Pending` one. Anything else that is not a forward step is
    /// rejected with `InvalidTransition`.
    pub async fn record(
        &self,
        workspace: &Path,
        status: JobStatus,
        detail: JobDetail,
    ) -> BerthResult<Job> {
        let existing = self.get(workspace).await?;

        let job = match existing {
            None if status == JobStatus::Pending => Job::new(workspace.to_path_buf(), detail),
            None => {
                return Err(BerthError::InvalidTransition {
                    from: "none".to_string(),
                    to: status.to_string(),
                })
            }
            Some(prev) if !prev.status.can_transition_to(status) => {
                return Err(BerthError::InvalidTransition {
                    from: prev.status.to_string(),
                    to: status.to_string(),
                })
            }
            Some(_) if status == JobStatus::Pending => Job::new(workspace.to_path_buf(), detail),
            Some(mut job) => {
                job.status = status;
                job.updated_at = Utc::now();
                if detail.port.is_some() {
                    job.port = detail.port;
                }
                if detail.error.is_some() {
                    job.error = detail.error;
                }
                if detail.pid.is_some() {
                    job.pid = detail.pid;
                }
                job
            }
        };

        store::write_json(&self.path_for(workspace), &job).await?;
        debug!(workspace = %workspace.display(), status = %job.status, "Recorded job");
        Ok(job)
    }

    /// Move an abandoned job for `workspace` to `failed`.
    ///
    /// Returns the failed record, or `None` when the job is missing,
    /// finished, or still making progress.
    pub async fn fail_if_abandoned(
        &self,
        workspace: &Path,
        limit: Duration,
    ) -> BerthResult<Option<Job>> {
        let Some(job) = self.get(workspace).await? else {
            return Ok(None);
        };
        let Some(reason) = job.abandoned_reason(Utc::now(), limit) else {
            return Ok(None);
        };
        warn!(workspace = %workspace.display(), %reason, "Abandoned job");
        let failed = self
            .record(workspace, JobStatus::Failed, JobDetail::error(reason))
            .await?;
        Ok(Some(failed))
    }

    pub async fn remove(&self, workspace: &Path) -> BerthResult<bool> {
        store::remove_file(&self.path_for(workspace)).await
    }

    /// All readable job records, newest first.
    pub async fn list(&self) -> BerthResult<Vec<Job>> {
        let mut jobs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(jobs),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(job) = store::read_json::<Job>(&path).await? {
                jobs.push(job);
            }
        }
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(jobs)
    }

    /// Delete terminal records older than `max_age`. Returns what was removed.
    pub async fn cleanup(&self, max_age: Duration) -> BerthResult<Vec<Job>> {
        let now = Utc::now();
        let max_age = max_age.as_secs() as i64;
        let mut removed = Vec::new();

        for job in self.list().await? {
            if job.status.is_terminal() && job.age_secs(now) > max_age {
                self.remove(&job.workspace).await?;
                removed.push(job);
            }
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "Cleaned up finished jobs");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_full_lifecycle() {
        let dir = TempDir::new().unwrap();
        let jobs = JobStore::new(dir.path());
        let ws = Path::new("/clones/api/feat-x");

        assert!(jobs.get(ws).await.unwrap().is_none());

        let pending = jobs
            .record(ws, JobStatus::Pending, JobDetail::port(4100))
            .await
            .unwrap();
        let running = jobs
            .record(ws, JobStatus::Running, JobDetail::default())
            .await
            .unwrap();
        assert_eq!(running.id, pending.id);
        assert_eq!(running.port, Some(4100));

        let done = jobs
            .record(ws, JobStatus::Completed, JobDetail::default())
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(jobs.get(ws).await.unwrap().unwrap(), done);
    }

    #[tokio::test]
    async fn test_rejects_backwards_and_orphan_transitions() {
        let dir = TempDir::new().unwrap();
        let jobs = JobStore::new(dir.path());
        let ws = Path::new("/clones/api/feat-y");

        let err = jobs
            .record(ws, JobStatus::Running, JobDetail::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::InvalidTransition { .. }));

        jobs.record(ws, JobStatus::Pending, JobDetail::default())
            .await
            .unwrap();
        jobs.record(ws, JobStatus::Failed, JobDetail::error("boom"))
            .await
            .unwrap();
        let err = jobs
            .record(ws, JobStatus::Completed, JobDetail::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BerthError::InvalidTransition { .. }));
        assert_eq!(
            jobs.get(ws).await.unwrap().unwrap().error.as_deref(),
            Some("boom")
        );
    }

    #[tokio::test]
    async fn test_fresh_attempt_replaces_terminal_record() {
        let dir = TempDir::new().unwrap();
        let jobs = JobStore::new(dir.path());
        let ws = Path::new("/clones/api/retry");

        let first = jobs
            .record(ws, JobStatus::Pending, JobDetail::default())
            .await
            .unwrap();
        jobs.record(ws, JobStatus::Failed, JobDetail::error("no docker"))
            .await
            .unwrap();

        let retry = jobs
            .record(ws, JobStatus::Pending, JobDetail::port(4102))
            .await
            .unwrap();
        assert_ne!(retry.id, first.id);
        assert_eq!(retry.error, None);
        assert_eq!(retry.port, Some(4102));
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_terminal_jobs() {
        let dir = TempDir::new().unwrap();
        let jobs = JobStore::new(dir.path());
        let done = Path::new("/clones/a/done");
        let active = Path::new("/clones/a/active");

        jobs.record(done, JobStatus::Pending, JobDetail::default())
            .await
            .unwrap();
        jobs.record(done, JobStatus::Completed, JobDetail::default())
            .await
            .unwrap();
        jobs.record(active, JobStatus::Pending, JobDetail::default())
            .await
            .unwrap();

        // Within retention nothing goes
        assert!(jobs.cleanup(Duration::from_secs(3600)).await.unwrap().is_empty());

        // Backdate the finished job
        let mut old = jobs.get(done).await.unwrap().unwrap();
        old.updated_at = Utc::now() - chrono::Duration::hours(2);
        store::write_json(&jobs.path_for(done), &old).await.unwrap();

        let removed = jobs.cleanup(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].workspace, done);
        assert!(jobs.get(done).await.unwrap().is_none());
        assert!(jobs.get(active).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fail_if_abandoned_dead_worker() {
        let dir = TempDir::new().unwrap();
        let jobs = JobStore::new(dir.path());
        let ws = Path::new("/clones/api/crashed");
        let limit = Duration::from_secs(3600);

        jobs.record(ws, JobStatus::Pending, JobDetail::port(4100))
            .await
            .unwrap();
        let pid = |pid| JobDetail {
            pid: Some(pid),
            ..Default::default()
        };
        jobs.record(ws, JobStatus::Running, pid(999_999)).await.unwrap();

        let failed = jobs.fail_if_abandoned(ws, limit).await.unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.error.unwrap().contains("exited"));

        // Already terminal: nothing more to do
        assert!(jobs.fail_if_abandoned(ws, limit).await.unwrap().is_none());

        // A live worker is left alone
        jobs.record(ws, JobStatus::Pending, JobDetail::default())
            .await
            .unwrap();
        jobs.record(ws, JobStatus::Running, pid(std::process::id()))
            .await
            .unwrap();
        assert!(jobs.fail_if_abandoned(ws, limit).await.unwrap().is_none());
    }
}
