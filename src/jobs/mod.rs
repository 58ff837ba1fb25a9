// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Background provisioning jobs.
//!
//! A container start can outlive the command that asked for it. The job
//! record lets other processes (the command hook in particular) see how
//! far along it is without waiting.
//!
//! ```text
//! pending -> running -> completed
//!                   \-> failed
//! ```
//!
//! A terminal record is only replaced by a fresh `pending` attempt. An
//! unfinished record whose worker has exited, or that is older than the
//! start timeout, is abandoned and gets moved to `failed`.

mod store;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use store::JobStore;

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a record in state `self` may move to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Completed, Pending)
                | (Failed, Pending)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extra data attached to a status change.
#[derive(Debug, Clone, Default)]
pub struct JobDetail {
    pub port: Option<u16>,
    pub error: Option<String>,
    pub pid: Option<u32>,
}

impl JobDetail {
    pub fn port(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

/// Persisted job record, one per workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: Uuid,
    pub workspace: PathBuf,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Worker process, when the job runs detached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    fn new(workspace: PathBuf, detail: JobDetail) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace,
            status: JobStatus::Pending,
            port: detail.port,
            error: detail.error,
            pid: detail.pid,
            created_at: now,
            updated_at: now,
        }
    }

    /// Seconds since the last status change.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_seconds()
    }

    /// Why an unfinished job can no longer reach a terminal state, if so.
    pub fn abandoned_reason(&self, now: DateTime<Utc>, limit: Duration) -> Option<String> {
        if self.status.is_terminal() {
            return None;
        }
        if let Some(pid) = self.pid {
            if !process_alive(pid) {
                return Some(format!("worker process {pid} exited before the start finished"));
            }
        }
        if self.age_secs(now) > limit.as_secs() as i64 {
            return Some(format!("start did not finish within {}s", limit.as_secs()));
        }
        None
    }
}

/// Whether a process with this id exists.
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    std::path::Path::new("/proc").join(pid.to_string()).exists()
}

/// Whether a process with this id exists.
#[cfg(all(unix, not(target_os = "linux")))]
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(true)
}

/// Whether a process with this id exists. Unknown here, so assume it does.
#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_are_monotonic() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));

        // A fresh attempt restarts a finished job
        assert!(Completed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(Pending));
    }

    fn running_job(pid: Option<u32>, age_secs: i64) -> Job {
        let mut job = Job::new(PathBuf::from("/ws"), JobDetail::default());
        job.status = JobStatus::Running;
        job.pid = pid;
        job.updated_at = Utc::now() - chrono::Duration::seconds(age_secs);
        job
    }

    #[test]
    fn test_abandoned_when_worker_is_gone() {
        let limit = Duration::from_secs(600);
        let now = Utc::now();

        let live = running_job(Some(std::process::id()), 5);
        assert_eq!(live.abandoned_reason(now, limit), None);

        let dead = running_job(Some(999_999), 5);
        let reason = dead.abandoned_reason(now, limit).unwrap();
        assert!(reason.contains("999999"), "{reason}");
    }

    #[test]
    fn test_abandoned_after_limit() {
        let limit = Duration::from_secs(600);
        let now = Utc::now();

        assert_eq!(running_job(None, 30).abandoned_reason(now, limit), None);
        assert!(running_job(None, 601).abandoned_reason(now, limit).is_some());

        let mut finished = running_job(Some(999_999), 10_000);
        finished.status = JobStatus::Failed;
        assert_eq!(finished.abandoned_reason(now, limit), None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Running).unwrap(),
            "\"running\""
        );
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
    }
}
