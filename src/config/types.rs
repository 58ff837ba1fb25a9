// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! Defines the structure of partial (on-disk) and resolved configuration,
//! supporting JSON and YAML formats.

use serde::{Deserialize, Serialize};

/// Default first port handed to containerized workspaces.
pub const DEFAULT_PORT_RANGE_START: u16 = 4100;
/// Default last port (inclusive).
pub const DEFAULT_PORT_RANGE_END: u16 = 4199;
/// Default age after which a port-table lock marker is force-removed.
pub const DEFAULT_LOCK_STALE_SECONDS: u64 = 60;
/// Default wait between lock attempts.
pub const DEFAULT_LOCK_RETRY_MILLIS: u64 = 50;
/// Default inactivity threshold for `berth list --stale`.
pub const DEFAULT_STALE_DAYS: u64 = 7;
/// Default retention for finished background jobs.
pub const DEFAULT_JOB_RETENTION_SECONDS: u64 = 3600;
/// Default time `start` blocks before handing off to a background job.
pub const DEFAULT_INTERACTIVE_BUDGET_SECONDS: u64 = 20;
/// Default limit on a single container start.
pub const DEFAULT_START_TIMEOUT_SECONDS: u64 = 1800;
/// Largest gitignored file copied into a new workspace.
pub const DEFAULT_COPY_MAX_FILE_BYTES: u64 = 100 * 1024;
/// Directories with more ignored files than this are skipped entirely.
pub const DEFAULT_COPY_MAX_FILES_PER_DIR: usize = 10;

/// Berth configuration as written in a config file.
///
/// Every field is optional; missing fields fall through to the next layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BerthConfig {
    /// Inclusive port range for containerized workspaces
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range: Option<PortRange>,

    /// Age in seconds after which a lock marker is considered abandoned
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_stale_seconds: Option<u64>,

    /// Wait between lock attempts in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_retry_millis: Option<u64>,

    /// Days of inactivity before a workspace is reported stale
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_days: Option<u64>,

    /// Seconds a finished job record is kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_retention_seconds: Option<u64>,

    /// Seconds `start` waits for a container before backgrounding it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interactive_budget_seconds: Option<u64>,

    /// Seconds a container start may take before it is recorded as failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_timeout_seconds: Option<u64>,

    /// Extra commands that always run on the host
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_commands: Option<Vec<String>>,

    /// Built-in host commands that should run in the workspace instead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_commands: Option<Vec<String>>,

    /// Gitignored file copy policy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub copy: Option<CopyPolicyConfig>,

    /// Dev container CLI binary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_cli: Option<String>,

    /// Container engine CLI binary used for liveness checks
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_cli: Option<String>,
}

/// Inclusive port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    /// Whether `port` lies in the range.
    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Number of ports in the range.
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE_START, DEFAULT_PORT_RANGE_END)
    }
}

/// Copy policy as written in a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPolicyConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_file_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_files_per_dir: Option<usize>,
}

/// Resolved copy policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyPolicy {
    pub max_file_bytes: u64,
    pub max_files_per_dir: usize,
}

impl Default for CopyPolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_COPY_MAX_FILE_BYTES,
            max_files_per_dir: DEFAULT_COPY_MAX_FILES_PER_DIR,
        }
    }
}

/// Fully resolved configuration with defaults applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub port_range: PortRange,
    pub lock_stale_seconds: u64,
    pub lock_retry_millis: u64,
    pub stale_days: u64,
    pub job_retention_seconds: u64,
    pub interactive_budget_seconds: u64,
    pub start_timeout_seconds: u64,
    pub host_commands: Vec<String>,
    pub workspace_commands: Vec<String>,
    pub copy: CopyPolicy,
    pub container_cli: String,
    pub docker_cli: String,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            port_range: PortRange::default(),
            lock_stale_seconds: DEFAULT_LOCK_STALE_SECONDS,
            lock_retry_millis: DEFAULT_LOCK_RETRY_MILLIS,
            stale_days: DEFAULT_STALE_DAYS,
            job_retention_seconds: DEFAULT_JOB_RETENTION_SECONDS,
            interactive_budget_seconds: DEFAULT_INTERACTIVE_BUDGET_SECONDS,
            start_timeout_seconds: DEFAULT_START_TIMEOUT_SECONDS,
            host_commands: Vec::new(),
            workspace_commands: Vec::new(),
            copy: CopyPolicy::default(),
            container_cli: "devcontainer".to_string(),
            docker_cli: "docker".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_range_len() {
        assert_eq!(PortRange::new(4100, 4199).len(), 100);
        assert_eq!(PortRange::new(5000, 5000).len(), 1);
        assert!(PortRange::new(10, 9).is_empty());
        assert!(PortRange::default().contains(4150));
        assert!(!PortRange::default().contains(4200));
    }

    #[test]
    fn test_partial_config_camel_case() {
        let config: BerthConfig = serde_json::from_str(
            r#"{"portRange": {"start": 5000, "end": 5010}, "lockStaleSeconds": 5, "copy": {"maxFileBytes": 10}}"#,
        )
        .unwrap();
        assert_eq!(config.port_range, Some(PortRange::new(5000, 5010)));
        assert_eq!(config.lock_stale_seconds, Some(5));
        assert_eq!(config.copy.unwrap().max_file_bytes, Some(10));
    }

    #[test]
    fn test_resolved_defaults() {
        let config = ResolvedConfig::default();
        assert_eq!(config.lock_stale_seconds, 60);
        assert_eq!(config.stale_days, 7);
        assert_eq!(config.start_timeout_seconds, 1800);
        assert_eq!(config.copy.max_file_bytes, 102_400);
        assert_eq!(config.copy.max_files_per_dir, 10);
    }
}
