// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Port assignment for containerized workspaces.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, instrument};

use super::{DirLock, PortMap, PortTable};
use crate::config::{Paths, PortRange, ResolvedConfig};
use crate::container::ContainerRuntime;
use crate::error::{BerthError, BerthResult};
use crate::telemetry::record_operation;

/// One entry of the port table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortAssignment {
    pub workspace: PathBuf,
    pub port: u16,
}

/// Hands out ports from an inclusive range, one per workspace path.
///
/// Every read-modify-write of the table runs under the directory lock,
/// which makes allocation linearizable across processes.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    table: PortTable,
    lock: DirLock,
    range: PortRange,
}

impl PortAllocator {
    pub fn new(table: PortTable, lock: DirLock, range: PortRange) -> Self {
        Self { table, lock, range }
    }

    /// Allocator over the standard state locations.
    pub fn from_config(paths: &Paths, config: &ResolvedConfig) -> Self {
        Self::new(
            PortTable::new(paths.port_table()),
            DirLock::new(
                paths.port_lock(),
                Duration::from_secs(config.lock_stale_seconds),
                Duration::from_millis(config.lock_retry_millis),
            ),
            config.port_range,
        )
    }

    pub fn range(&self) -> PortRange {
        self.range
    }

    pub fn table(&self) -> &PortTable {
        &self.table
    }

    /// Port for `workspace`, assigning the lowest free one if it has none.
    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(workspace = %workspace.display())))]
    pub async fn acquire(&self, workspace: &Path) -> BerthResult<u16> {
        let start = Instant::now();
        let result = self.acquire_locked(workspace).await;
        record_operation("port.acquire", start.elapsed(), result.is_ok());
        result
    }

    async fn acquire_locked(&self, workspace: &Path) -> BerthResult<u16> {
        let key = table_key(workspace)?;
        let _guard = self.lock.acquire().await?;
        let mut map = self.table.load().await?;

        if let Some(&port) = map.get(&key) {
            debug!(port, "Reusing existing port");
            return Ok(port);
        }

        let port = lowest_free(&map, self.range).ok_or(BerthError::ExhaustedRange {
            start: self.range.start,
            end: self.range.end,
        })?;

        map.insert(key, port);
        self.table.save(&map).await?;
        info!(port, "Assigned port");
        Ok(port)
    }

    /// Drop the assignment for `workspace`, returning the port it held.
    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(workspace = %workspace.display())))]
    pub async fn release(&self, workspace: &Path) -> BerthResult<Option<u16>> {
        let key = table_key(workspace)?;
        let _guard = self.lock.acquire().await?;
        let mut map = self.table.load().await?;

        let released = map.remove(&key);
        if released.is_some() {
            self.table.save(&map).await?;
            debug!(port = ?released, "Released port");
        }
        Ok(released)
    }

    /// Current assignments, ordered by workspace path.
    pub async fn assignments(&self) -> BerthResult<Vec<PortAssignment>> {
        Ok(to_assignments(self.table.load().await?))
    }

    /// Remove entries whose workspace is gone or whose container is down.
    ///
    /// Liveness probes run outside the lock; only entries that still hold
    /// the probed port when the lock is taken are removed.
    #[cfg_attr(feature = "telemetry", instrument(skip_all))]
    pub async fn prune(&self, runtime: &dyn ContainerRuntime) -> BerthResult<Vec<PortAssignment>> {
        let start = Instant::now();
        let result = self.prune_inner(runtime).await;
        record_operation("port.prune", start.elapsed(), result.is_ok());
        result
    }

    async fn prune_inner(&self, runtime: &dyn ContainerRuntime) -> BerthResult<Vec<PortAssignment>> {
        let mut dead = Vec::new();
        for assignment in self.assignments().await? {
            let alive = tokio::fs::try_exists(&assignment.workspace)
                .await
                .unwrap_or(false)
                && runtime.is_running(&assignment.workspace).await;
            if !alive {
                dead.push(assignment);
            }
        }
        if dead.is_empty() {
            return Ok(dead);
        }

        let _guard = self.lock.acquire().await?;
        let mut map = self.table.load().await?;
        let mut pruned = Vec::new();
        for assignment in dead {
            let key = assignment.workspace.to_string_lossy().into_owned();
            if map.get(&key) == Some(&assignment.port) {
                map.remove(&key);
                pruned.push(assignment);
            }
        }
        if !pruned.is_empty() {
            self.table.save(&map).await?;
            info!(count = pruned.len(), "Pruned port assignments");
        }
        Ok(pruned)
    }
}

fn table_key(workspace: &Path) -> BerthResult<String> {
    if !workspace.is_absolute() {
        return Err(BerthError::validation(format!(
            "workspace path must be absolute: {}",
            workspace.display()
        )));
    }
    Ok(workspace.to_string_lossy().into_owned())
}

fn lowest_free(map: &PortMap, range: PortRange) -> Option<u16> {
    (range.start..=range.end).find(|port| !map.values().any(|used| used == port))
}

fn to_assignments(map: PortMap) -> Vec<PortAssignment> {
    map.into_iter()
        .map(|(workspace, port)| PortAssignment {
            workspace: PathBuf::from(workspace),
            port,
        })
        .collect()
}
