// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persisted workspace → port table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::BerthResult;
use crate::store;

/// Map of absolute workspace path to assigned port.
pub type PortMap = BTreeMap<String, u16>;

/// JSON file holding every port assignment.
///
/// Reads and writes always cover the whole file. Callers that mutate must
/// hold the allocator's [`DirLock`](super::DirLock) across load and save.
#[derive(Debug, Clone)]
pub struct PortTable {
    path: PathBuf,
}

impl PortTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> BerthResult<PortMap> {
        Ok(store::read_json(&self.path).await?.unwrap_or_default())
    }

    pub async fn save(&self, map: &PortMap) -> BerthResult<()> {
        store::write_json(&self.path, map).await
    }

    /// Port currently assigned to `workspace`, without taking the lock.
    pub async fn get(&self, workspace: &Path) -> BerthResult<Option<u16>> {
        let map = self.load().await?;
        Ok(map.get(workspace.to_string_lossy().as_ref()).copied())
    }
}
