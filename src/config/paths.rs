// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Filesystem locations for Berth state.
//!
//! Environment variables are consulted once, when [`Paths::from_env`] runs.
//! Everything downstream receives explicit paths.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Overrides the config directory (default `~/.berth`).
pub const ENV_CONFIG_DIR: &str = "BERTH_CONFIG_DIR";
/// Overrides the cache directory (default `<cache>/berth`).
pub const ENV_CACHE_DIR: &str = "BERTH_CACHE_DIR";
/// Overrides where clones are created.
pub const ENV_CLONES_DIR: &str = "BERTH_CLONES_DIR";
/// Overrides where worktrees are created.
pub const ENV_WORKTREES_DIR: &str = "BERTH_WORKTREES_DIR";
/// Overrides where session bindings are stored.
pub const ENV_SESSIONS_DIR: &str = "BERTH_SESSIONS_DIR";

/// Default config directory name under the home directory.
pub const DEFAULT_CONFIG_DIR_NAME: &str = ".berth";

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

/// Config directory, honoring `BERTH_CONFIG_DIR`.
pub fn config_dir() -> Option<PathBuf> {
    env_path(ENV_CONFIG_DIR).or_else(|| dirs::home_dir().map(|h| h.join(DEFAULT_CONFIG_DIR_NAME)))
}

/// Resolved state locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub clones_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub sessions_dir: PathBuf,
}

impl Paths {
    /// Resolve paths from the environment, falling back to the home directory.
    pub fn from_env() -> Self {
        let config_dir = config_dir().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_DIR_NAME));
        let cache_dir = env_path(ENV_CACHE_DIR)
            .or_else(|| dirs::cache_dir().map(|c| c.join("berth")))
            .unwrap_or_else(|| config_dir.join("cache"));
        let clones_dir = env_path(ENV_CLONES_DIR).unwrap_or_else(|| config_dir.join("clones"));
        let worktrees_dir =
            env_path(ENV_WORKTREES_DIR).unwrap_or_else(|| config_dir.join("worktrees"));
        let sessions_dir = env_path(ENV_SESSIONS_DIR).unwrap_or_else(|| cache_dir.join("sessions"));

        Self {
            config_dir,
            cache_dir,
            clones_dir,
            worktrees_dir,
            sessions_dir,
        }
    }

    /// Lay every directory out under a single root (tests, sandboxes).
    pub fn under(root: &Path) -> Self {
        let cache_dir = root.join("cache");
        Self {
            config_dir: root.join("config"),
            clones_dir: root.join("clones"),
            worktrees_dir: root.join("worktrees"),
            sessions_dir: cache_dir.join("sessions"),
            cache_dir,
        }
    }

    /// Persisted port table.
    pub fn port_table(&self) -> PathBuf {
        self.cache_dir.join("ports.json")
    }

    /// Lock marker guarding the port table.
    pub fn port_lock(&self) -> PathBuf {
        self.cache_dir.join("ports.lock")
    }

    /// Background job records.
    pub fn jobs_dir(&self) -> PathBuf {
        self.cache_dir.join("jobs")
    }

    /// Ephemeral port-override configs.
    pub fn overrides_dir(&self) -> PathBuf {
        self.cache_dir.join("overrides")
    }
}
