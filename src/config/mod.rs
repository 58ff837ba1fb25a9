// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for Berth.
//!
//! Handles loading, merging, and validation of configuration from multiple sources:
//! - Global config: ~/.berth/config.json (or `$BERTH_CONFIG_DIR/config.json`)
//! - Repository config: .berth.json, .berth/config.json, or berth.config.json
//! - Local config: .berth.local.json (gitignored, for personal overrides)
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > local > repository > global > defaults).
//! State locations are resolved separately by [`Paths`].

mod loader;
mod merger;
mod paths;
mod types;

pub use loader::{
    get_global_config_path, load_config_file, load_global_config, load_local_config,
    load_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{default_config, merge_config, validate_config, CliOptions};

pub use paths::{
    config_dir, Paths, ENV_CACHE_DIR, ENV_CLONES_DIR, ENV_CONFIG_DIR, ENV_SESSIONS_DIR,
    ENV_WORKTREES_DIR,
};

pub use types::{
    BerthConfig, CopyPolicy, CopyPolicyConfig, PortRange, ResolvedConfig,
    DEFAULT_COPY_MAX_FILES_PER_DIR, DEFAULT_COPY_MAX_FILE_BYTES, DEFAULT_LOCK_STALE_SECONDS,
    DEFAULT_STALE_DAYS, DEFAULT_START_TIMEOUT_SECONDS,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load, merge and validate all configuration sources for a repository.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    let config = merge_config(global, workspace, local, cli_options);
    validate_config(&config)?;
    Ok(config)
}
