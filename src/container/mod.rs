// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Container runtime integration.
//!
//! The runtime itself is an external tool. [`ContainerRuntime`] is the seam
//! the rest of the crate talks to; [`DevcontainerCli`] drives the
//! `devcontainer` and `docker` binaries.

mod devcontainer;
mod overrides;
mod watchdog;

use std::path::Path;

use async_trait::async_trait;

use crate::error::BerthResult;

pub use devcontainer::DevcontainerCli;
pub use overrides::{override_path, remove_port_override, write_port_override, OVERRIDE_FILE};
pub use watchdog::{watch, with_watchdog, Watched};

/// Operations Berth needs from a container runtime.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Build (if needed) and start the container for `workspace`.
    async fn up<'a>(&self, workspace: &Path, override_config: Option<&'a Path>) -> BerthResult<()>;

    /// Whether a container for `workspace` is currently running.
    async fn is_running(&self, workspace: &Path) -> bool;

    /// Stop and remove every container for `workspace`.
    async fn stop(&self, workspace: &Path) -> BerthResult<()>;

    /// Program and subcommand that run a command inside the container,
    /// e.g. `["devcontainer", "exec"]`.
    fn exec_prefix(&self) -> Vec<String>;
}
