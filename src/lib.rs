// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Berth - branch-scoped workspaces for coding agent sessions.
//!
//! Berth gives each agent session its own copy of a repository: either a
//! clone run inside a dev container with a dedicated host port, or a git
//! worktree on the host. A pre-command hook then routes every shell
//! command the agent issues into the workspace bound to its session.
//!
//! # Architecture
//!
//! - [`error`] - Error taxonomy, exit codes and JSON error rendering
//! - [`config`] - Configuration loading, merging and state paths
//! - [`telemetry`] - Tracing subscriber setup and in-process metrics
//! - [`git`] - Async wrapper over the `git` binary
//! - [`store`] - Whole-file JSON state persistence
//! - [`ports`] - Cross-process port allocation under a directory lock
//! - [`container`] - Dev container runtime and port override files
//! - [`provision`] - Clone and worktree creation, gitignored file copying
//! - [`session`] - Session bindings, command classification and routing
//! - [`jobs`] - Persisted container start jobs
//! - [`inventory`] - Workspace listing, status, staleness and lookup
//! - [`lifecycle`] - The [`Berth`] facade behind each CLI command
//! - [`hook`] - Agent host pre-command hook adapter
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use berth::config::{load_config, CliOptions, Paths};
//! use berth::container::DevcontainerCli;
//! use berth::Berth;
//!
//! let config = load_config(&repo_root, CliOptions::default())?;
//! let runtime = Arc::new(DevcontainerCli::from_config(&config));
//! let berth = Berth::open(config, Paths::from_env(), runtime).await;
//! let routed = berth.router().route(Some("session-1"), "npm test").await?;
//! ```

pub mod config;
pub mod container;
pub mod error;
pub mod git;
pub mod hook;
pub mod inventory;
pub mod jobs;
pub mod lifecycle;
pub mod ports;
pub mod provision;
pub mod session;
pub mod store;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use error::{BerthError, BerthResult, ConfigError, Result};
pub use lifecycle::{Berth, StartMode, StartOutcome, StartReport, StartRequest};
pub use session::{CommandClass, RouteTarget, RoutedCommand, SessionBinding, WorkspaceKind};

/// Berth version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
