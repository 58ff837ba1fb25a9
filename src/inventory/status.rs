// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Git cleanliness of a workspace.

use std::path::Path;

use serde::Serialize;

use crate::git;

/// Whether a workspace is safe to throw away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    /// False for directories that never finished initializing.
    pub is_git: bool,
    /// No uncommitted or untracked changes.
    pub clean: bool,
    /// No local commits missing from the remote.
    pub pushed: bool,
    /// Commits ahead of the upstream (or of all remotes when no upstream).
    pub ahead: u32,
}

pub async fn workspace_status(path: &Path) -> WorkspaceStatus {
    let inside = git::git(path, &["rev-parse", "--is-inside-work-tree"]).await;
    if !matches!(inside.as_deref(), Ok("true")) {
        return WorkspaceStatus::default();
    }

    let clean = git::git(path, &["--no-optional-locks", "status", "--porcelain"])
        .await
        .map(|out| out.is_empty())
        .unwrap_or(false);

    let ahead = match git::git(path, &["rev-list", "--count", "@{u}..HEAD"]).await {
        Ok(count) => count.parse().unwrap_or(0),
        Err(_) => git::git(path, &["rev-list", "--count", "HEAD", "--not", "--remotes"])
            .await
            .ok()
            .and_then(|count| count.parse().ok())
            .unwrap_or(0),
    };

    WorkspaceStatus {
        is_git: true,
        clean,
        pushed: ahead == 0,
        ahead,
    }
}
