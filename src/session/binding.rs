// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session → workspace bindings.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provision::Provenance;

/// How a workspace is isolated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkspaceKind {
    /// Standalone clone run inside a dev container.
    ContainerClone,
    /// Linked worktree run on the host.
    Worktree,
}

impl WorkspaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContainerClone => "container-clone",
            Self::Worktree => "worktree",
        }
    }
}

impl std::fmt::Display for WorkspaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The workspace an agent session's commands run against.
///
/// One per session; writing a new binding replaces the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionBinding {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    pub repo: String,
    pub branch: String,
    pub kind: WorkspaceKind,
    /// Container start still in flight.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub starting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    pub activated_at: DateTime<Utc>,
}

impl SessionBinding {
    pub fn new(
        session_id: impl Into<String>,
        workspace: impl Into<PathBuf>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        kind: WorkspaceKind,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            workspace: Some(workspace.into()),
            repo: repo.into(),
            branch: branch.into(),
            kind,
            starting: false,
            provenance: None,
            activated_at: Utc::now(),
        }
    }

    pub fn starting(mut self, starting: bool) -> Self {
        self.starting = starting;
        self
    }

    pub fn with_provenance(mut self, provenance: Option<Provenance>) -> Self {
        self.provenance = provenance;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_json_shape() {
        let binding = SessionBinding::new(
            "sess-1",
            "/clones/api/feat-x",
            "api",
            "feat/x",
            WorkspaceKind::ContainerClone,
        );
        let value = serde_json::to_value(&binding).unwrap();
        assert_eq!(value["sessionId"], "sess-1");
        assert_eq!(value["kind"], "container-clone");
        assert!(value.get("starting").is_none());

        let starting = serde_json::to_value(binding.starting(true)).unwrap();
        assert_eq!(starting["starting"], true);
    }

    #[test]
    fn test_binding_without_workspace_parses() {
        let binding: SessionBinding = serde_json::from_str(
            r#"{"sessionId":"s","repo":"api","branch":"main","kind":"worktree","activatedAt":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(binding.workspace.is_none());
        assert!(!binding.starting);
    }
}
