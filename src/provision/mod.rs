// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Workspace provisioning: clones, worktrees and their removal.
//!
//! Layout is always two levels deep:
//!
//! ```text
//! <clones_dir>/<repo>/<branch>      full clone, `.git` directory
//! <worktrees_dir>/<repo>/<branch>   linked worktree, `.git` pointer file
//! ```

mod clone;
mod gitignored;
mod naming;
mod worktree;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{CopyPolicy, Paths, ResolvedConfig};
use crate::error::{BerthError, BerthResult};
use crate::git;

pub use clone::CloneRequest;
pub use gitignored::{copy_candidates, copy_gitignored, LOCKFILES};
pub use naming::{branch_segment, repo_name, sanitize_branch_name};

/// Where a workspace's contents came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    /// `remote` or `local`.
    pub source_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Result of creating (or finding) a clone.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloneOutcome {
    pub workspace: PathBuf,
    pub created: bool,
    pub copied: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
}

/// Result of creating (or finding) a worktree.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeOutcome {
    pub workspace: PathBuf,
    pub created: bool,
    pub main_repo: PathBuf,
    pub copied: usize,
}

/// Creates and removes workspaces under the configured roots.
#[derive(Debug, Clone)]
pub struct Provisioner {
    clones_dir: PathBuf,
    worktrees_dir: PathBuf,
    copy_policy: CopyPolicy,
}

impl Provisioner {
    pub fn new(
        clones_dir: impl Into<PathBuf>,
        worktrees_dir: impl Into<PathBuf>,
        copy_policy: CopyPolicy,
    ) -> Self {
        Self {
            clones_dir: clones_dir.into(),
            worktrees_dir: worktrees_dir.into(),
            copy_policy,
        }
    }

    pub fn from_config(paths: &Paths, config: &ResolvedConfig) -> Self {
        Self::new(&paths.clones_dir, &paths.worktrees_dir, config.copy)
    }

    pub fn clones_dir(&self) -> &Path {
        &self.clones_dir
    }

    pub fn worktrees_dir(&self) -> &Path {
        &self.worktrees_dir
    }

    /// `<clones_dir>/<repo>/<branch>`
    pub fn clone_path(&self, repo_root: &Path, branch: &str) -> BerthResult<PathBuf> {
        Ok(self
            .clones_dir
            .join(repo_name(repo_root)?)
            .join(branch_segment(branch)?))
    }

    /// `<worktrees_dir>/<repo>/<branch>`
    pub fn worktree_path(&self, repo_root: &Path, branch: &str) -> BerthResult<PathBuf> {
        Ok(self
            .worktrees_dir
            .join(repo_name(repo_root)?)
            .join(branch_segment(branch)?))
    }

    /// Delete a clone or worktree from disk.
    ///
    /// Worktrees are detached from their main repository first so git does
    /// not keep a dangling registration.
    #[cfg_attr(feature = "telemetry", tracing::instrument(skip(self), fields(path = %path.display())))]
    pub async fn remove_workspace(&self, path: &Path) -> BerthResult<()> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(BerthError::not_found("workspace", path.display().to_string()));
        }

        if git::is_worktree_checkout(path) {
            let main_repo = git::worktree_main_repo(path).await;
            let path_str = path.to_string_lossy().to_string();
            let removed = match &main_repo {
                Some(main) => match git::git(main, &["worktree", "remove", "--force", &path_str]).await {
                    Ok(_) => true,
                    Err(e) => {
                        warn!("Failed to remove worktree via git: {}", e);
                        false
                    }
                },
                None => false,
            };
            if !removed {
                if tokio::fs::try_exists(path).await.unwrap_or(false) {
                    tokio::fs::remove_dir_all(path).await?;
                }
                if let Some(main) = &main_repo {
                    let _ = git::git(main, &["worktree", "prune"]).await;
                }
            }
        } else {
            tokio::fs::remove_dir_all(path).await?;
        }
        info!(path = %path.display(), "Removed workspace");

        self.remove_empty_repo_dir(path).await;
        Ok(())
    }

    /// Refuse to reuse `target` for `branch` when it holds a different
    /// branch that sanitizes to the same directory name.
    async fn check_reused_branch(target: &Path, branch: &str) -> BerthResult<()> {
        match git::current_branch(target).await {
            Ok(current) if !current.is_empty() && current != branch => {
                Err(BerthError::validation(format!(
                    "{} already holds branch '{current}', which maps to the same directory as '{branch}'",
                    target.display()
                )))
            }
            _ => Ok(()),
        }
    }

    /// Drop `<root>/<repo>` once its last branch is gone.
    async fn remove_empty_repo_dir(&self, workspace: &Path) {
        let Some(repo_dir) = workspace.parent() else {
            return;
        };
        let managed = [&self.clones_dir, &self.worktrees_dir]
            .iter()
            .any(|root| repo_dir.parent() == Some(root.as_path()));
        if managed {
            // Fails harmlessly when other branches remain.
            let _ = tokio::fs::remove_dir(repo_dir).await;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provisioner(root: &Path) -> Provisioner {
        Provisioner::new(
            root.join("clones"),
            root.join("worktrees"),
            CopyPolicy::default(),
        )
    }

    #[test]
    fn test_layout_paths() {
        let p = provisioner(Path::new("/b"));
        assert_eq!(
            p.clone_path(Path::new("/src/api"), "feat/auth").unwrap(),
            PathBuf::from("/b/clones/api/feat-auth")
        );
        assert_eq!(
            p.worktree_path(Path::new("/src/api"), "main").unwrap(),
            PathBuf::from("/b/worktrees/api/main")
        );
        assert!(p.clone_path(Path::new("/src/api"), "").is_err());
    }

    #[tokio::test]
    async fn test_remove_plain_clone_dir_cleans_repo_parent() {
        let root = TempDir::new().unwrap();
        let p = provisioner(root.path());
        let ws = root.path().join("clones/api/feat-x");
        std::fs::create_dir_all(ws.join(".git")).unwrap();

        p.remove_workspace(&ws).await.unwrap();
        assert!(!ws.exists());
        assert!(!root.path().join("clones/api").exists());
        assert!(root.path().join("clones").exists());
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let root = TempDir::new().unwrap();
        let p = provisioner(root.path());
        let err = p
            .remove_workspace(&root.path().join("clones/api/none"))
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_NOT_FOUND);
    }
}
