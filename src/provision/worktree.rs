// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Linked worktrees for lightweight, container-free workspaces.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use super::{copy_gitignored, Provisioner, WorktreeOutcome};
use crate::error::{BerthError, BerthResult};
use crate::git;
use crate::telemetry::record_operation;

impl Provisioner {
    /// Create a worktree for `branch` off the primary checkout at `repo_root`.
    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(repo = %repo_root.display())))]
    pub async fn create_worktree(&self, repo_root: &Path, branch: &str) -> BerthResult<WorktreeOutcome> {
        let start = Instant::now();
        let result = self.create_worktree_inner(repo_root, branch).await;
        record_operation("provision.worktree", start.elapsed(), result.is_ok());
        result
    }

    async fn create_worktree_inner(
        &self,
        repo_root: &Path,
        branch: &str,
    ) -> BerthResult<WorktreeOutcome> {
        if git::is_worktree_checkout(repo_root) {
            let hint = match git::worktree_main_repo(repo_root).await {
                Some(main) => format!(" (primary checkout: {})", main.display()),
                None => String::new(),
            };
            return Err(BerthError::validation(format!(
                "{} is itself a worktree; run from the primary checkout{hint}",
                repo_root.display()
            )));
        }

        let target = self.worktree_path(repo_root, branch)?;
        let branch = branch.trim();

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            Self::check_reused_branch(&target, branch).await?;
            debug!(target = %target.display(), "Worktree already exists");
            return Ok(WorktreeOutcome {
                workspace: target,
                created: false,
                main_repo: repo_root.to_path_buf(),
                copied: 0,
            });
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let target_str = target.to_string_lossy().to_string();
        let tracking = format!("origin/{branch}");
        let args: Vec<&str> = if git::local_branch_exists(repo_root, branch).await {
            vec!["worktree", "add", target_str.as_str(), branch]
        } else if git::rev_exists(repo_root, &tracking).await {
            vec!["worktree", "add", "--track", "-b", branch, target_str.as_str(), tracking.as_str()]
        } else {
            vec!["worktree", "add", "-b", branch, target_str.as_str()]
        };

        if let Err(e) = git::git(repo_root, &args).await {
            warn!(error = %e, "git worktree add failed");
            if let Some(parent) = target.parent() {
                let _ = tokio::fs::remove_dir(parent).await;
            }
            return Err(e);
        }

        let copied = copy_gitignored(repo_root, &target, &self.copy_policy).await;
        info!(target = %target.display(), copied, "Created worktree");

        Ok(WorktreeOutcome {
            workspace: target,
            created: true,
            main_repo: repo_root.to_path_buf(),
            copied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CopyPolicy;
    use crate::provision::testing;
    use tempfile::TempDir;

    fn provisioner(root: &Path) -> Provisioner {
        Provisioner::new(
            root.join("clones"),
            root.join("worktrees"),
            CopyPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_create_and_remove_worktree() {
        if !git::is_available().await {
            return;
        }
        let root = TempDir::new().unwrap();
        let repo = root.path().join("src").join("api");
        testing::init_repo(&repo);
        let p = provisioner(root.path());

        let outcome = p.create_worktree(&repo, "feat/auth").await.unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.workspace, root.path().join("worktrees/api/feat-auth"));
        assert!(git::is_worktree_checkout(&outcome.workspace));
        assert_eq!(outcome.copied, 1);
        assert_eq!(
            git::current_branch(&outcome.workspace).await.unwrap(),
            "feat/auth"
        );

        let again = p.create_worktree(&repo, "feat/auth").await.unwrap();
        assert!(!again.created);

        p.remove_workspace(&outcome.workspace).await.unwrap();
        assert!(!outcome.workspace.exists());
        let listed = git::git(&repo, &["worktree", "list"]).await.unwrap();
        assert!(!listed.contains("feat-auth"));
    }

    #[tokio::test]
    async fn test_colliding_branch_names_are_rejected() {
        if !git::is_available().await {
            return;
        }
        let root = TempDir::new().unwrap();
        let repo = root.path().join("src").join("api");
        testing::init_repo(&repo);
        let p = provisioner(root.path());

        let first = p.create_worktree(&repo, "feat/auth").await.unwrap();
        let err = p.create_worktree(&repo, "feat-auth").await.unwrap_err();
        assert!(matches!(err, BerthError::Validation(_)), "{err}");
        assert!(err.to_string().contains("feat/auth"));
        assert_eq!(
            git::current_branch(&first.workspace).await.unwrap(),
            "feat/auth"
        );
    }

    #[tokio::test]
    async fn test_refuses_to_nest_worktrees() {
        if !git::is_available().await {
            return;
        }
        let root = TempDir::new().unwrap();
        let repo = root.path().join("src").join("api");
        testing::init_repo(&repo);
        let p = provisioner(root.path());

        let first = p.create_worktree(&repo, "one").await.unwrap();
        let err = p.create_worktree(&first.workspace, "two").await.unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_INVALID_ARGS);
        assert!(err.to_string().contains("primary checkout"));
    }
}
