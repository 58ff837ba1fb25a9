// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Self-contained clones for container workspaces.
//!
//! Containers only see the workspace folder, so a worktree (whose `.git`
//! points outside it) will not do. Clones borrow objects from the local
//! repository while cloning and then dissociate, leaving a standalone repo.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use super::{copy_gitignored, CloneOutcome, Provenance, Provisioner};
use crate::error::{BerthError, BerthResult};
use crate::git;
use crate::telemetry::record_operation;

/// Parameters for [`Provisioner::create_clone`].
#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub repo_root: PathBuf,
    pub branch: String,
    /// Destroy an existing clone at the target first.
    pub force: bool,
}

impl CloneRequest {
    pub fn new(repo_root: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            repo_root: repo_root.into(),
            branch: branch.into(),
            force: false,
        }
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl Provisioner {
    /// Create a clone of `branch`, or return the existing one untouched.
    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(repo = %request.repo_root.display(), branch = %request.branch)))]
    pub async fn create_clone(&self, request: &CloneRequest) -> BerthResult<CloneOutcome> {
        let start = Instant::now();
        let result = self.create_clone_inner(request).await;
        record_operation("provision.clone", start.elapsed(), result.is_ok());
        result
    }

    async fn create_clone_inner(&self, request: &CloneRequest) -> BerthResult<CloneOutcome> {
        let target = self.clone_path(&request.repo_root, &request.branch)?;
        let branch = request.branch.trim();

        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            if !request.force {
                Self::check_reused_branch(&target, branch).await?;
                debug!(target = %target.display(), "Clone already exists");
                return Ok(CloneOutcome {
                    workspace: target,
                    created: false,
                    copied: 0,
                    provenance: None,
                });
            }
            info!(target = %target.display(), "Replacing existing clone");
            tokio::fs::remove_dir_all(&target).await?;
        }

        let parent = target
            .parent()
            .ok_or_else(|| BerthError::validation("clone target has no parent directory"))?;
        tokio::fs::create_dir_all(parent).await?;

        let provenance = match self.clone_into(&request.repo_root, branch, &target).await {
            Ok(provenance) => provenance,
            Err(e) => {
                warn!(target = %target.display(), error = %e, "Clone failed, cleaning up");
                let _ = tokio::fs::remove_dir_all(&target).await;
                return Err(e);
            }
        };

        let copied = copy_gitignored(&request.repo_root, &target, &self.copy_policy).await;
        info!(target = %target.display(), copied, "Created clone");

        Ok(CloneOutcome {
            workspace: target,
            created: true,
            copied,
            provenance: Some(provenance),
        })
    }

    async fn clone_into(
        &self,
        repo_root: &Path,
        branch: &str,
        target: &Path,
    ) -> BerthResult<Provenance> {
        let target_str = target.to_string_lossy().to_string();
        let parent = target.parent().unwrap_or(target);

        if let Some(url) = git::remote_url(repo_root).await {
            let reference = repo_root.to_string_lossy().to_string();
            let mut args = vec![
                "clone",
                "--reference-if-able",
                reference.as_str(),
                "--dissociate",
                "--single-branch",
            ];
            let on_remote = git::remote_branch_exists(repo_root, branch).await;
            if on_remote {
                args.extend(["--branch", branch]);
            }
            args.extend([url.as_str(), target_str.as_str()]);
            git::git(parent, &args).await?;

            if !on_remote {
                debug!(branch, "Branch not on remote, creating from default branch");
                git::git(target, &["checkout", "-b", branch]).await?;
            }

            return Ok(Provenance {
                source_type: "remote".to_string(),
                source_url: Some(url),
            });
        }

        let source = repo_root.to_string_lossy().to_string();
        git::git(parent, &["clone", "--no-local", &source, &target_str]).await?;

        let current = git::current_branch(target).await.unwrap_or_default();
        if current != branch {
            let tracking = format!("origin/{branch}");
            if git::rev_exists(target, &tracking).await {
                git::git(target, &["checkout", "-B", branch, &tracking]).await?;
            } else {
                git::git(target, &["checkout", "-b", branch]).await?;
            }
        }

        Ok(Provenance {
            source_type: "local".to_string(),
            source_url: Some(source),
        })
    }
}
