// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Thin async wrapper over the `git` binary.
//!
//! Git is treated as an external tool: every call spawns `git` with
//! piped output, and a non-zero exit becomes [`BerthError::Provisioning`]
//! carrying git's stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::trace;

use crate::error::{BerthError, BerthResult};

/// Run a git command in `cwd` and return trimmed stdout.
pub async fn git(cwd: &Path, args: &[&str]) -> BerthResult<String> {
    trace!(cwd = %cwd.display(), ?args, "git");
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| BerthError::provisioning("git", format!("failed to spawn git: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(BerthError::provisioning("git", stderr.trim()))
    }
}

/// Whether a `git` binary can be spawned at all.
pub async fn is_available() -> bool {
    Command::new("git")
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Top-level directory of the repository containing `path`.
pub async fn repo_root(path: &Path) -> BerthResult<PathBuf> {
    git(path, &["rev-parse", "--show-toplevel"])
        .await
        .map(PathBuf::from)
}

/// URL of the `origin` remote, if one is configured.
pub async fn remote_url(repo: &Path) -> Option<String> {
    git(repo, &["remote", "get-url", "origin"])
        .await
        .ok()
        .filter(|url| !url.is_empty())
}

/// Whether `branch` exists on the `origin` remote.
pub async fn remote_branch_exists(repo: &Path, branch: &str) -> bool {
    let head = format!("refs/heads/{branch}");
    git(repo, &["ls-remote", "--heads", "origin", &head])
        .await
        .map(|out| !out.is_empty())
        .unwrap_or(false)
}

/// Whether `reference` resolves in the repository.
pub async fn rev_exists(repo: &Path, reference: &str) -> bool {
    let commit_ref = format!("{reference}^{{commit}}");
    git(repo, &["rev-parse", "--verify", "--quiet", &commit_ref])
        .await
        .is_ok()
}

/// Whether `branch` exists as a local branch.
pub async fn local_branch_exists(repo: &Path, branch: &str) -> bool {
    rev_exists(repo, &format!("refs/heads/{branch}")).await
}

/// Currently checked-out branch (empty when detached).
pub async fn current_branch(repo: &Path) -> BerthResult<String> {
    git(repo, &["branch", "--show-current"]).await
}

/// Whether `root` is a linked worktree rather than a primary checkout.
///
/// A linked worktree has a `.git` *file* pointing at the main repository.
pub fn is_worktree_checkout(root: &Path) -> bool {
    root.join(".git").is_file()
}

/// Recover the main repository from the contents of a worktree's `.git` file.
///
/// The file reads `gitdir: <main>/.git/worktrees/<name>`; relative pointers
/// are resolved against `worktree`.
pub fn parse_gitdir_pointer(contents: &str, worktree: &Path) -> Option<PathBuf> {
    let line = contents.lines().find(|l| l.starts_with("gitdir:"))?;
    let gitdir = PathBuf::from(line.trim_start_matches("gitdir:").trim());
    let gitdir = if gitdir.is_absolute() {
        gitdir
    } else {
        worktree.join(gitdir)
    };

    // <main>/.git/worktrees/<name> -> <main>
    let worktrees = gitdir.parent()?;
    if worktrees.file_name()? != "worktrees" {
        return None;
    }
    let dot_git = worktrees.parent()?;
    if dot_git.file_name()? != ".git" {
        // Bare repositories keep worktrees directly under the repo dir.
        return Some(dot_git.to_path_buf());
    }
    dot_git.parent().map(Path::to_path_buf)
}

/// Main repository of a linked worktree, read from its `.git` pointer file.
pub async fn worktree_main_repo(worktree: &Path) -> Option<PathBuf> {
    let contents = tokio::fs::read_to_string(worktree.join(".git")).await.ok()?;
    parse_gitdir_pointer(&contents, worktree)
}
