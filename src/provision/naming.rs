// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Branch and repository names as path segments.

use std::path::Path;

use crate::error::{BerthError, BerthResult};

/// Collapse a branch name into a single directory name.
///
/// `feat/auth` becomes `feat-auth`, so workspaces always sit exactly two
/// levels below their root.
pub fn sanitize_branch_name(branch: &str) -> String {
    branch
        .replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "-")
        .trim_matches('-')
        .to_string()
}

/// Sanitized branch segment, rejecting names that cannot be a directory.
pub fn branch_segment(branch: &str) -> BerthResult<String> {
    let trimmed = branch.trim();
    if trimmed.is_empty() {
        return Err(BerthError::validation("branch name is required"));
    }
    let segment = sanitize_branch_name(trimmed);
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(BerthError::validation(format!(
            "branch name '{branch}' cannot be used as a directory name"
        )));
    }
    Ok(segment)
}

/// Repository name used as the first path level.
pub fn repo_name(repo_root: &Path) -> BerthResult<String> {
    repo_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            BerthError::validation(format!(
                "cannot derive a repository name from {}",
                repo_root.display()
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_branch_name() {
        assert_eq!(sanitize_branch_name("feat/auth"), "feat-auth");
        assert_eq!(sanitize_branch_name("fix:bug"), "fix-bug");
        assert_eq!(sanitize_branch_name("/leading/"), "leading");
        assert_eq!(sanitize_branch_name("main"), "main");
    }

    #[test]
    fn test_branch_segment_rejects_unusable() {
        assert!(branch_segment("").is_err());
        assert!(branch_segment("   ").is_err());
        assert!(branch_segment("..").is_err());
        assert!(branch_segment("//").is_err());
        assert_eq!(branch_segment(" feat/x ").unwrap(), "feat-x");
    }

    #[test]
    fn test_repo_name() {
        assert_eq!(repo_name(Path::new("/home/me/src/api")).unwrap(), "api");
        assert!(repo_name(Path::new("/")).is_err());
    }
}
