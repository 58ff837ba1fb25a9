// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Copying gitignored files (`.env`, local config) into new workspaces.
//!
//! A fresh clone or worktree lacks everything git ignores. Secrets and
//! local settings are small and few per directory; dependency trees and
//! build output are large and numerous. The policy below copies the former
//! and skips the latter. Copying is best-effort: a file that cannot be
//! read or written is skipped, never fatal.

use std::collections::HashMap;
use std::path::{Component, Path};
use std::time::Instant;

use tracing::{debug, instrument, warn};

use crate::config::CopyPolicy;
use crate::git;
use crate::telemetry::record_operation;

/// Lockfiles that are ignored in some repos but must never be copied.
pub const LOCKFILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "bun.lockb",
    "bun.lock",
    "Cargo.lock",
    "Gemfile.lock",
    "poetry.lock",
    "Pipfile.lock",
    "composer.lock",
    "uv.lock",
    "go.sum",
];

/// Copy the files `source` ignores into `dest`. Returns how many were copied.
#[cfg_attr(feature = "telemetry", instrument(skip(policy), fields(source = %source.display(), dest = %dest.display())))]
pub async fn copy_gitignored(source: &Path, dest: &Path, policy: &CopyPolicy) -> usize {
    let start = Instant::now();
    let listing = git::git(
        source,
        &["ls-files", "-z", "--others", "--ignored", "--exclude-standard"],
    )
    .await;

    let copied = match listing {
        Ok(out) => {
            let candidates: Vec<&str> = out.split('\0').filter(|p| !p.is_empty()).collect();
            copy_candidates(source, dest, &candidates, policy).await
        }
        Err(e) => {
            warn!(error = %e, "Could not list ignored files");
            0
        }
    };

    record_operation("provision.copy_gitignored", start.elapsed(), true);
    copied
}

/// Apply the copy policy to an explicit list of relative paths.
pub async fn copy_candidates(
    source: &Path,
    dest: &Path,
    candidates: &[&str],
    policy: &CopyPolicy,
) -> usize {
    let per_dir = count_per_top_dir(candidates);
    let mut copied = 0;

    for candidate in candidates {
        let rel = Path::new(candidate);
        if has_traversal(rel) {
            warn!(path = %candidate, "Skipping path with traversal segment");
            continue;
        }
        if is_lockfile(rel) {
            continue;
        }
        if let Some(top) = top_dir(rel) {
            if per_dir.get(top).copied().unwrap_or(0) > policy.max_files_per_dir {
                continue;
            }
        }

        match copy_one(&source.join(rel), &dest.join(rel), policy).await {
            Ok(true) => copied += 1,
            Ok(false) => {}
            Err(e) => debug!(path = %candidate, error = %e, "Skipping unreadable file"),
        }
    }

    debug!(copied, candidates = candidates.len(), "Copied ignored files");
    copied
}

async fn copy_one(from: &Path, to: &Path, policy: &CopyPolicy) -> std::io::Result<bool> {
    let meta = tokio::fs::symlink_metadata(from).await?;
    if !meta.is_file() || meta.len() > policy.max_file_bytes {
        return Ok(false);
    }
    // Never overwrite, including dangling symlinks at the destination.
    if tokio::fs::symlink_metadata(to).await.is_ok() {
        return Ok(false);
    }
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(from, to).await?;
    Ok(true)
}

fn has_traversal(rel: &Path) -> bool {
    rel.is_absolute()
        || rel
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)))
}

fn is_lockfile(rel: &Path) -> bool {
    rel.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| LOCKFILES.contains(&n))
}

/// First path component, for files not at the repository root.
fn top_dir(rel: &Path) -> Option<&str> {
    let mut components = rel.components();
    let first = components.next()?;
    components.next()?;
    first.as_os_str().to_str()
}

fn count_per_top_dir<'a>(candidates: &[&'a str]) -> HashMap<&'a str, usize> {
    let mut counts = HashMap::new();
    for candidate in candidates {
        if let Some(top) = top_dir(Path::new(*candidate)) {
            *counts.entry(top).or_insert(0) += 1;
        }
    }
    counts
}
