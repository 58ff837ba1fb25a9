// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Inventory of workspaces on disk.
//!
//! Nothing here is stored: clones and worktrees are discovered by walking
//! `<root>/<repo>/<branch>` and checking for a `.git` entry, then joined
//! with session bindings and port assignments.

mod status;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::error::{BerthError, BerthResult};
use crate::ports::PortTable;
use crate::provision::sanitize_branch_name;
use crate::session::{SessionStore, WorkspaceKind};
use crate::telemetry::record_operation;

pub use status::{workspace_status, WorkspaceStatus};

/// What kind of inventory entry a descriptor is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Clone,
    Worktree,
    /// A session bound to a workspace that no longer exists.
    OrphanSession,
}

impl EntryKind {
    pub fn workspace_kind(&self) -> Option<WorkspaceKind> {
        match self {
            Self::Clone => Some(WorkspaceKind::ContainerClone),
            Self::Worktree => Some(WorkspaceKind::Worktree),
            Self::OrphanSession => None,
        }
    }
}

/// One known workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDescriptor {
    pub kind: EntryKind,
    pub repo: String,
    /// Branch directory name (sanitized).
    pub branch: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Only filled in by [`Inventory::find_stale`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_uncommitted: Option<bool>,
}

/// Outcome of looking a workspace up by branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(WorkspaceDescriptor),
    Ambiguous(Vec<WorkspaceDescriptor>),
    NotFound,
}

impl Resolution {
    /// Collapse into a single descriptor, turning the other outcomes into errors.
    pub fn into_result(self, branch: &str) -> BerthResult<WorkspaceDescriptor> {
        match self {
            Self::Resolved(found) => Ok(found),
            Self::Ambiguous(matches) => Err(BerthError::Ambiguous {
                branch: branch.to_string(),
                matches: matches.into_iter().map(|d| d.path).collect(),
            }),
            Self::NotFound => Err(BerthError::not_found("workspace", branch)),
        }
    }
}

/// Read-only view over every workspace root.
#[derive(Debug, Clone)]
pub struct Inventory {
    clones_dir: PathBuf,
    worktrees_dir: PathBuf,
    sessions: Arc<SessionStore>,
    ports: PortTable,
}

impl Inventory {
    pub fn new(
        clones_dir: impl Into<PathBuf>,
        worktrees_dir: impl Into<PathBuf>,
        sessions: Arc<SessionStore>,
        ports: PortTable,
    ) -> Self {
        Self {
            clones_dir: clones_dir.into(),
            worktrees_dir: worktrees_dir.into(),
            sessions,
            ports,
        }
    }

    /// Clones and worktrees on disk, without session or port data.
    pub async fn list_workspaces(&self) -> BerthResult<Vec<WorkspaceDescriptor>> {
        let clones = self.clones_dir.clone();
        let worktrees = self.worktrees_dir.clone();
        let found = tokio::task::spawn_blocking(move || {
            let mut found = scan_root(&clones, EntryKind::Clone);
            found.extend(scan_root(&worktrees, EntryKind::Worktree));
            found
        })
        .await
        .map_err(|e| BerthError::provisioning("scan", e.to_string()))?;
        Ok(found)
    }

    /// Every workspace plus sessions bound to missing ones.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn list_all(&self) -> BerthResult<Vec<WorkspaceDescriptor>> {
        let start = Instant::now();
        let result = self.list_all_inner().await;
        record_operation("inventory.list", start.elapsed(), result.is_ok());
        result
    }

    async fn list_all_inner(&self) -> BerthResult<Vec<WorkspaceDescriptor>> {
        let mut workspaces = self.list_workspaces().await?;
        let ports = self.ports.load().await?;
        let bindings = self.sessions.list().await?;

        let mut by_path: BTreeMap<PathBuf, Vec<String>> = BTreeMap::new();
        for binding in &bindings {
            if let Some(ws) = &binding.workspace {
                by_path
                    .entry(ws.clone())
                    .or_default()
                    .push(binding.session_id.clone());
            }
        }

        let known: HashSet<PathBuf> = workspaces.iter().map(|w| w.path.clone()).collect();
        for ws in &mut workspaces {
            ws.port = ports.get(ws.path.to_string_lossy().as_ref()).copied();
            ws.sessions = by_path.remove(&ws.path).unwrap_or_default();
        }

        for binding in bindings {
            let Some(path) = binding.workspace else {
                continue;
            };
            if known.contains(&path) {
                continue;
            }
            debug!(session = %binding.session_id, path = %path.display(), "Orphaned session");
            workspaces.push(WorkspaceDescriptor {
                kind: EntryKind::OrphanSession,
                repo: binding.repo,
                branch: binding.branch,
                port: ports.get(path.to_string_lossy().as_ref()).copied(),
                path,
                last_used: Some(binding.activated_at),
                sessions: vec![binding.session_id],
                has_uncommitted: None,
            });
        }

        Ok(workspaces)
    }

    /// Version-control state of one workspace.
    pub async fn status(&self, path: &Path) -> WorkspaceStatus {
        workspace_status(path).await
    }

    /// Workspaces unused for longer than `max_age_days`, flagged with
    /// whether they hold uncommitted work.
    #[cfg_attr(feature = "telemetry", instrument(skip(self)))]
    pub async fn find_stale(&self, max_age_days: u64) -> BerthResult<Vec<WorkspaceDescriptor>> {
        let max_age = Duration::from_secs(max_age_days * 24 * 60 * 60);
        let now = Utc::now();
        let mut stale = Vec::new();

        for mut ws in self.list_all().await? {
            if ws.kind == EntryKind::OrphanSession {
                continue;
            }
            let Some(last_used) = ws.last_used else {
                continue;
            };
            if !is_stale(last_used, now, max_age) {
                continue;
            }
            let status = workspace_status(&ws.path).await;
            ws.has_uncommitted = status.is_git.then_some(!status.clean);
            stale.push(ws);
        }
        Ok(stale)
    }

    /// Find the workspace for `branch`, optionally limited to one repository.
    pub async fn resolve(&self, branch: &str, repo: Option<&str>) -> BerthResult<Resolution> {
        let wanted = sanitize_branch_name(branch.trim());
        let mut matches: Vec<WorkspaceDescriptor> = self
            .list_workspaces()
            .await?
            .into_iter()
            .filter(|ws| ws.branch == wanted)
            .filter(|ws| repo.is_none_or(|r| ws.repo == r))
            .collect();

        Ok(match matches.len() {
            0 => Resolution::NotFound,
            1 => Resolution::Resolved(matches.remove(0)),
            _ => Resolution::Ambiguous(matches),
        })
    }
}

/// Whether `last_used` is more than `max_age` before `now`.
pub fn is_stale(last_used: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    match chrono::Duration::from_std(max_age) {
        Ok(max_age) => now - last_used > max_age,
        Err(_) => false,
    }
}

/// Walk `<root>/<repo>/<branch>` keeping directories whose `.git` entry
/// matches `kind`.
fn scan_root(root: &Path, kind: EntryKind) -> Vec<WorkspaceDescriptor> {
    let mut found = Vec::new();
    if !root.is_dir() {
        return found;
    }

    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let path = entry.path();
        let dot_git = path.join(".git");
        let valid = match kind {
            EntryKind::Clone => dot_git.is_dir(),
            EntryKind::Worktree => dot_git.is_file(),
            EntryKind::OrphanSession => false,
        };
        if !valid {
            continue;
        }

        let repo = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let branch = entry.file_name().to_string_lossy().into_owned();

        found.push(WorkspaceDescriptor {
            kind,
            repo,
            branch,
            path: path.to_path_buf(),
            last_used: last_used(path),
            sessions: Vec::new(),
            port: None,
            has_uncommitted: None,
        });
    }
    found
}

/// Most recent modification among the workspace directory and its git
/// metadata.
///
/// Access times are ignored: listing a root touches them under `relatime`.
fn last_used(path: &Path) -> Option<DateTime<Utc>> {
    let dot_git = path.join(".git");
    let git_dir = if dot_git.is_file() {
        std::fs::read_to_string(&dot_git)
            .ok()
            .and_then(|contents| gitdir_from_pointer(&contents, path))
    } else {
        Some(dot_git.clone())
    };

    let mut candidates = vec![path.to_path_buf(), dot_git];
    if let Some(git_dir) = git_dir {
        candidates.push(git_dir.join("index"));
        candidates.push(git_dir.join("HEAD"));
    }

    candidates
        .iter()
        .filter_map(|p| std::fs::symlink_metadata(p).ok()?.modified().ok())
        .max()
        .map(DateTime::<Utc>::from)
}

fn gitdir_from_pointer(contents: &str, worktree: &Path) -> Option<PathBuf> {
    let line = contents.lines().find(|l| l.starts_with("gitdir:"))?;
    let gitdir = PathBuf::from(line.trim_start_matches("gitdir:").trim());
    Some(if gitdir.is_absolute() {
        gitdir
    } else {
        worktree.join(gitdir)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionBinding;
    use filetime::FileTime;
    use std::time::SystemTime;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        sessions: Arc<SessionStore>,
        inventory: Inventory,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path().join("sessions")));
        let inventory = Inventory::new(
            dir.path().join("clones"),
            dir.path().join("worktrees"),
            Arc::clone(&sessions),
            PortTable::new(dir.path().join("ports.json")),
        );
        Fixture {
            dir,
            sessions,
            inventory,
        }
    }

    fn make_clone(root: &Path, repo: &str, branch: &str) -> PathBuf {
        let ws = root.join("clones").join(repo).join(branch);
        std::fs::create_dir_all(ws.join(".git")).unwrap();
        ws
    }

    fn make_worktree(root: &Path, repo: &str, branch: &str) -> PathBuf {
        let ws = root.join("worktrees").join(repo).join(branch);
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join(".git"), "gitdir: /src/x/.git/worktrees/y\n").unwrap();
        ws
    }

    fn age_days(path: &Path, days: u64) {
        let t = FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60),
        );
        filetime::set_file_times(path.join(".git"), t, t).unwrap();
        filetime::set_file_times(path, t, t).unwrap();
    }

    #[tokio::test]
    async fn test_scan_requires_matching_git_entry() {
        let f = fixture();
        make_clone(f.dir.path(), "api", "main");
        make_worktree(f.dir.path(), "api", "feat-x");
        // Placeholder without .git
        std::fs::create_dir_all(f.dir.path().join("clones/api/half-made")).unwrap();
        // Worktree-shaped entry under clones is not a clone
        let bogus = f.dir.path().join("clones/web/pointer");
        std::fs::create_dir_all(&bogus).unwrap();
        std::fs::write(bogus.join(".git"), "gitdir: x").unwrap();

        let found = f.inventory.list_workspaces().await.unwrap();
        let summary: Vec<_> = found
            .iter()
            .map(|w| (w.kind, w.repo.as_str(), w.branch.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                (EntryKind::Clone, "api", "main"),
                (EntryKind::Worktree, "api", "feat-x"),
            ]
        );
    }

    #[tokio::test]
    async fn test_list_all_joins_sessions_ports_and_orphans() {
        let f = fixture();
        let ws = make_clone(f.dir.path(), "api", "main");
        f.sessions
            .put(&SessionBinding::new(
                "live",
                &ws,
                "api",
                "main",
                WorkspaceKind::ContainerClone,
            ))
            .await
            .unwrap();
        f.sessions
            .put(&SessionBinding::new(
                "ghost",
                "/gone/api/old",
                "api",
                "old",
                WorkspaceKind::Worktree,
            ))
            .await
            .unwrap();
        let mut ports = crate::ports::PortMap::new();
        ports.insert(ws.to_string_lossy().into_owned(), 4105);
        PortTable::new(f.dir.path().join("ports.json"))
            .save(&ports)
            .await
            .unwrap();

        let all = f.inventory.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sessions, vec!["live"]);
        assert_eq!(all[0].port, Some(4105));
        assert_eq!(all[1].kind, EntryKind::OrphanSession);
        assert_eq!(all[1].path, PathBuf::from("/gone/api/old"));
    }

    #[tokio::test]
    async fn test_find_stale_threshold() {
        let f = fixture();
        let six = make_clone(f.dir.path(), "api", "six-days");
        let eight = make_worktree(f.dir.path(), "api", "eight-days");
        age_days(&six, 6);
        age_days(&eight, 8);

        let stale = f.inventory.find_stale(7).await.unwrap();
        let paths: Vec<_> = stale.iter().map(|w| w.path.clone()).collect();
        assert_eq!(paths, vec![eight]);
    }

    #[tokio::test]
    async fn test_listing_does_not_refresh_staleness() {
        let f = fixture();
        let old = make_clone(f.dir.path(), "api", "old");
        age_days(&old, 8);

        f.inventory.list_all().await.unwrap();
        let first = f.inventory.find_stale(7).await.unwrap();
        let second = f.inventory.find_stale(7).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].path, old);
    }

    #[tokio::test]
    async fn test_recent_git_activity_counts_as_use() {
        let f = fixture();
        let ws = make_clone(f.dir.path(), "api", "busy");
        std::fs::write(ws.join(".git/HEAD"), "ref: refs/heads/busy\n").unwrap();
        age_days(&ws, 9);

        assert!(f.inventory.find_stale(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_outcomes() {
        let f = fixture();
        make_clone(f.dir.path(), "api", "feat-auth");
        make_clone(f.dir.path(), "web", "feat-auth");
        make_worktree(f.dir.path(), "api", "fix-nav");

        match f.inventory.resolve("feat/auth", None).await.unwrap() {
            Resolution::Ambiguous(matches) => assert_eq!(matches.len(), 2),
            other => panic!("expected ambiguous, got {other:?}"),
        }
        match f.inventory.resolve("feat/auth", Some("web")).await.unwrap() {
            Resolution::Resolved(ws) => assert_eq!(ws.repo, "web"),
            other => panic!("expected resolved, got {other:?}"),
        }
        assert_eq!(
            f.inventory.resolve("nope", None).await.unwrap(),
            Resolution::NotFound
        );

        let err = f
            .inventory
            .resolve("feat-auth", None)
            .await
            .unwrap()
            .into_result("feat-auth")
            .unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_INVALID_ARGS);
        assert_eq!(err.to_json()["error"]["matches"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_is_stale_boundaries() {
        let now = Utc::now();
        let week = Duration::from_secs(7 * 24 * 60 * 60);
        assert!(!is_stale(now - chrono::Duration::days(6), now, week));
        assert!(is_stale(now - chrono::Duration::days(8), now, week));
    }
}
