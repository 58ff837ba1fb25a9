// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Cross-process mutual exclusion via atomic directory creation.
//!
//! `mkdir` either creates the marker or fails because it already exists,
//! on every file system we care about, including network mounts without
//! advisory locking. A crashed holder leaves its marker behind, so markers
//! older than the staleness threshold are force-removed.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{debug, instrument, warn};

use crate::error::BerthResult;

/// A lock backed by a marker directory.
#[derive(Debug, Clone)]
pub struct DirLock {
    path: PathBuf,
    stale_after: Duration,
    retry_interval: Duration,
}

impl DirLock {
    pub fn new(path: impl Into<PathBuf>, stale_after: Duration, retry_interval: Duration) -> Self {
        Self {
            path: path.into(),
            stale_after,
            retry_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the marker is ours.
    #[cfg_attr(feature = "telemetry", instrument(skip(self), fields(path = %self.path.display())))]
    pub async fn acquire(&self) -> BerthResult<DirLockGuard> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        loop {
            match fs::create_dir(&self.path).await {
                Ok(()) => {
                    debug!("Lock acquired");
                    return Ok(DirLockGuard {
                        path: self.path.clone(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.break_if_stale().await? {
                        continue;
                    }
                    tokio::time::sleep(self.retry_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Marker taken by whoever is breaking a stale lock.
    fn breaker_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".break");
        PathBuf::from(name)
    }

    async fn marker_state(&self, path: &Path) -> BerthResult<Marker> {
        let modified = match fs::metadata(path).await {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Marker::Missing),
            Err(e) => return Err(e.into()),
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(if age > self.stale_after {
            Marker::Stale(age)
        } else {
            Marker::Fresh
        })
    }

    /// Remove the marker if its holder has been gone too long.
    ///
    /// Only one waiter breaks a given marker: the removal happens under a
    /// second marker, after re-checking that the lock is still the stale
    /// one. Returns true when the caller should retry immediately.
    async fn break_if_stale(&self) -> BerthResult<bool> {
        match self.marker_state(&self.path).await? {
            // Released between our mkdir and stat.
            Marker::Missing => return Ok(true),
            Marker::Fresh => return Ok(false),
            Marker::Stale(_) => {}
        }

        let breaker = self.breaker_path();
        match fs::create_dir(&breaker).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // A breaker that died mid-break leaves its marker behind too.
                if let Marker::Stale(_) = self.marker_state(&breaker).await? {
                    warn!(path = %breaker.display(), "Removing stale breaker marker");
                    let _ = fs::remove_dir(&breaker).await;
                }
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        }
        let _breaker = DirLockGuard { path: breaker };
        self.remove_if_still_stale().await
    }

    /// Second look at the marker, made while holding the breaker.
    async fn remove_if_still_stale(&self) -> BerthResult<bool> {
        let age = match self.marker_state(&self.path).await? {
            Marker::Missing => return Ok(true),
            Marker::Fresh => return Ok(false),
            Marker::Stale(age) => age,
        };

        warn!(
            path = %self.path.display(),
            age_secs = age.as_secs(),
            "Removing stale lock marker"
        );
        match fs::remove_dir_all(&self.path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }
}

enum Marker {
    Missing,
    Fresh,
    Stale(Duration),
}

/// Held lock. The marker is removed on drop.
#[derive(Debug)]
pub struct DirLockGuard {
    path: PathBuf,
}

impl Drop for DirLockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to release lock");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn lock_in(dir: &TempDir) -> DirLock {
        DirLock::new(
            dir.path().join("ports.lock"),
            Duration::from_secs(60),
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_guard_releases_marker() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        {
            let _guard = lock.acquire().await.unwrap();
            assert!(lock.path().is_dir());
        }
        assert!(!lock.path().exists());

        // Reacquirable after release
        let _guard = lock.acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_stale_marker_is_broken() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        std::fs::create_dir(lock.path()).unwrap();
        let old = filetime::FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(300),
        );
        filetime::set_file_mtime(lock.path(), old).unwrap();

        let acquired =
            tokio::time::timeout(Duration::from_secs(5), lock.acquire()).await;
        assert!(acquired.is_ok(), "stale lock should be broken");
    }

    #[tokio::test]
    async fn test_fresh_marker_blocks() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);
        std::fs::create_dir(lock.path()).unwrap();

        let waited =
            tokio::time::timeout(Duration::from_millis(100), lock.acquire()).await;
        assert!(waited.is_err(), "fresh lock must not be stolen");
    }

    #[tokio::test]
    async fn test_serializes_critical_sections() {
        let dir = TempDir::new().unwrap();
        let lock = Arc::new(lock_in(&dir));
        let inside = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            let overlaps = Arc::clone(&overlaps);
            handles.push(tokio::spawn(async move {
                let _guard = lock.acquire().await.unwrap();
                if inside.fetch_add(1, Ordering::SeqCst) > 0 {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    fn age(path: &Path, secs: u64) {
        let old = filetime::FileTime::from_system_time(
            SystemTime::now() - Duration::from_secs(secs),
        );
        filetime::set_file_mtime(path, old).unwrap();
    }

    #[tokio::test]
    async fn test_outdated_stale_view_keeps_fresh_marker() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);

        // A waiter saw the old marker as stale, but by the time it gets to
        // remove it the lock has been broken and taken again.
        let _holder = lock.acquire().await.unwrap();
        assert!(!lock.remove_if_still_stale().await.unwrap());
        assert!(lock.path().is_dir());
    }

    #[tokio::test]
    async fn test_only_one_waiter_breaks_a_stale_marker() {
        let dir = TempDir::new().unwrap();
        let lock = lock_in(&dir);
        std::fs::create_dir(lock.path()).unwrap();
        age(lock.path(), 300);

        // Someone else is mid-break
        std::fs::create_dir(lock.breaker_path()).unwrap();
        assert!(!lock.break_if_stale().await.unwrap());
        assert!(lock.path().is_dir());

        // Their breaker went stale too: it is cleared, then the next attempt breaks
        age(&lock.breaker_path(), 300);
        assert!(!lock.break_if_stale().await.unwrap());
        assert!(!lock.breaker_path().exists());
        assert!(lock.break_if_stale().await.unwrap());
        assert!(!lock.path().exists());
    }
}
