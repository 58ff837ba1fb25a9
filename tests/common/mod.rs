// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use berth::config::{Paths, ResolvedConfig};
use berth::container::ContainerRuntime;
use berth::{Berth, BerthError, BerthResult};

/// Whether a `git` binary is on PATH. Tests that need one return early otherwise.
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn git(dir: &Path, args: &[&str]) {
    let out = Command::new("git")
        .args(["-c", "user.name=Berth Test", "-c", "user.email=test@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
}

/// A repository with one commit on `main` and an ignored `.env`.
pub fn init_repo(dir: &Path) -> PathBuf {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    git(dir, &["checkout", "-q", "-B", "main"]);
    std::fs::write(dir.join("README.md"), "hello\n").unwrap();
    std::fs::write(dir.join(".gitignore"), ".env\nnode_modules/\n").unwrap();
    std::fs::write(dir.join(".env"), "API_KEY=secret\n").unwrap();
    git(dir, &["add", "README.md", ".gitignore"]);
    git(dir, &["commit", "-q", "-m", "init"]);
    dir.to_path_buf()
}

/// In-memory container runtime.
#[derive(Default)]
pub struct FakeRuntime {
    running: Mutex<HashSet<PathBuf>>,
    up_delay: Duration,
    fail_with: Option<String>,
}

impl FakeRuntime {
    pub fn slow(delay: Duration) -> Self {
        Self {
            up_delay: delay,
            ..Default::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn is_up(&self, workspace: &Path) -> bool {
        self.running.lock().unwrap().contains(workspace)
    }

    /// Simulate a container dying outside of berth.
    pub fn crash(&self, workspace: &Path) {
        self.running.lock().unwrap().remove(workspace);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn up<'a>(&self, workspace: &Path, _override_config: Option<&'a Path>) -> BerthResult<()> {
        tokio::time::sleep(self.up_delay).await;
        if let Some(message) = &self.fail_with {
            return Err(BerthError::provisioning("devcontainer", message.clone()));
        }
        self.running
            .lock()
            .unwrap()
            .insert(workspace.to_path_buf());
        Ok(())
    }

    async fn is_running(&self, workspace: &Path) -> bool {
        self.is_up(workspace)
    }

    async fn stop(&self, workspace: &Path) -> BerthResult<()> {
        self.crash(workspace);
        Ok(())
    }

    fn exec_prefix(&self) -> Vec<String> {
        vec!["devcontainer".to_string(), "exec".to_string()]
    }
}

pub async fn open(root: &Path, config: ResolvedConfig, runtime: Arc<FakeRuntime>) -> Berth {
    Berth::open(config, Paths::under(root), runtime).await
}
