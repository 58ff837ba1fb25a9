// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Ephemeral devcontainer configs that pin a workspace's port.
//!
//! The checked-in `devcontainer.json` is never touched. The override lives
//! under the cache directory, keyed by a hash of the workspace path, and is
//! passed to the runtime with `--override-config`.

use std::path::{Path, PathBuf};

use serde_json::json;
use tracing::debug;

use crate::error::BerthResult;
use crate::store;

pub const OVERRIDE_FILE: &str = "devcontainer.json";

/// Where the override for `workspace` lives, whether or not it exists.
pub fn override_path(overrides_dir: &Path, workspace: &Path) -> PathBuf {
    overrides_dir
        .join(store::workspace_key(workspace))
        .join(OVERRIDE_FILE)
}

/// Write the port override for `workspace` and return its path.
pub async fn write_port_override(
    overrides_dir: &Path,
    workspace: &Path,
    port: u16,
) -> BerthResult<PathBuf> {
    let path = override_path(overrides_dir, workspace);
    let mapping = format!("{port}:{port}");
    let content = json!({
        "forwardPorts": [port],
        "containerEnv": { "PORT": port.to_string() },
        "runArgs": ["-p", mapping],
    });
    store::write_json(&path, &content).await?;
    debug!(path = %path.display(), port, "Wrote port override");
    Ok(path)
}

/// Delete the override for `workspace`, including its hash directory.
pub async fn remove_port_override(overrides_dir: &Path, workspace: &Path) -> BerthResult<bool> {
    let path = override_path(overrides_dir, workspace);
    let existed = store::remove_file(&path).await?;
    if let Some(parent) = path.parent() {
        // Only removes the directory when empty.
        let _ = tokio::fs::remove_dir(parent).await;
    }
    Ok(existed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_override_content_and_location() {
        let dir = TempDir::new().unwrap();
        let ws = Path::new("/clones/api/feat-x");

        let path = write_port_override(dir.path(), ws, 4107).await.unwrap();
        assert_eq!(path, override_path(dir.path(), ws));
        assert_eq!(path.file_name().unwrap(), OVERRIDE_FILE);
        assert_eq!(
            path.parent().unwrap().file_name().unwrap().len(),
            16,
            "hash directory is 16 hex chars"
        );

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "forwardPorts": [4107],
                "containerEnv": {"PORT": "4107"},
                "runArgs": ["-p", "4107:4107"],
            })
        );
    }

    #[tokio::test]
    async fn test_remove_override() {
        let dir = TempDir::new().unwrap();
        let ws = Path::new("/clones/web/main");
        let path = write_port_override(dir.path(), ws, 4100).await.unwrap();

        assert!(remove_port_override(dir.path(), ws).await.unwrap());
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
        assert!(!remove_port_override(dir.path(), ws).await.unwrap());
    }
}
