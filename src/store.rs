// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Whole-file JSON persistence shared by the port table, session and job stores.
//!
//! Files are never patched in place: readers see either the previous or the
//! next complete document, because writes go to a sibling temp file that is
//! then renamed over the target.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::warn;

use crate::error::BerthResult;

/// Read and parse a JSON document. Missing files yield `None`.
///
/// Unparsable files are logged and treated as missing so a single corrupt
/// record cannot wedge every later command.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> BerthResult<Option<T>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str(&content) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring unreadable state file");
            Ok(None)
        }
    }
}

/// Serialize `value` and replace `path` with it in one rename.
pub async fn write_json<T: Serialize>(path: &Path, value: &T) -> BerthResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let content = serde_json::to_string_pretty(value)?;
    let tmp = temp_sibling(path);
    fs::write(&tmp, content).await?;
    if let Err(e) = fs::rename(&tmp, path).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Delete a state file. Returns whether it existed.
pub async fn remove_file(path: &Path) -> BerthResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Stable short key for a workspace path, used in job and override file names.
pub fn workspace_key(workspace: &Path) -> String {
    let digest = Sha256::digest(workspace.to_string_lossy().as_bytes());
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_round_trip_and_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("table.json");

        let missing: Option<BTreeMap<String, u16>> = read_json(&path).await.unwrap();
        assert!(missing.is_none());

        let mut table = BTreeMap::new();
        table.insert("/w/api/main".to_string(), 4100u16);
        write_json(&path, &table).await.unwrap();

        let loaded: BTreeMap<String, u16> = read_json(&path).await.unwrap().unwrap();
        assert_eq!(loaded, table);

        // No temp files left behind
        let leftovers: Vec<_> = std::fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ nope").unwrap();

        let loaded: Option<BTreeMap<String, u16>> = read_json(&path).await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn test_remove_file_reports_existence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.json");
        std::fs::write(&path, "{}").unwrap();

        assert!(remove_file(&path).await.unwrap());
        assert!(!remove_file(&path).await.unwrap());
    }

    #[test]
    fn test_workspace_key_is_stable() {
        let a = workspace_key(Path::new("/clones/api/feat-x"));
        let b = workspace_key(Path::new("/clones/api/feat-x"));
        let c = workspace_key(Path::new("/clones/api/feat-y"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
