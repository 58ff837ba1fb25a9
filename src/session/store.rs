// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One JSON file per session, with an in-process read-through cache.
//!
//! The command hook looks bindings up on every shell command, so repeated
//! reads are served from memory. Any write or delete through this store
//! invalidates the cached entry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use super::SessionBinding;
use crate::error::{BerthError, BerthResult};
use crate::store;

/// Session bindings on disk.
#[derive(Debug)]
pub struct SessionStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, Option<SessionBinding>>>,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, session_id: &str) -> BerthResult<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    fn cached(&self, session_id: &str) -> Option<Option<SessionBinding>> {
        self.cache.lock().ok()?.get(session_id).cloned()
    }

    fn remember(&self, session_id: &str, binding: Option<SessionBinding>) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(session_id.to_string(), binding);
        }
    }

    fn invalidate(&self, session_id: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(session_id);
        }
    }

    pub async fn get(&self, session_id: &str) -> BerthResult<Option<SessionBinding>> {
        let path = self.path_for(session_id)?;
        if let Some(hit) = self.cached(session_id) {
            return Ok(hit);
        }
        let binding: Option<SessionBinding> = store::read_json(&path).await?;
        self.remember(session_id, binding.clone());
        Ok(binding)
    }

    /// Persist `binding`, replacing whatever the session had.
    pub async fn put(&self, binding: &SessionBinding) -> BerthResult<()> {
        let path = self.path_for(&binding.session_id)?;
        self.invalidate(&binding.session_id);
        store::write_json(&path, binding).await?;
        debug!(session = %binding.session_id, workspace = ?binding.workspace, "Bound session");
        Ok(())
    }

    /// Remove the binding. Returns whether one existed.
    pub async fn delete(&self, session_id: &str) -> BerthResult<bool> {
        let path = self.path_for(session_id)?;
        self.invalidate(session_id);
        store::remove_file(&path).await
    }

    /// Every stored binding, read straight from disk.
    pub async fn list(&self) -> BerthResult<Vec<SessionBinding>> {
        let mut bindings = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(bindings),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(binding) = store::read_json::<SessionBinding>(&path).await? {
                bindings.push(binding);
            }
        }
        bindings.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        Ok(bindings)
    }

    /// Bindings that point at `workspace`.
    pub async fn bound_to(&self, workspace: &Path) -> BerthResult<Vec<SessionBinding>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|b| b.workspace.as_deref() == Some(workspace))
            .collect())
    }
}

/// Session ids become file names, so only a conservative alphabet is allowed.
pub fn validate_session_id(session_id: &str) -> BerthResult<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= 128
        && !session_id.starts_with('.')
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(BerthError::validation(format!(
            "invalid session id '{session_id}'"
        )))
    }
}
