// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Pre-command hook for agent hosts.
//!
//! The host pipes one JSON object per intercepted tool call into
//! `berth hook`. Shell commands are routed for the calling session; when
//! routing changes anything, the rewritten input is printed back as a
//! `PreToolUse` decision. Empty stdout lets the call through unchanged.
//!
//! The hook fails open: unparsable input, non-shell tools and routing
//! errors all leave the command alone.

use std::io::{Read, Write};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::BerthResult;
use crate::session::{RouteTarget, SessionRouter};

/// Tool name the host uses for shell commands.
pub const SHELL_TOOL: &str = "Bash";

/// One intercepted tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub session_id: Option<String>,
    pub tool_name: String,
    #[serde(default)]
    pub tool_input: Map<String, Value>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
}

impl HookInput {
    pub fn command(&self) -> Option<&str> {
        self.tool_input.get("command").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookDecision {
    pub hook_event_name: &'static str,
    pub permission_decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    pub updated_input: Map<String, Value>,
}

/// What the hook prints when it rewrites a call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    pub hook_specific_output: HookDecision,
}

/// Route one tool call. `None` means "leave it alone".
pub async fn process_hook(router: &SessionRouter, input: HookInput) -> Option<HookOutput> {
    if input.tool_name != SHELL_TOOL {
        debug!(tool = %input.tool_name, "Non-shell tool, passing through");
        return None;
    }
    let command = input.command()?;

    let routed = match router.route(input.session_id.as_deref(), command).await {
        Ok(routed) => routed,
        Err(e) => {
            warn!(error = %e, "Routing failed, passing command through");
            return None;
        }
    };
    if !routed.is_rewritten(command) {
        return None;
    }
    debug!(target = ?routed.target, class = %routed.class, "Rewriting command");

    let reason = match routed.target {
        RouteTarget::Container => Some("berth: routed into workspace container".to_string()),
        RouteTarget::Worktree => Some("berth: running in session worktree".to_string()),
        RouteTarget::Blocked => Some("berth: workspace not ready".to_string()),
        RouteTarget::Host => None,
    };

    let mut updated = input.tool_input.clone();
    updated.insert("command".to_string(), Value::String(routed.command));
    if let Some(cwd) = routed.cwd {
        updated.insert(
            "cwd".to_string(),
            Value::String(cwd.to_string_lossy().into_owned()),
        );
    }

    Some(HookOutput {
        hook_specific_output: HookDecision {
            hook_event_name: "PreToolUse",
            permission_decision: "allow",
            permission_decision_reason: reason,
            updated_input: updated,
        },
    })
}

/// Parse raw hook input. Blank or malformed input yields `None`.
pub fn parse_input(raw: &str) -> Option<HookInput> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match serde_json::from_str(raw) {
        Ok(input) => Some(input),
        Err(e) => {
            warn!(error = %e, "Failed to parse hook input");
            None
        }
    }
}

/// Read a call from `reader`, route it, and write any decision to `writer`.
pub async fn run_hook<R: Read, W: Write>(
    router: &SessionRouter,
    mut reader: R,
    mut writer: W,
) -> BerthResult<()> {
    let mut raw = String::new();
    reader.read_to_string(&mut raw)?;

    let Some(input) = parse_input(&raw) else {
        return Ok(());
    };
    if let Some(output) = process_hook(router, input).await {
        writeln!(writer, "{}", serde_json::to_string(&output)?)?;
    }
    Ok(())
}
