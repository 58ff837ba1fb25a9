// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Host vs. workspace classification of shell commands.
//!
//! The first token of the command decides. Tokens on the host allow-list
//! (navigation, file inspection, git, editors, container tooling) run on
//! the host; everything else runs in the bound workspace. A `HOST:` prefix
//! forces host execution for any command.

use std::collections::HashSet;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::ResolvedConfig;

/// Where a command should run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandClass {
    /// Allow-listed host command.
    Host,
    /// Runs inside the bound workspace.
    Workspace,
    /// Forced to the host with a `HOST:` prefix.
    Escape,
}

impl CommandClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::Workspace => "workspace",
            Self::Escape => "escape",
        }
    }
}

impl std::fmt::Display for CommandClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in host commands.
pub const DEFAULT_HOST_COMMANDS: &[&str] = &[
    // navigation and inspection
    "cd", "pwd", "ls", "ll", "tree", "find", "fd", "cat", "less", "more", "head", "tail",
    "wc", "file", "stat", "du", "df", "which", "whereis", "type", "echo", "printf",
    "grep", "rg", "ag", "diff",
    // editing
    "vim", "vi", "nvim", "nano", "emacs", "code", "cursor", "open", "touch", "mkdir",
    "cp", "mv", "rm", "ln", "chmod", "sed", "awk",
    // version control
    "git", "gh", "glab",
    // system
    "ps", "top", "htop", "kill", "pkill", "lsof", "env", "whoami", "uname", "date",
    // container and package tooling
    "docker", "docker-compose", "podman", "devcontainer", "brew", "apt", "apt-get",
];

/// Name of this tool. Never routed into a container, or starting a
/// container from inside a session would recurse.
pub const SELF_COMMAND: &str = "berth";

static ESCAPE_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*host:\s*").unwrap());

/// Strip a leading `HOST:` marker, if present.
pub fn strip_escape(command: &str) -> Option<&str> {
    ESCAPE_PREFIX
        .find(command)
        .map(|m| command[m.end()..].trim_end())
}

/// First whitespace-delimited token of a command.
pub fn first_token(command: &str) -> Option<&str> {
    command.split_whitespace().next()
}

/// Data-driven set of host-only command names.
#[derive(Debug, Clone)]
pub struct HostAllowList {
    commands: HashSet<String>,
}

impl HostAllowList {
    /// Built-ins with config additions and removals applied.
    pub fn from_config(config: &ResolvedConfig) -> Self {
        let list = config
            .host_commands
            .iter()
            .fold(Self::default(), |list, cmd| list.with_command(cmd.as_str()));
        config
            .workspace_commands
            .iter()
            .fold(list, |list, cmd| list.without_command(cmd))
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.commands.insert(command.into());
        self
    }

    pub fn without_command(mut self, command: &str) -> Self {
        self.commands.remove(command);
        self
    }

    /// Whether `token` names an allow-listed command.
    ///
    /// Paths like `/usr/bin/git` match by file name.
    pub fn contains(&self, token: &str) -> bool {
        self.commands.contains(token) || self.commands.contains(basename(token))
    }

    /// Classify `command` by its escape prefix, self-invocation or first token.
    pub fn classify(&self, command: &str) -> CommandClass {
        if strip_escape(command).is_some() {
            return CommandClass::Escape;
        }
        match first_token(command.trim()) {
            Some(token) if is_self_invocation(token) || self.contains(token) => CommandClass::Host,
            _ => CommandClass::Workspace,
        }
    }
}

impl Default for HostAllowList {
    fn default() -> Self {
        Self {
            commands: DEFAULT_HOST_COMMANDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Recursion guard, independent of allow-list configuration.
pub fn is_self_invocation(token: &str) -> bool {
    basename(token) == SELF_COMMAND
}

fn basename(token: &str) -> &str {
    Path::new(token)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(token)
}
