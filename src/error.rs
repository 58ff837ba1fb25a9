// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for Berth.
//!
//! This module provides strongly-typed errors for workspace provisioning,
//! port allocation and session routing, using `thiserror` for ergonomic
//! error definitions and `anyhow` for propagation at the binary boundary.
//!
//! Every [`BerthError`] maps onto the CLI exit-code taxonomy:
//!
//! | Code | Meaning           |
//! |------|-------------------|
//! | 0    | success           |
//! | 1    | general error     |
//! | 2    | invalid arguments |
//! | 3    | not found         |

use std::path::PathBuf;

use thiserror::Error;

/// Exit code for success.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for general errors.
pub const EXIT_GENERAL: i32 = 1;
/// Exit code for invalid arguments.
pub const EXIT_INVALID_ARGS: i32 = 2;
/// Exit code for missing workspaces, sessions or jobs.
pub const EXIT_NOT_FOUND: i32 = 3;

/// Errors produced by the workspace lifecycle core.
#[derive(Error, Debug)]
pub enum BerthError {
    #[error("No free port in range {start}-{end}")]
    ExhaustedRange { start: u16, end: u16 },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Branch '{branch}' matches {} workspaces", .matches.len())]
    Ambiguous { branch: String, matches: Vec<PathBuf> },

    #[error("{tool} failed: {message}")]
    Provisioning { tool: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{operation} still running after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl BerthError {
    /// Create a not-found error.
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    /// Create a provisioning error for an external tool.
    pub fn provisioning(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provisioning {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation(_) | Self::Ambiguous { .. } | Self::InvalidTransition { .. } => {
                EXIT_INVALID_ARGS
            }
            Self::NotFound { .. } => EXIT_NOT_FOUND,
            Self::Config(ConfigError::InvalidValue { .. }) => EXIT_INVALID_ARGS,
            _ => EXIT_GENERAL,
        }
    }

    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ExhaustedRange { .. } => "exhausted_range",
            Self::NotFound { .. } => "not_found",
            Self::Ambiguous { .. } => "ambiguous_target",
            Self::Provisioning { .. } => "provisioning_failed",
            Self::Cancelled => "cancelled",
            Self::Validation(_) => "invalid_arguments",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Timeout { .. } => "timeout",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
            Self::Config(_) => "config_error",
        }
    }

    /// Remediation hint for interactive output.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::ExhaustedRange { .. } => {
                Some("Run `berth prune` to release ports held by removed workspaces.".to_string())
            }
            Self::NotFound { kind: "workspace", name } => Some(format!(
                "Create it first with `berth start {name}`, or run `berth list` to see existing workspaces."
            )),
            Self::NotFound { kind: "session", .. } => {
                Some("Bind a session with `berth target <branch> --session <id>`.".to_string())
            }
            Self::Ambiguous { branch, .. } => Some(format!(
                "Pass `--repo <name>` to pick which repository's '{branch}' workspace to use."
            )),
            Self::Validation(_) => Some("See `berth --help` for usage.".to_string()),
            _ => None,
        }
    }

    /// Render the error as the JSON object printed in `--json` mode.
    pub fn to_json(&self) -> serde_json::Value {
        let mut error = serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
            "exitCode": self.exit_code(),
        });
        if let Self::Ambiguous { matches, .. } = self {
            error["matches"] = serde_json::json!(matches);
        }
        if let Some(hint) = self.hint() {
            error["hint"] = serde_json::json!(hint);
        }
        serde_json::json!({ "success": false, "error": error })
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

/// Result type alias for the workspace core.
pub type BerthResult<T> = std::result::Result<T, BerthError>;

/// Exit code for an error surfaced at the binary boundary.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<BerthError>()
        .map(BerthError::exit_code)
        .unwrap_or(EXIT_GENERAL)
}
