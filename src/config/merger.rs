// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use crate::error::ConfigError;

use super::types::{BerthConfig, PortRange, ResolvedConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub port_range: Option<PortRange>,
    pub stale_days: Option<u64>,
    pub interactive_budget_seconds: Option<u64>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI options
/// 2. Local config (.berth.local.json)
/// 3. Workspace config (.berth.json)
/// 4. Global config (~/.berth/config.json)
/// 5. Default values
pub fn merge_config(
    global: Option<BerthConfig>,
    workspace: Option<BerthConfig>,
    local: Option<BerthConfig>,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for config in [global, workspace, local].into_iter().flatten() {
        apply_config(&mut result, &config);
    }

    apply_cli_options(&mut result, &cli);

    result
}

fn apply_config(result: &mut ResolvedConfig, config: &BerthConfig) {
    if let Some(range) = config.port_range {
        result.port_range = range;
    }

    if let Some(secs) = config.lock_stale_seconds {
        result.lock_stale_seconds = secs;
    }

    if let Some(millis) = config.lock_retry_millis {
        result.lock_retry_millis = millis;
    }

    if let Some(days) = config.stale_days {
        result.stale_days = days;
    }

    if let Some(secs) = config.job_retention_seconds {
        result.job_retention_seconds = secs;
    }

    if let Some(secs) = config.interactive_budget_seconds {
        result.interactive_budget_seconds = secs;
    }

    if let Some(secs) = config.start_timeout_seconds {
        result.start_timeout_seconds = secs;
    }

    // Allow-list edits accumulate across layers
    if let Some(ref commands) = config.host_commands {
        for cmd in commands {
            if !result.host_commands.contains(cmd) {
                result.host_commands.push(cmd.clone());
            }
        }
    }

    if let Some(ref commands) = config.workspace_commands {
        for cmd in commands {
            if !result.workspace_commands.contains(cmd) {
                result.workspace_commands.push(cmd.clone());
            }
        }
    }

    if let Some(ref copy) = config.copy {
        if let Some(bytes) = copy.max_file_bytes {
            result.copy.max_file_bytes = bytes;
        }
        if let Some(count) = copy.max_files_per_dir {
            result.copy.max_files_per_dir = count;
        }
    }

    if let Some(ref cli) = config.container_cli {
        result.container_cli = cli.clone();
    }

    if let Some(ref cli) = config.docker_cli {
        result.docker_cli = cli.clone();
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(range) = cli.port_range {
        result.port_range = range;
    }
    if let Some(days) = cli.stale_days {
        result.stale_days = days;
    }
    if let Some(secs) = cli.interactive_budget_seconds {
        result.interactive_budget_seconds = secs;
    }
}

/// Reject configurations the core cannot operate with.
pub fn validate_config(config: &ResolvedConfig) -> Result<(), ConfigError> {
    if config.port_range.start > config.port_range.end {
        return Err(ConfigError::InvalidValue {
            field: "portRange".to_string(),
            message: format!(
                "start {} is greater than end {}",
                config.port_range.start, config.port_range.end
            ),
        });
    }
    if config.port_range.start == 0 {
        return Err(ConfigError::InvalidValue {
            field: "portRange".to_string(),
            message: "port 0 cannot be assigned".to_string(),
        });
    }
    if config.container_cli.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "containerCli".to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}
