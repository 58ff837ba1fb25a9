// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Log subscriber setup for the CLI.
//!
//! Logs always go to stderr: stdout belongs to `--json` output and to the
//! hook's response.

use std::io;

use tracing::Subscriber;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, MakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// How chatty the CLI is, from `-v` / `--trace`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Warnings and errors only.
    #[default]
    Quiet,
    Verbose,
    /// Everything, including span timings.
    Trace,
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub verbosity: Verbosity,
    /// Colored output. Off when something parses stdout/stderr.
    pub ansi: bool,
}

impl TelemetryConfig {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            ansi: true,
        }
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    fn level(&self) -> &'static str {
        match self.verbosity {
            Verbosity::Quiet => "warn",
            Verbosity::Verbose => "debug",
            Verbosity::Trace => "trace",
        }
    }

    /// Filter used when `RUST_LOG` is unset. Dependencies stay at `warn`.
    pub fn default_directive(&self) -> String {
        format!("warn,berth={}", self.level())
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }

    fn span_events(&self) -> FmtSpan {
        match self.verbosity {
            Verbosity::Trace => FmtSpan::CLOSE,
            _ => FmtSpan::NONE,
        }
    }
}

/// Guard returned by [`init_telemetry`]. Keep it alive for the whole run.
pub struct TelemetryGuard {
    _private: (),
}

fn subscriber<W>(config: &TelemetryConfig, filter: EnvFilter, writer: W) -> impl Subscriber + Send + Sync
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(writer)
            .with_ansi(config.ansi)
            .with_target(config.verbosity != Verbosity::Quiet)
            .with_span_events(config.span_events())
            .compact(),
    )
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity.
pub fn init_telemetry(config: &TelemetryConfig) -> io::Result<TelemetryGuard> {
    subscriber(config, config.filter(), io::stderr)
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    Ok(TelemetryGuard { _private: () })
}
