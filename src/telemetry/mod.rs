// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tracing and metrics infrastructure.
//!
//! - **Tracing**: Structured logging to stderr, filtered by `RUST_LOG`
//! - **Metrics**: Operation timings and routing counters for the current process
//!
//! # Usage
//!
//! Initialize telemetry at application startup:
//!
//! ```rust,ignore
//! use berth::telemetry::{init_telemetry, TelemetryConfig, Verbosity};
//!
//! let _guard = init_telemetry(&TelemetryConfig::new(Verbosity::Verbose))?;
//! ```
//!
//! Public async operations that touch disk or spawn processes carry
//! `#[instrument]` behind the `telemetry` feature. Record paths, ports and
//! branch names as fields, never file contents.

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard, Verbosity};
pub use metrics::{
    record_operation, Histogram, Metrics, MetricsSnapshot, OperationMetrics, GLOBAL_METRICS,
};
