// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for performance monitoring.
//!
//! Provides lightweight in-process metrics without external dependencies.
//! Suitable for CLI tools where full observability stacks are overkill.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use crate::session::CommandClass;

/// Global metrics instance.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Timed operations by name (`port.acquire`, `provision.clone`, ...).
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// How intercepted commands were classified.
    routing: RoutingMetrics,

    /// Start time for calculating uptime.
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            operations: RwLock::new(HashMap::new()),
            routing: RoutingMetrics::new(),
            start_time: Instant::now(),
        }
    }

    /// Record a timed operation.
    pub fn record_operation(&self, name: &str, duration: Duration, success: bool) {
        // A poisoned lock only loses metrics, never state.
        if let Ok(mut ops) = self.operations.write() {
            ops.entry(name.to_string())
                .or_insert_with(OperationMetrics::new)
                .record(duration, success);
        }
    }

    /// Count one routed command.
    pub fn record_route(&self, class: CommandClass) {
        self.routing.add(class);
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations.read().ok()?.get(name).cloned()
    }

    /// Routed command counts as `(host, workspace, escape)`.
    pub fn route_counts(&self) -> (u64, u64, u64) {
        self.routing.totals()
    }

    /// Get uptime since metrics were initialized.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let operations = self
            .operations
            .read()
            .map(|ops| ops.clone())
            .unwrap_or_default();
        let (host, workspace, escape) = self.routing.totals();

        MetricsSnapshot {
            operations,
            host_routes: host,
            workspace_routes: workspace,
            escape_routes: escape,
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        if let Ok(mut ops) = self.operations.write() {
            ops.clear();
        }
        self.routing.reset();
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Timed operation metrics with histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    /// Number of operations.
    pub count: u64,

    /// Number of failed operations.
    pub failures: u64,

    /// Total duration.
    pub total_duration: Duration,

    /// Minimum duration.
    pub min_duration: Duration,

    /// Maximum duration.
    pub max_duration: Duration,

    /// Histogram buckets for latency distribution.
    pub histogram: Histogram,
}

impl OperationMetrics {
    /// Create new operation metrics.
    pub fn new() -> Self {
        Self {
            count: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    /// Record an operation.
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.count += 1;
        if !success {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    /// Calculate average duration.
    pub fn avg_duration(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.count as u32
        }
    }

    /// Calculate success rate (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            1.0
        } else {
            (self.count - self.failures) as f64 / self.count as f64
        }
    }
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple histogram with fixed buckets for latency tracking.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket boundaries in microseconds.
    buckets: Vec<u64>,

    /// Count per bucket.
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in microseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    /// Record a duration value.
    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[bucket_idx] += 1;
    }

    /// Get counts for each bucket.
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Calculate approximate percentile (p50, p90, p99, etc.).
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let micros = if i < self.buckets.len() {
                    self.buckets[i]
                } else {
                    self.buckets.last().copied().unwrap_or(0) * 10
                };
                return Duration::from_micros(micros);
            }
        }

        Duration::ZERO
    }

    /// Get p99 latency.
    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 1ms, 10ms, 100ms, 1s, 10s, 60s: git and container calls are slow
        Self::with_buckets(vec![
            1_000,
            10_000,
            100_000,
            1_000_000,
            10_000_000,
            60_000_000,
        ])
    }
}

/// Thread-safe routing counters.
#[derive(Debug)]
struct RoutingMetrics {
    host: AtomicU64,
    workspace: AtomicU64,
    escape: AtomicU64,
}

impl RoutingMetrics {
    fn new() -> Self {
        Self {
            host: AtomicU64::new(0),
            workspace: AtomicU64::new(0),
            escape: AtomicU64::new(0),
        }
    }

    fn add(&self, class: CommandClass) {
        let counter = match class {
            CommandClass::Host => &self.host,
            CommandClass::Workspace => &self.workspace,
            CommandClass::Escape => &self.escape,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn totals(&self) -> (u64, u64, u64) {
        (
            self.host.load(Ordering::Relaxed),
            self.workspace.load(Ordering::Relaxed),
            self.escape.load(Ordering::Relaxed),
        )
    }

    fn reset(&self) {
        self.host.store(0, Ordering::Relaxed);
        self.workspace.store(0, Ordering::Relaxed);
        self.escape.store(0, Ordering::Relaxed);
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Operation metrics by name.
    pub operations: HashMap<String, OperationMetrics>,

    pub host_routes: u64,
    pub workspace_routes: u64,
    pub escape_routes: u64,

    /// Uptime when snapshot was taken.
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Metrics Report ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Routes: {} host, {} workspace, {} escape\n\n",
            self.host_routes, self.workspace_routes, self.escape_routes
        ));

        if !self.operations.is_empty() {
            let mut names: Vec<_> = self.operations.keys().collect();
            names.sort();
            report.push_str("Operation Metrics:\n");
            for name in names {
                let metrics = &self.operations[name];
                report.push_str(&format!(
                    "  {}: {} ops, {:.1}% success, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.success_rate() * 100.0,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
        }

        report
    }
}

/// Convenience function to record an operation to global metrics.
pub fn record_operation(name: &str, duration: Duration, success: bool) {
    GLOBAL_METRICS.record_operation(name, duration, success);
}
