// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for session lifecycle and tool calls.
//!
//! Lightweight in-process counters and histograms. A [`Metrics`] is created
//! by whoever owns the sessions and shared as `Arc<Metrics>`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::error::ErrorKind;

/// Central metrics collection.
#[derive(Debug)]
pub struct Metrics {
    /// Tool call metrics keyed by `provider.tool`.
    tools: RwLock<HashMap<String, ToolMetrics>>,

    /// Lifecycle operation metrics keyed by operation name.
    operations: RwLock<HashMap<String, OperationMetrics>>,

    /// Failure counts by error kind.
    failures: RwLock<HashMap<ErrorKind, u64>>,

    /// Total tool calls routed through the manager.
    routed_calls: AtomicU64,

    /// Start time for calculating uptime.
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            operations: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            routed_calls: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Metric key for a tool on a provider.
    pub fn tool_key(provider: &str, tool: &str) -> String {
        format!("{provider}.{tool}")
    }

    /// Record a tool call.
    pub fn record_tool(&self, provider: &str, tool: &str, duration: Duration, success: bool) {
        let mut tools = self.tools.write();
        tools
            .entry(Self::tool_key(provider, tool))
            .or_default()
            .record(duration, success);
    }

    /// Record a lifecycle operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        let mut ops = self.operations.write();
        ops.entry(name.to_string()).or_default().record(duration);
    }

    /// Count a failure.
    pub fn record_failure(&self, kind: ErrorKind) {
        *self.failures.write().entry(kind).or_insert(0) += 1;
    }

    /// Count a call routed by the manager.
    pub fn record_routed_call(&self) {
        self.routed_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Get metrics for a tool on a provider.
    pub fn tool_metrics(&self, provider: &str, tool: &str) -> Option<ToolMetrics> {
        self.tools.read().get(&Self::tool_key(provider, tool)).cloned()
    }

    /// Get metrics for a specific operation.
    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        self.operations.read().get(name).cloned()
    }

    /// Number of failures recorded for `kind`.
    pub fn failure_count(&self, kind: ErrorKind) -> u64 {
        self.failures.read().get(&kind).copied().unwrap_or(0)
    }

    /// Total calls routed by the manager.
    pub fn routed_calls(&self) -> u64 {
        self.routed_calls.load(Ordering::Relaxed)
    }

    /// Get uptime since metrics were created.
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Take a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tools: self.tools.read().clone().into_iter().collect(),
            operations: self.operations.read().clone().into_iter().collect(),
            failures: self
                .failures
                .read()
                .iter()
                .map(|(kind, count)| (kind.to_string(), *count))
                .collect(),
            routed_calls: self.routed_calls(),
            uptime: self.uptime(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.tools.write().clear();
        self.operations.write().clear();
        self.failures.write().clear();
        self.routed_calls.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Metrics for a specific tool.
#[derive(Debug, Clone)]
pub struct ToolMetrics {
    /// Total number of invocations.
    pub invocations: u64,

    /// Number of successful invocations.
    pub successes: u64,

    /// Number of failed invocations.
    pub failures: u64,

    /// Total time spent in this tool.
    pub total_duration: Duration,

    /// Minimum execution time.
    pub min_duration: Duration,

    /// Maximum execution time.
    pub max_duration: Duration,
}

impl ToolMetrics {
    /// Create new empty tool metrics.
    pub fn new() -> Self {
        Self {
            invocations: 0,
            successes: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
        }
    }

    /// Record a tool call.
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.min_duration = self.min_duration.min(duration);
        self.max_duration = self.max_duration.max(duration);
    }

    /// Calculate average execution time.
    pub fn avg_duration(&self) -> Duration {
        if self.invocations == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.invocations as u32
        }
    }

    /// Calculate success rate (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 {
            1.0
        } else {
            self.successes as f64 / self.invocations as f64
        }
    }
}

impl Default for ToolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation metrics with a latency histogram.
#[derive(Debug, Clone)]
pub struct OperationMetrics {
    /// Number of operations.
    pub count: u64,

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
            total_duration: Duration::ZERO,
            min_duration: Duration::MAX,
            max_duration: Duration::ZERO,
            histogram: Histogram::default(),
        }
    }

    /// Record an operation.
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
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
}

impl Default for OperationMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram with fixed buckets for latency tracking.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket upper bounds in microseconds.
    buckets: Vec<u64>,

    /// Count per bucket, plus one overflow bucket.
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

    /// Get bucket boundaries.
    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Approximate percentile as the upper bound of the bucket reaching it.
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

    /// Get p50 (median) latency.
    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    /// Get p99 latency.
    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 1ms, 10ms, 100ms, 1s, 10s, 60s: network round trips, not local calls.
        Self::with_buckets(vec![
            1_000, 10_000, 100_000, 1_000_000, 10_000_000, 60_000_000,
        ])
    }
}

/// A snapshot of all metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    /// Tool metrics keyed by `provider.tool`, sorted.
    pub tools: BTreeMap<String, ToolMetrics>,

    /// Operation metrics by name, sorted.
    pub operations: BTreeMap<String, OperationMetrics>,

    /// Failure counts by error kind.
    pub failures: BTreeMap<String, u64>,

    /// Total calls routed by the manager.
    pub routed_calls: u64,

    /// Uptime when snapshot was taken.
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Metrics Report ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!("Routed calls: {}\n\n", self.routed_calls));

        if !self.operations.is_empty() {
            report.push_str("Lifecycle:\n");
            for (name, metrics) in &self.operations {
                report.push_str(&format!(
                    "  {}: {} ops, avg {:.2?}, p99 {:.2?}\n",
                    name,
                    metrics.count,
                    metrics.avg_duration(),
                    metrics.histogram.p99()
                ));
            }
            report.push('\n');
        }

        if !self.tools.is_empty() {
            report.push_str("Tools:\n");
            for (name, metrics) in &self.tools {
                report.push_str(&format!(
                    "  {}: {} calls, {:.1}% success, avg {:.2?}\n",
                    name,
                    metrics.invocations,
                    metrics.success_rate() * 100.0,
                    metrics.avg_duration()
                ));
            }
            report.push('\n');
        }

        if !self.failures.is_empty() {
            report.push_str("Failures:\n");
            for (kind, count) in &self.failures {
                report.push_str(&format!("  {kind}: {count}\n"));
            }
        }

        report
    }
}
