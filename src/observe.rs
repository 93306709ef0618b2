//! Metrics and alert sinks.
//!
//! The core emits counters, gauges, and alerts through these traits; what
//! backs them (Prometheus, a hosted alert service, a log pipeline) is the
//! embedder's choice. [`RecordingMetrics`]/[`RecordingAlerts`] keep
//! everything in memory for tests and scraping; [`TracingMetrics`]/
//! [`TracingAlerts`] turn emissions into structured `tracing` events.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Mutex;

use crate::queue::TaskStatus;

/// Result label values for the `migration_jobs_total` counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobResult {
    Copied,
    Noop,
    MissingSource,
    Blocked,
    Deleted,
    Error,
    CleanupError,
}

impl JobResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobResult::Copied => "copied",
            JobResult::Noop => "noop",
            JobResult::MissingSource => "missing_source",
            JobResult::Blocked => "blocked",
            JobResult::Deleted => "deleted",
            JobResult::Error => "error",
            JobResult::CleanupError => "cleanup_error",
        }
    }
}

impl std::fmt::Display for JobResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An emitted alert, as the sink received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Alert {
    pub name: String,
    pub severity: Severity,
    pub message: String,
    pub metadata: serde_json::Value,
}

/// Counter and gauge sink.
pub trait MetricsSink: Send + Sync + Debug {
    /// Increment `migration_jobs_total{result}`.
    fn incr_job_result(&self, result: JobResult);

    /// Set `migration_queue_gauge{status}`.
    fn set_queue_depth(&self, status: TaskStatus, count: u64);
}

/// Alert sink. The core always emits; deduplication and suppression are the
/// sink's responsibility.
pub trait AlertSink: Send + Sync + Debug {
    fn create_alert(&self, name: &str, severity: Severity, message: &str, metadata: serde_json::Value);
}

// ── In-memory sinks ───────────────────────────────────────────────────────

/// Metrics sink that keeps counters and gauges in memory, for tests and for
/// embedders that scrape.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    jobs: Mutex<BTreeMap<JobResult, u64>>,
    gauges: Mutex<BTreeMap<TaskStatus, u64>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `migration_jobs_total{result}`.
    pub fn job_count(&self, result: JobResult) -> u64 {
        self.jobs
            .lock()
            .expect("poisoned lock")
            .get(&result)
            .copied()
            .unwrap_or(0)
    }

    /// Current value of `migration_queue_gauge{status}`, zero until first set.
    pub fn queue_depth(&self, status: TaskStatus) -> u64 {
        self.gauges
            .lock()
            .expect("poisoned lock")
            .get(&status)
            .copied()
            .unwrap_or(0)
    }
}

impl MetricsSink for RecordingMetrics {
    fn incr_job_result(&self, result: JobResult) {
        *self
            .jobs
            .lock()
            .expect("poisoned lock")
            .entry(result)
            .or_insert(0) += 1;
    }

    fn set_queue_depth(&self, status: TaskStatus, count: u64) {
        self.gauges
            .lock()
            .expect("poisoned lock")
            .insert(status, count);
    }
}

/// Alert sink that records every alert in memory.
#[derive(Debug, Default)]
pub struct RecordingAlerts {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    /// All alerts emitted so far, in order.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().expect("poisoned lock").clone()
    }

    /// Drain the recorded alerts.
    pub fn take(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock().expect("poisoned lock"))
    }
}

impl AlertSink for RecordingAlerts {
    fn create_alert(&self, name: &str, severity: Severity, message: &str, metadata: serde_json::Value) {
        self.alerts.lock().expect("poisoned lock").push(Alert {
            name: name.to_string(),
            severity,
            message: message.to_string(),
            metadata,
        });
    }
}

// ── Tracing sinks ─────────────────────────────────────────────────────────

/// Metrics sink that emits structured `tracing` events, one per update.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn incr_job_result(&self, result: JobResult) {
        tracing::info!(counter = "migration_jobs_total", result = %result, "metric");
    }

    fn set_queue_depth(&self, status: TaskStatus, count: u64) {
        tracing::debug!(gauge = "migration_queue_gauge", status = %status, count, "metric");
    }
}

/// Alert sink that logs alerts through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlerts;

impl AlertSink for TracingAlerts {
    fn create_alert(&self, name: &str, severity: Severity, message: &str, metadata: serde_json::Value) {
        tracing::warn!(alert = name, severity = %severity, %metadata, "{message}");
    }
}
