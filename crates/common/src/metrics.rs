//! Metrics collection for pelago.
//!
//! Counters for the asynchronous task-processing subsystem. Live gauges
//! (busy workers, queue backlog) are read directly from the worker pools at
//! scrape time; this module tracks the monotonic counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics instance.
static METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// Get the global metrics instance.
pub fn get_metrics() -> &'static Arc<Metrics> {
    METRICS.get_or_init(|| Arc::new(Metrics::new()))
}

/// Application metrics collector.
#[derive(Debug)]
pub struct Metrics {
    // === Worker Pool Metrics ===
    /// Messages processed successfully, all pipelines.
    pub messages_processed: AtomicU64,
    /// Messages whose processing function returned an error.
    pub messages_failed: AtomicU64,

    // === Delivery Metrics ===
    /// Outbound delivery attempts.
    pub deliveries_attempted: AtomicU64,
    /// Deliveries accepted by the remote inbox.
    pub deliveries_succeeded: AtomicU64,
    /// Deliveries re-queued for a backoff retry.
    pub deliveries_retried: AtomicU64,
    /// Deliveries dropped after exhausting retries or on permanent errors.
    pub deliveries_dropped: AtomicU64,

    // === Scheduler Metrics ===
    /// Recurring job firings.
    pub scheduler_fires: AtomicU64,
    /// Recurring job callbacks that returned an error.
    pub scheduler_errors: AtomicU64,

    // === Sandbox Metrics ===
    /// Sandboxed transcoder invocations.
    pub sandbox_runs: AtomicU64,
    /// Sandboxed units torn down after a failed run.
    pub sandbox_unit_resets: AtomicU64,

    // === Durable Queue Metrics ===
    /// Queued messages persisted at shutdown.
    pub tasks_persisted: AtomicU64,
    /// Persisted messages recovered at startup.
    pub tasks_recovered: AtomicU64,

    // === Web Push Metrics ===
    /// Push notifications sent.
    pub push_sent: AtomicU64,
    /// Push notifications that failed to send.
    pub push_failed: AtomicU64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages_processed: AtomicU64::new(0),
            messages_failed: AtomicU64::new(0),

            deliveries_attempted: AtomicU64::new(0),
            deliveries_succeeded: AtomicU64::new(0),
            deliveries_retried: AtomicU64::new(0),
            deliveries_dropped: AtomicU64::new(0),

            scheduler_fires: AtomicU64::new(0),
            scheduler_errors: AtomicU64::new(0),

            sandbox_runs: AtomicU64::new(0),
            sandbox_unit_resets: AtomicU64::new(0),

            tasks_persisted: AtomicU64::new(0),
            tasks_recovered: AtomicU64::new(0),

            push_sent: AtomicU64::new(0),
            push_failed: AtomicU64::new(0),
        }
    }

    /// Record the outcome of one processed message.
    pub fn record_message(&self, success: bool) {
        if success {
            self.messages_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.messages_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a delivery attempt outcome.
    pub fn record_delivery(&self, outcome: DeliveryOutcome) {
        self.deliveries_attempted.fetch_add(1, Ordering::Relaxed);
        match outcome {
            DeliveryOutcome::Succeeded => {
                self.deliveries_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryOutcome::Retried => {
                self.deliveries_retried.fetch_add(1, Ordering::Relaxed);
            }
            DeliveryOutcome::Dropped => {
                self.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Record a scheduler firing.
    pub fn record_scheduler_fire(&self, success: bool) {
        self.scheduler_fires.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.scheduler_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a sandboxed transcoder invocation.
    pub fn record_sandbox_run(&self, unit_reset: bool) {
        self.sandbox_runs.fetch_add(1, Ordering::Relaxed);
        if unit_reset {
            self.sandbox_unit_resets.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record persisted queue tasks.
    pub fn record_tasks_persisted(&self, count: u64) {
        self.tasks_persisted.fetch_add(count, Ordering::Relaxed);
    }

    /// Record recovered queue tasks.
    pub fn record_tasks_recovered(&self, count: u64) {
        self.tasks_recovered.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a push notification outcome.
    pub fn record_push(&self, success: bool) {
        if success {
            self.push_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.push_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get a snapshot of all metrics.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            deliveries_attempted: self.deliveries_attempted.load(Ordering::Relaxed),
            deliveries_succeeded: self.deliveries_succeeded.load(Ordering::Relaxed),
            deliveries_retried: self.deliveries_retried.load(Ordering::Relaxed),
            deliveries_dropped: self.deliveries_dropped.load(Ordering::Relaxed),
            scheduler_fires: self.scheduler_fires.load(Ordering::Relaxed),
            scheduler_errors: self.scheduler_errors.load(Ordering::Relaxed),
            sandbox_runs: self.sandbox_runs.load(Ordering::Relaxed),
            sandbox_unit_resets: self.sandbox_unit_resets.load(Ordering::Relaxed),
            tasks_persisted: self.tasks_persisted.load(Ordering::Relaxed),
            tasks_recovered: self.tasks_recovered.load(Ordering::Relaxed),
            push_sent: self.push_sent.load(Ordering::Relaxed),
            push_failed: self.push_failed.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus format.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut output = String::new();

        let mut counter = |name: &str, help: &str, value: u64| {
            output.push_str(&format!("# HELP pelago_{name} {help}\n"));
            output.push_str(&format!("# TYPE pelago_{name} counter\n"));
            output.push_str(&format!("pelago_{name} {value}\n"));
        };

        counter(
            "messages_processed",
            "Messages processed successfully",
            snapshot.messages_processed,
        );
        counter(
            "messages_failed",
            "Messages whose processing failed",
            snapshot.messages_failed,
        );
        counter(
            "deliveries_attempted",
            "Outbound delivery attempts",
            snapshot.deliveries_attempted,
        );
        counter(
            "deliveries_succeeded",
            "Deliveries accepted by remote inboxes",
            snapshot.deliveries_succeeded,
        );
        counter(
            "deliveries_retried",
            "Deliveries re-queued for retry",
            snapshot.deliveries_retried,
        );
        counter(
            "deliveries_dropped",
            "Deliveries dropped permanently",
            snapshot.deliveries_dropped,
        );
        counter(
            "scheduler_fires",
            "Recurring job firings",
            snapshot.scheduler_fires,
        );
        counter(
            "scheduler_errors",
            "Recurring job callback errors",
            snapshot.scheduler_errors,
        );
        counter(
            "sandbox_runs",
            "Sandboxed transcoder invocations",
            snapshot.sandbox_runs,
        );
        counter(
            "sandbox_unit_resets",
            "Sandboxed units torn down after failure",
            snapshot.sandbox_unit_resets,
        );
        counter(
            "tasks_persisted",
            "Queued messages persisted at shutdown",
            snapshot.tasks_persisted,
        );
        counter(
            "tasks_recovered",
            "Persisted messages recovered at startup",
            snapshot.tasks_recovered,
        );
        counter("push_sent", "Push notifications sent", snapshot.push_sent);
        counter(
            "push_failed",
            "Push notifications that failed",
            snapshot.push_failed,
        );

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Remote inbox accepted the activity.
    Succeeded,
    /// Transient failure, re-queued with backoff.
    Retried,
    /// Permanent failure or retries exhausted.
    Dropped,
}

/// Snapshot of all metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub deliveries_attempted: u64,
    pub deliveries_succeeded: u64,
    pub deliveries_retried: u64,
    pub deliveries_dropped: u64,
    pub scheduler_fires: u64,
    pub scheduler_errors: u64,
    pub sandbox_runs: u64,
    pub sandbox_unit_resets: u64,
    pub tasks_persisted: u64,
    pub tasks_recovered: u64,
    pub push_sent: u64,
    pub push_failed: u64,
}
