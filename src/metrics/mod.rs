use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Synchronization runs, status write-backs, skips and failures
// - Financial recompute outcomes (recomputed vs. payment-protected)
// - Audit entries written, by kind and automatic flag
// - Background jobs and the dead letter queue
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the order core
pub struct Metrics {
    registry: Registry,

    // Synchronization Metrics
    pub sync_runs: IntCounterVec,
    pub sync_duration: HistogramVec,
    pub status_writebacks: IntCounterVec,
    pub sync_skipped: IntCounterVec,
    pub sync_failures: IntCounterVec,

    // Finance Metrics
    pub recompute_outcomes: IntCounterVec,

    // Audit Metrics
    pub audit_entries: IntCounterVec,

    // Worker Metrics
    pub jobs_dispatched: IntCounterVec,
    pub jobs_failed: IntCounterVec,
    pub retry_attempts_total: IntCounterVec,

    // DLQ Metrics
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_job: IntCounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Synchronization Metrics
        let sync_runs = IntCounterVec::new(
            Opts::new("order_sync_runs_total", "Coordinator passes by triggering event"),
            &["event"],
        )?;
        registry.register(Box::new(sync_runs.clone()))?;

        let sync_duration = HistogramVec::new(
            HistogramOpts::new("order_sync_duration_seconds", "Coordinator request duration")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["event"],
        )?;
        registry.register(Box::new(sync_duration.clone()))?;

        let status_writebacks = IntCounterVec::new(
            Opts::new("order_status_writebacks_total", "Order status write-backs by authoritative source"),
            &["source"],
        )?;
        registry.register(Box::new(status_writebacks.clone()))?;

        let sync_skipped = IntCounterVec::new(
            Opts::new("order_sync_skipped_total", "Synchronization work skipped"),
            &["reason"],
        )?;
        registry.register(Box::new(sync_skipped.clone()))?;

        let sync_failures = IntCounterVec::new(
            Opts::new("order_sync_failures_total", "Synchronization handlers that failed and were swallowed"),
            &["event"],
        )?;
        registry.register(Box::new(sync_failures.clone()))?;

        // Finance Metrics
        let recompute_outcomes = IntCounterVec::new(
            Opts::new("order_recompute_total", "Financial recompute outcomes"),
            &["outcome"],
        )?;
        registry.register(Box::new(recompute_outcomes.clone()))?;

        // Audit Metrics
        let audit_entries = IntCounterVec::new(
            Opts::new("order_audit_entries_total", "Status log entries written"),
            &["kind", "automatic"],
        )?;
        registry.register(Box::new(audit_entries.clone()))?;

        // Worker Metrics
        let jobs_dispatched = IntCounterVec::new(
            Opts::new("order_jobs_dispatched_total", "Background jobs dispatched"),
            &["job"],
        )?;
        registry.register(Box::new(jobs_dispatched.clone()))?;

        let jobs_failed = IntCounterVec::new(
            Opts::new("order_jobs_failed_total", "Background jobs that failed after all attempts"),
            &["job"],
        )?;
        registry.register(Box::new(jobs_failed.clone()))?;

        let retry_attempts_total = IntCounterVec::new(
            Opts::new("retry_attempts_total", "Total retry attempts"),
            &["operation", "attempt"],
        )?;
        registry.register(Box::new(retry_attempts_total.clone()))?;

        // DLQ Metrics
        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Total jobs in dead letter queue",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_job = IntCounterVec::new(
            Opts::new("dlq_messages_by_job", "DLQ messages by job type"),
            &["job"],
        )?;
        registry.register(Box::new(dlq_messages_by_job.clone()))?;

        Ok(Self {
            registry,
            sync_runs,
            sync_duration,
            status_writebacks,
            sync_skipped,
            sync_failures,
            recompute_outcomes,
            audit_entries,
            jobs_dispatched,
            jobs_failed,
            retry_attempts_total,
            dlq_messages_total,
            dlq_messages_by_job,
        })
    }

    /// Get the Prometheus registry for exposing metrics via HTTP
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Helper to record one coordinator pass
    pub fn record_sync_run(&self, event: &str, duration_secs: f64) {
        self.sync_runs.with_label_values(&[event]).inc();
        self.sync_duration.with_label_values(&[event]).observe(duration_secs);
    }

    pub fn record_status_writeback(&self, source: &str) {
        self.status_writebacks.with_label_values(&[source]).inc();
    }

    pub fn record_sync_skipped(&self, reason: &str) {
        self.sync_skipped.with_label_values(&[reason]).inc();
    }

    pub fn record_sync_failure(&self, event: &str) {
        self.sync_failures.with_label_values(&[event]).inc();
    }

    pub fn record_recompute(&self, outcome: &str) {
        self.recompute_outcomes.with_label_values(&[outcome]).inc();
    }

    pub fn record_audit_entry(&self, kind: &str, automatic: bool) {
        let automatic = if automatic { "true" } else { "false" };
        self.audit_entries.with_label_values(&[kind, automatic]).inc();
    }

    pub fn record_job_dispatched(&self, job: &str) {
        self.jobs_dispatched.with_label_values(&[job]).inc();
    }

    pub fn record_job_failed(&self, job: &str) {
        self.jobs_failed.with_label_values(&[job]).inc();
    }

    /// Helper to record retry attempt
    pub fn record_retry_attempt(&self, operation: &str, attempt: u32) {
        self.retry_attempts_total.with_label_values(&[operation, &attempt.to_string()]).inc();
    }

    /// Helper to record DLQ message
    pub fn record_dlq_message(&self, job: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_job.with_label_values(&[job]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        metrics.record_sync_run("order_changed", 0.01);
        assert!(!metrics.registry().gather().is_empty());
    }

    #[test]
    fn test_record_writeback_by_source() {
        let metrics = Metrics::new().unwrap();
        metrics.record_status_writeback("manufacturing");
        metrics.record_status_writeback("manufacturing");
        metrics.record_status_writeback("installation");

        assert_eq!(metrics.status_writebacks.with_label_values(&["manufacturing"]).get(), 2);
        assert_eq!(metrics.status_writebacks.with_label_values(&["installation"]).get(), 1);
    }

    #[test]
    fn test_record_audit_entry_splits_automatic() {
        let metrics = Metrics::new().unwrap();
        metrics.record_audit_entry("status", true);
        metrics.record_audit_entry("status", false);
        metrics.record_audit_entry("status", true);

        assert_eq!(metrics.audit_entries.with_label_values(&["status", "true"]).get(), 2);
        assert_eq!(metrics.audit_entries.with_label_values(&["status", "false"]).get(), 1);
    }

    #[test]
    fn test_record_dlq_message() {
        let metrics = Metrics::new().unwrap();
        metrics.record_dlq_message("recompute_totals");
        metrics.record_dlq_message("upload_contract");

        assert_eq!(metrics.dlq_messages_total.get(), 2);
        assert_eq!(metrics.dlq_messages_by_job.with_label_values(&["upload_contract"]).get(), 1);
    }
}
