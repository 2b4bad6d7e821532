//! Observability infrastructure for the verification service
//!
//! Provides:
//! - Prometheus metrics (tick latency, delegated tasks, local analyses, terminal jobs)
//! - Structured JSON logging with tracing

use crate::models::{AnalysisType, ComparisonStrategy, JobStatus, RiskLevel};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<VerifierMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct VerifierMetricsInner {
    tick_latency_seconds: Histogram,
    ticks: IntCounter,
    tasks_enqueued: IntCounter,
    tasks_declined: IntCounter,
    local_analyses: IntCounter,
    groups_skipped: IntCounter,
    jobs_registered: IntCounter,
    jobs_terminal: IntCounterVec,
    cleanup_failures: IntCounterVec,
    jobs_active: IntGauge,
}

impl VerifierMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "verifier_tick_latency_seconds",
                "Time spent running one verification job tick",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            ticks: register_int_counter!(
                "verifier_ticks_total",
                "Total number of verification job ticks executed"
            )
            .expect("Failed to register ticks"),

            tasks_enqueued: register_int_counter!(
                "verifier_tasks_enqueued_total",
                "Total number of analysis tasks accepted by the learning engine"
            )
            .expect("Failed to register tasks_enqueued"),

            tasks_declined: register_int_counter!(
                "verifier_tasks_declined_total",
                "Total number of analysis tasks declined by the learning engine"
            )
            .expect("Failed to register tasks_declined"),

            local_analyses: register_int_counter!(
                "verifier_local_analyses_total",
                "Total number of analyses computed locally"
            )
            .expect("Failed to register local_analyses"),

            groups_skipped: register_int_counter!(
                "verifier_groups_skipped_total",
                "Total number of group passes skipped for lack of new data"
            )
            .expect("Failed to register groups_skipped"),

            jobs_registered: register_int_counter!(
                "verifier_jobs_registered_total",
                "Total number of verification jobs registered"
            )
            .expect("Failed to register jobs_registered"),

            jobs_terminal: register_int_counter_vec!(
                "verifier_jobs_terminal_total",
                "Total number of verification jobs reaching a terminal status",
                &["status"]
            )
            .expect("Failed to register jobs_terminal"),

            cleanup_failures: register_int_counter_vec!(
                "verifier_cleanup_failures_total",
                "Total number of failed best-effort cleanup actions",
                &["action"]
            )
            .expect("Failed to register cleanup_failures"),

            jobs_active: register_int_gauge!(
                "verifier_jobs_active",
                "Number of verification jobs currently scheduled"
            )
            .expect("Failed to register jobs_active"),
        }
    }
}

/// Verifier metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct VerifierMetrics {
    _private: (),
}

impl Default for VerifierMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl VerifierMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(VerifierMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &VerifierMetricsInner {
        GLOBAL_METRICS.get_or_init(VerifierMetricsInner::new)
    }

    /// Record one tick and its latency
    pub fn observe_tick(&self, duration_secs: f64) {
        self.inner().ticks.inc();
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn inc_tasks_enqueued(&self) {
        self.inner().tasks_enqueued.inc();
    }

    pub fn inc_tasks_declined(&self) {
        self.inner().tasks_declined.inc();
    }

    pub fn inc_local_analyses(&self) {
        self.inner().local_analyses.inc();
    }

    pub fn inc_groups_skipped(&self) {
        self.inner().groups_skipped.inc();
    }

    pub fn inc_jobs_registered(&self) {
        self.inner().jobs_registered.inc();
    }

    pub fn inc_jobs_terminal(&self, status: JobStatus) {
        self.inner()
            .jobs_terminal
            .with_label_values(&[&status.to_string()])
            .inc();
    }

    pub fn inc_cleanup_failures(&self, action: &str) {
        self.inner()
            .cleanup_failures
            .with_label_values(&[action])
            .inc();
    }

    pub fn set_jobs_active(&self, count: i64) {
        self.inner().jobs_active.set(count);
    }
}

/// Structured logger for verification events
///
/// Provides consistent JSON-formatted logging for job lifecycle,
/// delegated tasks, and local analyses.
#[derive(Clone)]
pub struct StructuredLogger {
    service_name: String,
}

impl StructuredLogger {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn log_job_registered(
        &self,
        state_execution_id: &str,
        workflow_execution_id: &str,
        strategy: ComparisonStrategy,
        start_minute: i64,
        duration_minutes: i64,
    ) {
        info!(
            event = "job_registered",
            service = %self.service_name,
            state_execution_id = %state_execution_id,
            workflow_execution_id = %workflow_execution_id,
            comparison_strategy = %strategy,
            start_minute = start_minute,
            duration_minutes = duration_minutes,
            "Verification job registered"
        );
    }

    pub fn log_job_started(&self, state_execution_id: &str) {
        info!(
            event = "job_started",
            service = %self.service_name,
            state_execution_id = %state_execution_id,
            "Verification job running"
        );
    }

    pub fn log_analysis_enqueued(
        &self,
        state_execution_id: &str,
        group_name: &str,
        analysis_minute: i64,
        task_id: &str,
        analysis_type: AnalysisType,
    ) {
        info!(
            event = "analysis_enqueued",
            service = %self.service_name,
            state_execution_id = %state_execution_id,
            group = %group_name,
            analysis_minute = analysis_minute,
            task_id = %task_id,
            analysis_type = ?analysis_type,
            "Analysis task enqueued with learning engine"
        );
    }

    pub fn log_local_analysis(
        &self,
        state_execution_id: &str,
        group_name: &str,
        analysis_minute: i64,
        risk: RiskLevel,
        reason: &str,
    ) {
        info!(
            event = "local_analysis_saved",
            service = %self.service_name,
            state_execution_id = %state_execution_id,
            group = %group_name,
            analysis_minute = analysis_minute,
            risk = %risk,
            reason = %reason,
            "Local analysis saved"
        );
    }

    pub fn log_stale_cursor(&self, state_execution_id: &str, group_name: &str, minute: i64) {
        warn!(
            event = "cursor_stale",
            service = %self.service_name,
            state_execution_id = %state_execution_id,
            group = %group_name,
            analysis_minute = minute,
            "Cursor already at or past minute, another tick processed it"
        );
    }

    pub fn log_job_terminal(&self, state_execution_id: &str, status: JobStatus, message: Option<&str>) {
        match status {
            JobStatus::Error | JobStatus::Failed => {
                warn!(
                    event = "job_terminal",
                    service = %self.service_name,
                    state_execution_id = %state_execution_id,
                    status = %status,
                    message = ?message,
                    "Verification job finished unsuccessfully"
                );
            }
            _ => {
                info!(
                    event = "job_terminal",
                    service = %self.service_name,
                    state_execution_id = %state_execution_id,
                    status = %status,
                    message = ?message,
                    "Verification job finished"
                );
            }
        }
    }

    pub fn log_cleanup_failure(&self, state_execution_id: &str, action: &str, error: &str) {
        warn!(
            event = "cleanup_failed",
            service = %self.service_name,
            state_execution_id = %state_execution_id,
            action = %action,
            error = %error,
            "Best-effort cleanup failed"
        );
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str) {
        info!(
            event = "service_started",
            service = %self.service_name,
            version = %version,
            "Verification service started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            service = %self.service_name,
            reason = %reason,
            "Verification service shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verifier_metrics_creation() {
        let metrics = VerifierMetrics::new();

        metrics.observe_tick(0.002);
        metrics.inc_tasks_enqueued();
        metrics.inc_local_analyses();
        metrics.inc_jobs_terminal(JobStatus::Success);
        metrics.inc_cleanup_failures("notify");
        metrics.set_jobs_active(3);
    }

    #[test]
    fn test_metrics_handles_share_registry() {
        let first = VerifierMetrics::new();
        let second = first.clone();
        first.inc_groups_skipped();
        second.inc_groups_skipped();

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "verifier_groups_skipped_total"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("verifier-test");
        assert_eq!(logger.service_name, "verifier-test");
    }
}
