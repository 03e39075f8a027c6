//! Observability for deployment runs
//!
//! Provides:
//! - Prometheus metrics (stage durations, applies, rollout polls, health attempts, outcome)
//! - Structured logging of pipeline events with tracing
//!
//! Neither type owns a sink. The binary decides where tracing events go
//! (the persistent run log) and whether the metric registry is written out.

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, TextEncoder,
};
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::cluster::ReconciledResource;
use crate::rollout::{RolloutDiagnostics, RolloutStatus};

/// Histogram buckets for stage durations (in seconds)
const STAGE_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<DeployMetricsInner> = OnceLock::new();

struct DeployMetricsInner {
    stage_duration_seconds: HistogramVec,
    applies: IntCounterVec,
    retries: IntCounterVec,
    rollout_polls: IntCounter,
    health_attempts: IntCounterVec,
    last_exit_code: IntGauge,
    last_outcome: IntGaugeVec,
}

impl DeployMetricsInner {
    fn new() -> Self {
        Self {
            stage_duration_seconds: register_histogram_vec!(
                "kdeploy_stage_duration_seconds",
                "Wall-clock time spent in each pipeline stage",
                &["stage"],
                STAGE_BUCKETS.to_vec()
            )
            .expect("Failed to register stage_duration_seconds"),

            applies: register_int_counter_vec!(
                "kdeploy_applies_total",
                "Declarative applies by resource kind and result",
                &["kind", "result"]
            )
            .expect("Failed to register applies_total"),

            retries: register_int_counter_vec!(
                "kdeploy_retries_total",
                "Retried control-plane operations after a transient error",
                &["operation"]
            )
            .expect("Failed to register retries_total"),

            rollout_polls: register_int_counter!(
                "kdeploy_rollout_polls_total",
                "Rollout status polls issued"
            )
            .expect("Failed to register rollout_polls_total"),

            health_attempts: register_int_counter_vec!(
                "kdeploy_health_attempts_total",
                "Health endpoint attempts by result",
                &["result"]
            )
            .expect("Failed to register health_attempts_total"),

            last_exit_code: register_int_gauge!(
                "kdeploy_last_exit_code",
                "Exit code of the most recent run"
            )
            .expect("Failed to register last_exit_code"),

            last_outcome: register_int_gauge_vec!(
                "kdeploy_last_outcome_info",
                "Outcome of the most recent run",
                &["outcome"]
            )
            .expect("Failed to register last_outcome_info"),
        }
    }
}

/// Handle to the process-wide deployment metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct DeployMetrics {
    _private: (),
}

impl Default for DeployMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl DeployMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(DeployMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &DeployMetricsInner {
        GLOBAL_METRICS.get_or_init(DeployMetricsInner::new)
    }

    pub fn observe_stage(&self, stage: &str, elapsed: Duration) {
        self.inner()
            .stage_duration_seconds
            .with_label_values(&[stage])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_apply(&self, resource: &ReconciledResource) {
        let result = if !resource.applied {
            "failed"
        } else if resource.created() {
            "created"
        } else if resource.changed {
            "updated"
        } else {
            "unchanged"
        };
        self.inner()
            .applies
            .with_label_values(&[resource.kind.as_str(), result])
            .inc();
    }

    pub fn inc_retries(&self, operation: &str) {
        self.inner().retries.with_label_values(&[operation]).inc();
    }

    pub fn inc_rollout_polls(&self) {
        self.inner().rollout_polls.inc();
    }

    pub fn inc_health_attempts(&self, passed: bool) {
        let result = if passed { "pass" } else { "fail" };
        self.inner().health_attempts.with_label_values(&[result]).inc();
    }

    pub fn set_outcome(&self, outcome: &str, exit_code: i32) {
        let inner = self.inner();
        inner.last_outcome.reset();
        inner.last_outcome.with_label_values(&[outcome]).set(1);
        inner.last_exit_code.set(i64::from(exit_code));
    }

    /// Render every registered metric in the text exposition format
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    /// Write the exposition for a node-exporter textfile collector
    pub fn write_textfile(&self, path: &Path) -> std::io::Result<()> {
        let text = self.encode_text().map_err(|e| std::io::Error::other(e.to_string()))?;
        // Rename keeps the collector from reading a half-written file
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)
    }
}

/// Structured logger for pipeline events
///
/// Every component receives a clone; each event carries the release it
/// belongs to so the run log can be filtered per release.
#[derive(Debug, Clone)]
pub struct RunLogger {
    namespace: String,
    release: String,
}

impl RunLogger {
    pub fn new(namespace: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            release: release.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn release(&self) -> &str {
        &self.release
    }

    pub fn log_run_started(&self, command: &str, image: &str, replicas: u32) {
        info!(
            event = "run_started",
            namespace = %self.namespace,
            release = %self.release,
            command = %command,
            image = %image,
            replicas = replicas,
            "Run started"
        );
    }

    pub fn log_stage_started(&self, stage: &str) {
        info!(
            event = "stage_started",
            namespace = %self.namespace,
            release = %self.release,
            stage = %stage,
            "Stage started"
        );
    }

    pub fn log_stage_finished(&self, stage: &str, elapsed: Duration, success: bool) {
        if success {
            info!(
                event = "stage_finished",
                namespace = %self.namespace,
                release = %self.release,
                stage = %stage,
                elapsed_ms = elapsed.as_millis() as u64,
                success = true,
                "Stage finished"
            );
        } else {
            warn!(
                event = "stage_finished",
                namespace = %self.namespace,
                release = %self.release,
                stage = %stage,
                elapsed_ms = elapsed.as_millis() as u64,
                success = false,
                "Stage failed"
            );
        }
    }

    pub fn log_prereq_warning(&self, check: &str, detail: &str) {
        warn!(
            event = "prereq_warning",
            namespace = %self.namespace,
            release = %self.release,
            check = %check,
            detail = %detail,
            "Prerequisite check raised a warning"
        );
    }

    pub fn log_prereq_failed(&self, failures: &[String]) {
        error!(
            event = "prereq_failed",
            namespace = %self.namespace,
            release = %self.release,
            failure_count = failures.len(),
            failures = ?failures,
            "Prerequisites not met"
        );
    }

    pub fn log_resource_reconciled(&self, resource: &ReconciledResource) {
        match &resource.error {
            None => info!(
                event = "resource_reconciled",
                namespace = %self.namespace,
                release = %self.release,
                kind = %resource.kind,
                name = %resource.name,
                existed_before = resource.existed_before,
                changed = resource.changed,
                "Resource reconciled"
            ),
            Some(err) => error!(
                event = "resource_reconcile_failed",
                namespace = %self.namespace,
                release = %self.release,
                kind = %resource.kind,
                name = %resource.name,
                error = %err,
                "Resource apply failed"
            ),
        }
    }

    pub fn log_retry(&self, operation: &str, attempt: u32, delay: Duration, err: &str) {
        warn!(
            event = "operation_retry",
            namespace = %self.namespace,
            release = %self.release,
            operation = %operation,
            attempt = attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Transient failure, retrying"
        );
    }

    pub fn log_rollout_poll(&self, status: &RolloutStatus, elapsed: Duration) {
        info!(
            event = "rollout_poll",
            namespace = %self.namespace,
            release = %self.release,
            phase = %status.phase(),
            desired = status.desired_replicas,
            ready = status.ready_replicas,
            updated = status.updated_replicas,
            total = status.total_replicas,
            condition_reason = ?status.condition_reason,
            elapsed_secs = elapsed.as_secs(),
            "Rollout status"
        );
    }

    pub fn log_rollout_poll_error(&self, err: &str, elapsed: Duration) {
        warn!(
            event = "rollout_poll_error",
            namespace = %self.namespace,
            release = %self.release,
            error = %err,
            elapsed_secs = elapsed.as_secs(),
            "Rollout status read failed, polling continues"
        );
    }

    pub fn log_rollout_diagnostics(&self, reason: &str, diagnostics: &RolloutDiagnostics) {
        error!(
            event = "rollout_diagnostics",
            namespace = %self.namespace,
            release = %self.release,
            reason = %reason,
            pod_count = diagnostics.pods.len(),
            event_count = diagnostics.events.len(),
            summary = %diagnostics.summary(),
            "Rollout did not converge"
        );
        for pod in &diagnostics.pods {
            error!(
                event = "rollout_diagnostic_pod",
                namespace = %self.namespace,
                release = %self.release,
                pod = %pod.name,
                phase = %pod.phase,
                ready = pod.ready,
                restarts = pod.restarts,
                waiting_reason = ?pod.waiting_reason,
                image = ?pod.image,
                "Pod state"
            );
        }
        for ev in &diagnostics.events {
            error!(
                event = "rollout_diagnostic_event",
                namespace = %self.namespace,
                release = %self.release,
                object = %ev.object,
                event_type = %ev.event_type,
                reason = %ev.reason,
                message = %ev.message,
                last_seen = ?ev.last_seen,
                "Cluster event"
            );
        }
    }

    pub fn log_health_attempt(&self, attempt: u32, max_attempts: u32, result: Result<&str, &str>) {
        match result {
            Ok(status) => info!(
                event = "health_attempt",
                namespace = %self.namespace,
                release = %self.release,
                attempt = attempt,
                max_attempts = max_attempts,
                status = %status,
                "Health endpoint answered"
            ),
            Err(err) => warn!(
                event = "health_attempt",
                namespace = %self.namespace,
                release = %self.release,
                attempt = attempt,
                max_attempts = max_attempts,
                error = %err,
                "Health attempt failed"
            ),
        }
    }

    pub fn log_run_finished(&self, outcome: &str, exit_code: i32, elapsed: Duration, message: &str) {
        if exit_code == 0 {
            info!(
                event = "run_finished",
                namespace = %self.namespace,
                release = %self.release,
                outcome = %outcome,
                exit_code = exit_code,
                elapsed_secs = elapsed.as_secs(),
                message = %message,
                "Run finished"
            );
        } else {
            error!(
                event = "run_finished",
                namespace = %self.namespace,
                release = %self.release,
                outcome = %outcome,
                exit_code = exit_code,
                elapsed_secs = elapsed.as_secs(),
                message = %message,
                "Run finished with errors"
            );
        }
    }
}
