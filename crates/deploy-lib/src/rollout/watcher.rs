//! Deadline-bounded polling of a workload's rollout status

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

use super::{RolloutDiagnostics, RolloutPhase, RolloutStatus};
use crate::cluster::ClusterApi;
use crate::descriptor::ResourceDescriptor;
use crate::error::RolloutError;
use crate::observability::{DeployMetrics, RunLogger};

/// Recent events captured when a rollout does not converge
pub const DIAGNOSTIC_EVENT_LIMIT: usize = 10;

/// Upper bound on each diagnostic read
pub const DIAGNOSTIC_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Polls the workload's rollout status until it converges or the deadline passes
pub struct RolloutWatcher {
    cluster: Arc<dyn ClusterApi>,
    logger: RunLogger,
    metrics: DeployMetrics,
}

impl RolloutWatcher {
    pub fn new(cluster: Arc<dyn ClusterApi>, logger: RunLogger, metrics: DeployMetrics) -> Self {
        Self {
            cluster,
            logger,
            metrics,
        }
    }

    /// Wait for every desired replica to run the new template and be ready
    ///
    /// Returns no later than one poll after `rollout_timeout_seconds`, plus the
    /// diagnostic reads. A status read gets whatever remains of the deadline,
    /// but at least one interval. Transient and unanswered reads are logged
    /// and polling continues; any other read failure ends the wait immediately.
    pub async fn wait(&self, descriptor: &ResourceDescriptor) -> Result<RolloutStatus, RolloutError> {
        let namespace = descriptor.namespace.as_str();
        let name = descriptor.release_name.as_str();
        let interval = descriptor.poll_interval();

        let started = Instant::now();
        let deadline = started + descriptor.rollout_timeout();
        let mut last_status: Option<RolloutStatus> = None;

        loop {
            self.metrics.inc_rollout_polls();

            let budget = deadline.saturating_duration_since(Instant::now()).max(interval);
            match timeout(budget, self.cluster.rollout_status(namespace, name)).await {
                Err(_) => {
                    self.logger.log_rollout_poll_error(
                        &format!("no response within {}s", budget.as_secs()),
                        started.elapsed(),
                    );
                }
                Ok(Ok(status)) => {
                    self.logger.log_rollout_poll(&status, started.elapsed());

                    if status.is_converged() {
                        return Ok(status);
                    }

                    if status.is_stalled() {
                        let reason = status
                            .condition_reason
                            .clone()
                            .unwrap_or_default();
                        let diagnostics = self.capture_diagnostics(descriptor).await;
                        self.logger.log_rollout_diagnostics(&reason, &diagnostics);
                        return Err(RolloutError::Stalled {
                            reason,
                            last_status: status,
                            diagnostics,
                        });
                    }

                    last_status = Some(status);
                }
                Ok(Err(e)) if e.is_transient() => {
                    self.logger
                        .log_rollout_poll_error(&e.to_string(), started.elapsed());
                }
                Ok(Err(e)) => return Err(RolloutError::Status(e)),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(interval.min(deadline - now)).await;
        }

        let waited = started.elapsed();
        let diagnostics = self.capture_diagnostics(descriptor).await;
        self.logger
            .log_rollout_diagnostics(&RolloutPhase::TimedOut.to_string(), &diagnostics);

        Err(RolloutError::TimedOut {
            waited,
            last_status,
            diagnostics,
        })
    }

    /// Pod states and recent events for the release
    ///
    /// Collection failures are recorded rather than returned, the caller is
    /// already reporting a failed rollout.
    pub async fn capture_diagnostics(&self, descriptor: &ResourceDescriptor) -> RolloutDiagnostics {
        let namespace = descriptor.namespace.as_str();
        let mut diagnostics = RolloutDiagnostics::default();
        let unanswered = || format!("no response within {}s", DIAGNOSTIC_READ_TIMEOUT.as_secs());

        match timeout(
            DIAGNOSTIC_READ_TIMEOUT,
            self.cluster.list_pods(namespace, &descriptor.selector()),
        )
        .await
        {
            Ok(Ok(pods)) => diagnostics.pods = pods,
            Ok(Err(e)) => diagnostics.errors.push(format!("list pods: {}", e)),
            Err(_) => diagnostics.errors.push(format!("list pods: {}", unanswered())),
        }

        match timeout(
            DIAGNOSTIC_READ_TIMEOUT,
            self.cluster
                .recent_events(namespace, &descriptor.release_name, DIAGNOSTIC_EVENT_LIMIT),
        )
        .await
        {
            Ok(Ok(events)) => diagnostics.events = events,
            Ok(Err(e)) => diagnostics.errors.push(format!("list events: {}", e)),
            Err(_) => diagnostics.errors.push(format!("list events: {}", unanswered())),
        }

        diagnostics
    }
}
