//! Top-level deployment pipeline
//!
//! `Validating -> Reconciling -> AwaitingRollout -> VerifyingHealth -> Done`,
//! with any stage able to end the run in `Failed`. Stages run strictly in
//! order and a stage only starts after the previous one succeeded. The
//! outcome is a typed [`ExitOutcome`]; turning it into a process exit code
//! is left to the binary.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::cluster::{ClusterApi, ReconciledResource};
use crate::descriptor::ResourceDescriptor;
use crate::error::RolloutError;
use crate::health::{probe_for, HealthProbe, HealthSample, HealthVerifier};
use crate::observability::{DeployMetrics, RunLogger};
use crate::prereq::{ImageStore, PrereqReport, PrerequisiteChecker};
use crate::reconcile::{ConfigReconciler, NamespaceEnsurer, WorkloadReconciler};
use crate::retry::RetryPolicy;
use crate::rollout::{RolloutDiagnostics, RolloutStatus, RolloutWatcher};

#[cfg(test)]
mod tests;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Reconciling,
    AwaitingRollout,
    VerifyingHealth,
    Done,
    Failed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Reconciling => "reconciling",
            Stage::AwaitingRollout => "awaiting_rollout",
            Stage::VerifyingHealth => "verifying_health",
            Stage::Done => "done",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result class of a run, one per exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitOutcome {
    Success,
    FatalApplyFailure,
    PrereqFailure,
    /// Converged, but the application reported a non-healthy status
    Degraded,
    RolloutOrHealthTimeout,
}

impl ExitOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Success => 0,
            ExitOutcome::FatalApplyFailure => 1,
            ExitOutcome::PrereqFailure => 2,
            ExitOutcome::Degraded => 3,
            ExitOutcome::RolloutOrHealthTimeout => 4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ExitOutcome::Success => "success",
            ExitOutcome::FatalApplyFailure => "fatal",
            ExitOutcome::PrereqFailure => "prerequisites_not_met",
            ExitOutcome::Degraded => "degraded",
            ExitOutcome::RolloutOrHealthTimeout => "timeout",
        }
    }

    /// Leading marker of the terminal status line
    pub fn marker(&self) -> &'static str {
        match self {
            ExitOutcome::Success => "[OK]",
            ExitOutcome::Degraded => "[WARN]",
            _ => "[ERROR]",
        }
    }
}

/// Everything a run did, for the status line and the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: ExitOutcome,
    pub exit_code: i32,
    /// `Done`, or `Failed` with the stage that failed in `failed_stage`
    pub stage: Stage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    pub namespace: String,
    pub release: String,
    pub image: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prereq: Option<PrereqReport>,
    pub resources: Vec<ReconciledResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollout: Option<RolloutStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<RolloutDiagnostics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthSample>,
    pub elapsed_ms: u64,
}

impl RunReport {
    fn new(descriptor: &ResourceDescriptor) -> Self {
        Self {
            outcome: ExitOutcome::Success,
            exit_code: 0,
            stage: Stage::Validating,
            failed_stage: None,
            namespace: descriptor.namespace.clone(),
            release: descriptor.release_name.clone(),
            image: descriptor.image_reference(),
            message: String::new(),
            prereq: None,
            resources: Vec::new(),
            rollout: None,
            diagnostics: None,
            health: None,
            elapsed_ms: 0,
        }
    }

    /// Objects this run brought into existence
    pub fn created(&self) -> usize {
        self.resources.iter().filter(|r| r.created()).count()
    }

    pub fn changed(&self) -> usize {
        self.resources.iter().filter(|r| r.changed).count()
    }

    /// The single terminal line printed for automation
    pub fn status_line(&self) -> String {
        let body = match self.outcome {
            ExitOutcome::Success | ExitOutcome::Degraded => self.message.clone(),
            ExitOutcome::FatalApplyFailure => format!("fatal: {}", self.message),
            ExitOutcome::PrereqFailure => format!("prerequisites not met: {}", self.message),
            ExitOutcome::RolloutOrHealthTimeout => format!("timeout: {}", self.message),
        };
        format!("{} {}", self.outcome.marker(), body)
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{0} is required")]
    Missing(&'static str),
}

/// Why a stage ended the run
struct Failure {
    outcome: ExitOutcome,
    message: String,
}

impl Failure {
    fn new(outcome: ExitOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
        }
    }
}

pub struct Orchestrator {
    cluster: Arc<dyn ClusterApi>,
    images: Arc<dyn ImageStore>,
    probe: Option<Arc<dyn HealthProbe>>,
    logger: Option<RunLogger>,
    metrics: DeployMetrics,
}

impl Orchestrator {
    /// Run the whole pipeline once
    ///
    /// Never panics on cluster errors; every failure ends up in the report.
    pub async fn run(&self, descriptor: &ResourceDescriptor) -> RunReport {
        let started = Instant::now();
        let logger = self.logger.clone().unwrap_or_else(|| {
            RunLogger::new(&descriptor.namespace, &descriptor.release_name)
        });
        logger.log_run_started(
            "deploy",
            &descriptor.image_reference(),
            descriptor.replica_count,
        );

        let mut report = RunReport::new(descriptor);
        match self.execute(descriptor, &logger, &mut report).await {
            Ok(()) => report.stage = Stage::Done,
            Err((stage, failure)) => {
                report.stage = Stage::Failed;
                report.failed_stage = Some(stage);
                report.outcome = failure.outcome;
                report.message = failure.message;
            }
        }
        report.exit_code = report.outcome.exit_code();

        let elapsed = started.elapsed();
        report.elapsed_ms = elapsed.as_millis() as u64;
        logger.log_run_finished(
            report.outcome.label(),
            report.exit_code,
            elapsed,
            &report.message,
        );
        self.metrics
            .set_outcome(report.outcome.label(), report.exit_code);
        report
    }

    async fn execute(
        &self,
        d: &ResourceDescriptor,
        logger: &RunLogger,
        report: &mut RunReport,
    ) -> Result<(), (Stage, Failure)> {
        let retry = RetryPolicy::from_descriptor(d);

        let probe = self
            .stage(Stage::Validating, logger, async {
                d.validate().map_err(|e| {
                    Failure::new(
                        ExitOutcome::FatalApplyFailure,
                        format!("invalid descriptor: {}", e),
                    )
                })?;

                let checker = PrerequisiteChecker::new(
                    self.cluster.clone(),
                    self.images.clone(),
                    logger.clone(),
                );
                let prereq = checker
                    .check(d)
                    .await
                    .map_err(|e| Failure::new(ExitOutcome::PrereqFailure, e.to_string()))?;
                report.prereq = Some(prereq);

                match &self.probe {
                    Some(probe) => Ok(probe.clone()),
                    None => probe_for(d, self.cluster.clone()).map_err(|e| {
                        Failure::new(ExitOutcome::PrereqFailure, format!("health probe: {}", e))
                    }),
                }
            })
            .await?;

        self.stage(Stage::Reconciling, logger, async {
            let fatal = |e: crate::error::FatalError| {
                Failure::new(ExitOutcome::FatalApplyFailure, e.to_string())
            };

            let namespace = NamespaceEnsurer::new(
                self.cluster.clone(),
                retry.clone(),
                logger.clone(),
                self.metrics.clone(),
            );
            report
                .resources
                .push(namespace.ensure(&d.namespace).await.map_err(fatal)?);

            let config = ConfigReconciler::new(
                self.cluster.clone(),
                retry.clone(),
                logger.clone(),
                self.metrics.clone(),
            );
            report.resources.push(
                config
                    .apply(&d.namespace, &d.release_name, &d.environment)
                    .await
                    .map_err(fatal)?,
            );

            let workload = WorkloadReconciler::new(
                self.cluster.clone(),
                retry.clone(),
                logger.clone(),
                self.metrics.clone(),
            );
            report
                .resources
                .extend(workload.apply(d).await.map_err(fatal)?);
            Ok::<(), Failure>(())
        })
        .await?;

        let status = self
            .stage(Stage::AwaitingRollout, logger, async {
                let watcher =
                    RolloutWatcher::new(self.cluster.clone(), logger.clone(), self.metrics.clone());
                watcher.wait(d).await.map_err(|e| {
                    report.diagnostics = e.diagnostics().cloned();
                    let outcome = match &e {
                        RolloutError::TimedOut { .. } | RolloutError::Stalled { .. } => {
                            ExitOutcome::RolloutOrHealthTimeout
                        }
                        RolloutError::Status(_) => ExitOutcome::FatalApplyFailure,
                    };
                    let message = match e.diagnostics() {
                        Some(diagnostics) => format!("{} ({})", e, diagnostics.summary()),
                        None => e.to_string(),
                    };
                    Failure::new(outcome, message)
                })
            })
            .await?;
        report.rollout = Some(status.clone());

        let sample = self
            .stage(Stage::VerifyingHealth, logger, async {
                let verifier = HealthVerifier::new(probe, logger.clone(), self.metrics.clone());
                verifier
                    .verify(d)
                    .await
                    .map_err(|e| Failure::new(ExitOutcome::RolloutOrHealthTimeout, e.to_string()))
            })
            .await?;

        if sample.is_healthy() {
            report.outcome = ExitOutcome::Success;
            report.message = format!(
                "{} deployed: {}/{} replicas ready, health {}",
                d.release_name, status.ready_replicas, status.desired_replicas, sample.status
            );
        } else {
            report.outcome = ExitOutcome::Degraded;
            report.message = format!(
                "{} converged with {}/{} replicas but health status is '{}'",
                d.release_name, status.ready_replicas, status.desired_replicas, sample.status
            );
        }
        report.health = Some(sample);
        Ok(())
    }

    /// Log and time one stage
    async fn stage<T, F>(
        &self,
        stage: Stage,
        logger: &RunLogger,
        work: F,
    ) -> Result<T, (Stage, Failure)>
    where
        F: Future<Output = Result<T, Failure>>,
    {
        logger.log_stage_started(stage.as_str());
        let started = Instant::now();
        let result = work.await;
        let elapsed: Duration = started.elapsed();
        logger.log_stage_finished(stage.as_str(), elapsed, result.is_ok());
        self.metrics.observe_stage(stage.as_str(), elapsed);
        result.map_err(|failure| (stage, failure))
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    cluster: Option<Arc<dyn ClusterApi>>,
    images: Option<Arc<dyn ImageStore>>,
    probe: Option<Arc<dyn HealthProbe>>,
    logger: Option<RunLogger>,
    metrics: Option<DeployMetrics>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            cluster: None,
            images: None,
            probe: None,
            logger: None,
            metrics: None,
        }
    }

    pub fn cluster(mut self, cluster: Arc<dyn ClusterApi>) -> Self {
        self.cluster = Some(cluster);
        self
    }

    pub fn image_store(mut self, images: Arc<dyn ImageStore>) -> Self {
        self.images = Some(images);
        self
    }

    /// Override the probe chosen from the descriptor's health target
    pub fn health_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn logger(mut self, logger: RunLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn metrics(mut self, metrics: DeployMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Orchestrator, BuildError> {
        let cluster = self.cluster.ok_or(BuildError::Missing("cluster"))?;
        let images = self.images.ok_or(BuildError::Missing("image store"))?;

        Ok(Orchestrator {
            cluster,
            images,
            probe: self.probe,
            logger: self.logger,
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
