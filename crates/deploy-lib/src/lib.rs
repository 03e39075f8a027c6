//! Release orchestration library for Kubernetes
//!
//! This crate provides the core functionality for:
//! - Validating a release descriptor and the cluster prerequisites
//! - Declarative reconciliation of namespace, config, workload and service
//! - Watching a rolling update until it converges or times out
//! - Verifying the application health endpoint
//! - Post-deploy verification reports, structured logs and metrics

pub mod cluster;
pub mod descriptor;
pub mod error;
pub mod health;
pub mod observability;
pub mod orchestrator;
pub mod prereq;
pub mod reconcile;
pub mod retry;
pub mod rollout;
pub mod verify;

#[cfg(test)]
mod testing;

pub use cluster::{ClusterApi, KubeCluster, ReconciledResource, ResourceKind};
pub use descriptor::{HealthTarget, ResourceDescriptor};
pub use error::{ClusterError, DescriptorError, FatalError, HealthError, PrereqError, RolloutError};
pub use health::{HealthProbe, HealthSample, HealthVerifier};
pub use observability::{DeployMetrics, RunLogger};
pub use orchestrator::{ExitOutcome, Orchestrator, OrchestratorBuilder, RunReport, Stage};
pub use prereq::{CliImageStore, ImageStore, PrerequisiteChecker};
pub use rollout::{RolloutPlan, RolloutStatus, RolloutWatcher};
pub use verify::{CheckStatus, VerificationReport, Verifier};
