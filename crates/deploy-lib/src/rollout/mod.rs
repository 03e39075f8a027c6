//! Rollout observation
//!
//! The control plane converges the workload asynchronously. This module only
//! observes that process: [`RolloutWatcher`] polls [`RolloutStatus`]
//! snapshots until convergence or deadline, and [`RolloutPlan`] models the
//! step sequence a rolling update goes through.

mod plan;
mod watcher;

pub use plan::{PlanError, RolloutPlan, RolloutStep, StepAction};
pub use watcher::{RolloutWatcher, DIAGNOSTIC_EVENT_LIMIT};

use k8s_openapi::api::apps::v1::Deployment;
use serde::{Deserialize, Serialize};

use crate::cluster::{EventSummary, PodSummary};

/// Condition reason the control plane sets when a rollout exceeds its progress deadline
pub const PROGRESS_DEADLINE_EXCEEDED: &str = "ProgressDeadlineExceeded";

/// Snapshot of the workload's rollout as reported by the control plane
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStatus {
    pub desired_replicas: i32,
    pub ready_replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
    /// Pods of every version, old ones included
    pub total_replicas: i32,
    pub generation: i64,
    pub observed_generation: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition_reason: Option<String>,
}

impl RolloutStatus {
    pub fn from_deployment(deployment: &Deployment) -> Self {
        let desired = deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        let status = deployment.status.clone().unwrap_or_default();
        let condition_reason = status
            .conditions
            .as_ref()
            .and_then(|conds| conds.iter().find(|c| c.type_ == "Progressing"))
            .and_then(|c| c.reason.clone());

        Self {
            desired_replicas: desired,
            ready_replicas: status.ready_replicas.unwrap_or(0),
            updated_replicas: status.updated_replicas.unwrap_or(0),
            available_replicas: status.available_replicas.unwrap_or(0),
            total_replicas: status.replicas.unwrap_or(0),
            generation: deployment.metadata.generation.unwrap_or(0),
            observed_generation: status.observed_generation.unwrap_or(0),
            condition_reason,
        }
    }

    /// All desired replicas run the new template, are ready, and no old pod is left
    pub fn is_converged(&self) -> bool {
        self.observed_generation >= self.generation
            && self.ready_replicas == self.desired_replicas
            && self.updated_replicas == self.desired_replicas
            && self.total_replicas == self.desired_replicas
    }

    pub fn is_stalled(&self) -> bool {
        self.condition_reason.as_deref() == Some(PROGRESS_DEADLINE_EXCEEDED)
    }

    pub fn phase(&self) -> RolloutPhase {
        if self.is_converged() {
            RolloutPhase::Converged
        } else if self.observed_generation < self.generation
            || (self.updated_replicas == 0 && self.ready_replicas == 0)
        {
            RolloutPhase::Pending
        } else {
            RolloutPhase::Progressing
        }
    }
}

/// Watcher state machine: `Pending -> Progressing -> Converged | TimedOut`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    Pending,
    Progressing,
    Converged,
    TimedOut,
}

impl std::fmt::Display for RolloutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RolloutPhase::Pending => write!(f, "pending"),
            RolloutPhase::Progressing => write!(f, "progressing"),
            RolloutPhase::Converged => write!(f, "converged"),
            RolloutPhase::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Context captured when a rollout does not converge
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutDiagnostics {
    pub pods: Vec<PodSummary>,
    pub events: Vec<EventSummary>,
    /// Diagnostics that could not be collected
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl RolloutDiagnostics {
    /// One-line digest suitable for the terminal status line
    pub fn summary(&self) -> String {
        let pods = self
            .pods
            .iter()
            .map(|p| match &p.waiting_reason {
                Some(reason) => format!("{}={}({})", p.name, p.phase, reason),
                None => format!("{}={}", p.name, p.phase),
            })
            .collect::<Vec<_>>()
            .join(",");
        let last_event = self
            .events
            .last()
            .map(|e| format!("{}: {}", e.reason, e.message))
            .unwrap_or_else(|| "none".to_string());
        format!("pods=[{}] last_event=[{}]", pods, last_event)
    }
}
