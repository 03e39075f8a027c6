//! Rolling-update step model
//!
//! Mirrors how the Deployment controller moves replicas from the old pod set
//! to the new one under `maxSurge` / `maxUnavailable`. Each scale-up step
//! waits for the surged pods to pass readiness before old pods are removed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::descriptor::RolloutStrategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Initial,
    ScaleUpNew,
    ScaleDownOld,
}

impl std::fmt::Display for StepAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepAction::Initial => write!(f, "initial"),
            StepAction::ScaleUpNew => write!(f, "scale up new"),
            StepAction::ScaleDownOld => write!(f, "scale down old"),
        }
    }
}

/// Pod counts after one rollout step (all counted pods are ready)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStep {
    pub action: StepAction,
    pub old_pods: u32,
    pub new_pods: u32,
}

impl RolloutStep {
    pub fn total(&self) -> u32 {
        self.old_pods + self.new_pods
    }

    /// Pods able to serve traffic at this step
    pub fn ready_capacity(&self) -> u32 {
        self.old_pods + self.new_pods
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("desired replica count must be at least 1")]
    NoReplicas,
    #[error("rollout cannot make progress with max_surge=0 and max_unavailable=0")]
    NoProgress,
}

/// Ordered steps of a rolling update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutPlan {
    pub desired: u32,
    pub max_surge: u32,
    pub max_unavailable: u32,
    pub steps: Vec<RolloutStep>,
}

impl RolloutPlan {
    /// Simulate replacing `current_old` ready pods with `desired` new ones
    pub fn simulate(
        desired: u32,
        current_old: u32,
        strategy: &RolloutStrategy,
    ) -> Result<Self, PlanError> {
        if desired == 0 {
            return Err(PlanError::NoReplicas);
        }
        if strategy.max_surge == 0 && strategy.max_unavailable == 0 {
            return Err(PlanError::NoProgress);
        }

        let max_total = desired + strategy.max_surge;
        let min_ready = desired.saturating_sub(strategy.max_unavailable);

        let mut old = current_old;
        let mut new = 0u32;
        let mut steps = vec![RolloutStep {
            action: StepAction::Initial,
            old_pods: old,
            new_pods: new,
        }];

        while old > 0 || new < desired {
            let room = max_total.saturating_sub(old + new);
            let scale_up = room.min(desired - new);
            if scale_up > 0 {
                new += scale_up;
                steps.push(RolloutStep {
                    action: StepAction::ScaleUpNew,
                    old_pods: old,
                    new_pods: new,
                });
            }

            let scale_down = (old + new).saturating_sub(min_ready).min(old);
            if scale_down > 0 {
                old -= scale_down;
                steps.push(RolloutStep {
                    action: StepAction::ScaleDownOld,
                    old_pods: old,
                    new_pods: new,
                });
            }

            if scale_up == 0 && scale_down == 0 {
                return Err(PlanError::NoProgress);
            }
        }

        Ok(Self {
            desired,
            max_surge: strategy.max_surge,
            max_unavailable: strategy.max_unavailable,
            steps,
        })
    }

    pub fn max_total(&self) -> u32 {
        self.steps.iter().map(RolloutStep::total).max().unwrap_or(0)
    }

    pub fn min_ready_capacity(&self) -> u32 {
        self.steps
            .iter()
            .map(RolloutStep::ready_capacity)
            .min()
            .unwrap_or(0)
    }

    pub fn last(&self) -> Option<&RolloutStep> {
        self.steps.last()
    }
}
