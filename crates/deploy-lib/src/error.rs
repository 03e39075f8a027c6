//! Error types for the release pipeline
//!
//! Every stage returns its own typed error; the orchestrator folds them into
//! an [`ExitOutcome`](crate::orchestrator::ExitOutcome) at the very end.

use std::time::Duration;
use thiserror::Error;

use crate::cluster::ResourceKind;
use crate::rollout::{RolloutDiagnostics, RolloutPhase, RolloutStatus};

/// Failure talking to the cluster control plane
#[derive(Debug, Clone, Error)]
pub enum ClusterError {
    /// The API server answered with an error status
    #[error("api error {code} ({reason}): {message}")]
    Api {
        code: u16,
        reason: String,
        message: String,
    },

    /// The request never got an answer
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Client configuration (kubeconfig) could not be loaded
    #[error("client configuration error: {0}")]
    Config(String),

    /// Exec into a pod failed before the command produced a result
    #[error("exec error: {0}")]
    Exec(String),
}

impl ClusterError {
    pub fn api(code: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Returns true if repeating the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ClusterError::Api { code, .. } => *code == 429 || *code >= 500,
            ClusterError::Transport(_) => true,
            ClusterError::Decode(_) | ClusterError::Config(_) | ClusterError::Exec(_) => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::Api { code: 404, .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::Api { code: 409, reason, .. } if reason == "AlreadyExists")
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) => ClusterError::Api {
                code: response.code,
                reason: response.reason,
                message: response.message,
            },
            kube::Error::SerdeError(e) => ClusterError::Decode(e.to_string()),
            kube::Error::InferConfig(e) => ClusterError::Config(e.to_string()),
            other => ClusterError::Transport(other.to_string()),
        }
    }
}

/// A descriptor field failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct DescriptorError {
    pub field: &'static str,
    pub reason: String,
}

impl DescriptorError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// One or more prerequisite checks failed
#[derive(Debug, Clone, Error)]
#[error("{} prerequisite check(s) failed: {}", failures.len(), failures.join("; "))]
pub struct PrereqError {
    pub failures: Vec<String>,
}

impl PrereqError {
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

/// Applying a desired-state object failed and the run must stop
#[derive(Debug, Clone, Error)]
#[error("failed to apply {kind} {name}: {source}")]
pub struct FatalError {
    pub kind: ResourceKind,
    pub name: String,
    #[source]
    pub source: ClusterError,
}

/// The workload was accepted but did not converge
#[derive(Debug, Clone, Error)]
pub enum RolloutError {
    #[error("rollout did not converge within {}s", waited.as_secs())]
    TimedOut {
        waited: Duration,
        last_status: Option<RolloutStatus>,
        diagnostics: RolloutDiagnostics,
    },

    #[error("rollout stalled: {reason}")]
    Stalled {
        reason: String,
        last_status: RolloutStatus,
        diagnostics: RolloutDiagnostics,
    },

    #[error("failed to read rollout status: {0}")]
    Status(#[source] ClusterError),
}

impl RolloutError {
    pub fn diagnostics(&self) -> Option<&RolloutDiagnostics> {
        match self {
            RolloutError::TimedOut { diagnostics, .. } | RolloutError::Stalled { diagnostics, .. } => {
                Some(diagnostics)
            }
            RolloutError::Status(_) => None,
        }
    }

    /// Terminal watcher phase, `None` when the status could not be read
    pub fn phase(&self) -> Option<RolloutPhase> {
        match self {
            RolloutError::TimedOut { .. } => Some(RolloutPhase::TimedOut),
            RolloutError::Stalled { last_status, .. } => Some(last_status.phase()),
            RolloutError::Status(_) => None,
        }
    }
}

/// The application health endpoint could not be confirmed
#[derive(Debug, Clone, Error)]
pub enum HealthError {
    #[error("health unverified after {attempts} attempt(s): {last_error}")]
    Unverified { attempts: u32, last_error: String },
}
