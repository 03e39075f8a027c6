//! Access to the cluster control plane
//!
//! Every stage talks to the control plane through [`ClusterApi`]. The
//! production implementation is [`KubeCluster`]; tests use an in-memory fake.

mod kube_cluster;

pub use kube_cluster::{KubeCluster, FIELD_MANAGER};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service};
use serde::{Deserialize, Serialize};

use crate::error::ClusterError;
use crate::rollout::RolloutStatus;

/// Kind of a desired-state object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Namespace,
    ConfigMap,
    Deployment,
    Service,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::ConfigMap => "ConfigMap",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a declarative apply did to one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyResult {
    pub existed_before: bool,
    /// False when the control plane found nothing to change
    pub changed: bool,
}

/// Outcome of reconciling one desired-state object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledResource {
    pub kind: ResourceKind,
    pub name: String,
    pub existed_before: bool,
    pub applied: bool,
    pub changed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ReconciledResource {
    pub fn from_apply(kind: ResourceKind, name: impl Into<String>, result: ApplyResult) -> Self {
        Self {
            kind,
            name: name.into(),
            existed_before: result.existed_before,
            applied: true,
            changed: result.changed,
            error: None,
        }
    }

    pub fn failed(kind: ResourceKind, name: impl Into<String>, error: &ClusterError) -> Self {
        Self {
            kind,
            name: name.into(),
            existed_before: false,
            applied: false,
            changed: false,
            error: Some(error.to_string()),
        }
    }

    /// True if this reconciliation brought a new object into existence
    pub fn created(&self) -> bool {
        self.applied && !self.existed_before
    }
}

/// Snapshot of one pod belonging to a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSummary {
    pub name: String,
    pub phase: String,
    pub ready: bool,
    pub restarts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl PodSummary {
    pub fn is_running(&self) -> bool {
        self.phase == "Running"
    }
}

/// Cluster event related to a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSummary {
    pub object: String,
    pub event_type: String,
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<String>,
}

/// Port mapping of the network-exposure resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePortSummary {
    pub port: i32,
    pub target_port: Option<i32>,
    pub node_port: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub name: String,
    pub service_type: String,
    pub ports: Vec<ServicePortSummary>,
}

/// Captured result of a command run inside a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub success: bool,
    pub message: Option<String>,
}

/// Operations the pipeline needs from the control plane
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Liveness query against the API server, returns its version
    async fn server_version(&self) -> Result<String, ClusterError>;

    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), ClusterError>;

    async fn apply_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ApplyResult, ClusterError>;

    async fn apply_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<ApplyResult, ClusterError>;

    async fn apply_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<ApplyResult, ClusterError>;

    async fn rollout_status(&self, namespace: &str, name: &str)
        -> Result<RolloutStatus, ClusterError>;

    async fn list_pods(&self, namespace: &str, selector: &str)
        -> Result<Vec<PodSummary>, ClusterError>;

    async fn service_summary(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceSummary>, ClusterError>;

    /// Most recent events for objects whose name starts with `name_prefix`
    async fn recent_events(
        &self,
        namespace: &str,
        name_prefix: &str,
        limit: usize,
    ) -> Result<Vec<EventSummary>, ClusterError>;

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError>;
}
