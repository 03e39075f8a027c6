//! Read-only post-deploy verification
//!
//! Inspects an existing release without changing anything and grades each
//! aspect PASS, WARN or FAIL.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cluster::ClusterApi;
use crate::descriptor::ResourceDescriptor;
use crate::error::PrereqError;
use crate::health::{select_pod, HealthProbe, HealthVerifier};
use crate::observability::{DeployMetrics, RunLogger};

/// Restart count above which a pod is reported as unstable
pub const RESTART_WARN_THRESHOLD: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl std::fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckStatus::Pass => write!(f, "PASS"),
            CheckStatus::Warn => write!(f, "WARN"),
            CheckStatus::Fail => write!(f, "FAIL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub server_version: String,
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    fn add(&mut self, name: &str, status: CheckStatus, message: impl Into<String>) {
        self.checks.push(CheckResult {
            name: name.to_string(),
            status,
            message: message.into(),
        });
    }

    fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }

    pub fn passed(&self) -> usize {
        self.count(CheckStatus::Pass)
    }

    pub fn warnings(&self) -> usize {
        self.count(CheckStatus::Warn)
    }

    pub fn failed(&self) -> usize {
        self.count(CheckStatus::Fail)
    }

    pub fn success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failed_names(&self) -> Vec<&str> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Fail)
            .map(|c| c.name.as_str())
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

pub struct Verifier {
    cluster: Arc<dyn ClusterApi>,
    health: HealthVerifier,
    logger: RunLogger,
    check_backend: bool,
}

impl Verifier {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        probe: Arc<dyn HealthProbe>,
        logger: RunLogger,
        metrics: DeployMetrics,
    ) -> Self {
        Self {
            health: HealthVerifier::new(probe, logger.clone(), metrics),
            cluster,
            logger,
            check_backend: false,
        }
    }

    /// Also check that the backend URL is reachable from inside a pod
    pub fn with_backend_check(mut self, enabled: bool) -> Self {
        self.check_backend = enabled;
        self
    }

    pub async fn run(&self, descriptor: &ResourceDescriptor) -> Result<VerificationReport, PrereqError> {
        let mut report = VerificationReport::default();

        report.server_version = match self.cluster.server_version().await {
            Ok(version) => version,
            Err(e) => {
                let failures = vec![format!("control plane unreachable: {}", e)];
                self.logger.log_prereq_failed(&failures);
                return Err(PrereqError { failures });
            }
        };

        self.check_namespace(descriptor, &mut report).await;
        self.check_deployment(descriptor, &mut report).await;
        self.check_pods(descriptor, &mut report).await;
        self.check_service(descriptor, &mut report).await;
        self.check_health(descriptor, &mut report).await;
        if self.check_backend {
            self.check_backend(descriptor, &mut report).await;
        }

        Ok(report)
    }

    async fn check_namespace(&self, d: &ResourceDescriptor, report: &mut VerificationReport) {
        match self.cluster.namespace_exists(&d.namespace).await {
            Ok(true) => report.add(
                "Namespace",
                CheckStatus::Pass,
                format!("Namespace '{}' exists", d.namespace),
            ),
            Ok(false) => report.add(
                "Namespace",
                CheckStatus::Fail,
                format!("Namespace '{}' not found", d.namespace),
            ),
            Err(e) => report.add("Namespace", CheckStatus::Fail, e.to_string()),
        }
    }

    async fn check_deployment(&self, d: &ResourceDescriptor, report: &mut VerificationReport) {
        let status = match self.cluster.rollout_status(&d.namespace, &d.release_name).await {
            Ok(status) => status,
            Err(e) if e.is_not_found() => {
                report.add(
                    "Deployment",
                    CheckStatus::Fail,
                    format!(
                        "Deployment '{}' not found in namespace '{}'",
                        d.release_name, d.namespace
                    ),
                );
                return;
            }
            Err(e) => {
                report.add("Deployment", CheckStatus::Fail, e.to_string());
                return;
            }
        };

        let desired = status.desired_replicas;
        let ready = status.ready_replicas;
        if ready == desired && status.available_replicas == desired {
            report.add(
                "Deployment",
                CheckStatus::Pass,
                format!("{}/{} replicas ready", ready, desired),
            );
        } else if ready > 0 {
            report.add(
                "Deployment",
                CheckStatus::Warn,
                format!(
                    "{}/{} replicas ready ({} available)",
                    ready, desired, status.available_replicas
                ),
            );
        } else {
            report.add(
                "Deployment",
                CheckStatus::Fail,
                format!("0/{} replicas ready", desired),
            );
        }
    }

    async fn check_pods(&self, d: &ResourceDescriptor, report: &mut VerificationReport) {
        let pods = match self.cluster.list_pods(&d.namespace, &d.selector()).await {
            Ok(pods) => pods,
            Err(e) => {
                report.add("Pods", CheckStatus::Fail, format!("Could not list pods: {}", e));
                return;
            }
        };
        if pods.is_empty() {
            report.add("Pods", CheckStatus::Fail, "No pods found");
            return;
        }

        let running = pods.iter().filter(|p| p.is_running()).count();
        let mut issues = Vec::new();
        for pod in &pods {
            if !pod.is_running() {
                issues.push(format!("{}: {}", pod.name, pod.phase));
            }
            if let (false, Some(reason)) = (pod.ready, &pod.waiting_reason) {
                issues.push(format!("{}: {}", pod.name, reason));
            }
            if pod.restarts > RESTART_WARN_THRESHOLD {
                issues.push(format!("{}: {} restarts", pod.name, pod.restarts));
            }
        }

        if !issues.is_empty() {
            report.add(
                "Pods",
                CheckStatus::Warn,
                format!("{} running, issues: {}", running, issues.join("; ")),
            );
        } else if running > 0 {
            report.add(
                "Pods",
                CheckStatus::Pass,
                format!("{}/{} pods running", running, pods.len()),
            );
        } else {
            report.add("Pods", CheckStatus::Fail, "No running pods");
        }
    }

    async fn check_service(&self, d: &ResourceDescriptor, report: &mut VerificationReport) {
        let name = d.service_name();
        let service = match self.cluster.service_summary(&d.namespace, &name).await {
            Ok(Some(service)) => service,
            Ok(None) => {
                report.add(
                    "Service",
                    CheckStatus::Fail,
                    format!("Service '{}' not found", name),
                );
                return;
            }
            Err(e) => {
                report.add("Service", CheckStatus::Fail, e.to_string());
                return;
            }
        };

        let Some(port) = service.ports.first() else {
            report.add("Service", CheckStatus::Fail, "No ports configured");
            return;
        };

        let node_port = port.node_port.unwrap_or(0);
        if node_port == i32::from(d.node_port) {
            report.add(
                "Service",
                CheckStatus::Pass,
                format!(
                    "{} port {} -> {}",
                    service.service_type,
                    node_port,
                    port.target_port.unwrap_or(port.port)
                ),
            );
        } else if node_port > 0 {
            report.add(
                "Service",
                CheckStatus::Warn,
                format!("NodePort is {}, expected {}", node_port, d.node_port),
            );
        } else {
            report.add("Service", CheckStatus::Fail, "NodePort not assigned");
        }
    }

    async fn check_health(&self, d: &ResourceDescriptor, report: &mut VerificationReport) {
        match self.health.verify(d).await {
            Ok(sample) if sample.is_healthy() => {
                report.add("Health Check", CheckStatus::Pass, "Endpoint healthy")
            }
            Ok(sample) => report.add(
                "Health Check",
                CheckStatus::Warn,
                format!("Status: {}", sample.status),
            ),
            Err(e) => report.add("Health Check", CheckStatus::Fail, e.to_string()),
        }
    }

    async fn check_backend(&self, d: &ResourceDescriptor, report: &mut VerificationReport) {
        const NAME: &str = "Backend Connectivity";

        let pods = self
            .cluster
            .list_pods(&d.namespace, &d.selector())
            .await
            .unwrap_or_default();
        let Some(pod) = select_pod(&pods, &d.image_reference())
            .or_else(|| pods.iter().find(|p| p.is_running()))
        else {
            report.add(NAME, CheckStatus::Warn, "No running pod for connectivity check");
            return;
        };

        let command: Vec<String> = ["wget", "-q", "-O", "-", "--timeout=10", d.backend_url.as_str()]
            .iter()
            .map(|s| s.to_string())
            .collect();

        match self.cluster.exec(&d.namespace, &pod.name, &command).await {
            Ok(output) if output.success => report.add(
                NAME,
                CheckStatus::Pass,
                format!("Backend reachable: {}", d.backend_url),
            ),
            Ok(output) => report.add(
                NAME,
                CheckStatus::Warn,
                format!(
                    "Backend not reachable: {} ({})",
                    d.backend_url,
                    output.message.unwrap_or_default()
                ),
            ),
            Err(e) => report.add(
                NAME,
                CheckStatus::Warn,
                format!("Backend not reachable: {} ({})", d.backend_url, e),
            ),
        }
    }
}
