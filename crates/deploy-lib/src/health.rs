//! Application-level health verification
//!
//! Runs only after the rollout converged. A converged rollout proves the
//! container passed its readiness probe; this checks that the application
//! itself reports a status through its health endpoint.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::cluster::{ClusterApi, PodSummary};
use crate::descriptor::{HealthTarget, ResourceDescriptor};
use crate::error::{ClusterError, HealthError};
use crate::observability::{DeployMetrics, RunLogger};

/// Status values treated as fully healthy (case-insensitive)
pub const HEALTHY_STATUSES: &[&str] = &["healthy", "ok", "up", "pass"];

/// Upper bound on a single health attempt, exec or HTTP
pub const HEALTH_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

/// One parsed health endpoint response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSample {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    pub raw: String,
}

impl HealthSample {
    /// Accepts a JSON object with a string `status` field
    pub fn parse(raw: &str) -> Result<Self, String> {
        let value: serde_json::Value = serde_json::from_str(raw.trim())
            .map_err(|_| format!("response is not JSON: {}", truncate(raw, 100)))?;
        let object = value
            .as_object()
            .ok_or_else(|| "response is not a JSON object".to_string())?;
        let status = object
            .get("status")
            .and_then(|s| s.as_str())
            .ok_or_else(|| "response has no status field".to_string())?;

        Ok(Self {
            status: status.to_string(),
            timestamp: object
                .get("timestamp")
                .and_then(|t| t.as_str())
                .map(str::to_string),
            raw: raw.trim().to_string(),
        })
    }

    pub fn is_healthy(&self) -> bool {
        HEALTHY_STATUSES
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&self.status))
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("no running ready pod with image {0}")]
    NoRunningPod(String),

    #[error("cluster: {0}")]
    Cluster(#[from] ClusterError),

    #[error("health command failed in {pod}: {message}")]
    CommandFailed { pod: String, message: String },

    #[error("invalid health url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http: {0}")]
    Http(String),

    #[error("no response within {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// Transport that fetches the raw health endpoint body
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<String, ProbeError>;
}

/// Execs into a pod of the new version and queries its loopback address
pub struct PodExecProbe {
    cluster: Arc<dyn ClusterApi>,
}

impl PodExecProbe {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub fn command(descriptor: &ResourceDescriptor) -> Vec<String> {
        vec![
            "wget".to_string(),
            "-q".to_string(),
            "-O".to_string(),
            "-".to_string(),
            format!(
                "http://localhost:{}{}",
                descriptor.container_port, descriptor.health_path
            ),
        ]
    }
}

/// First running, ready pod of the release that runs `image`
pub fn select_pod<'a>(pods: &'a [PodSummary], image: &str) -> Option<&'a PodSummary> {
    pods.iter()
        .find(|p| p.is_running() && p.ready && p.image.as_deref() == Some(image))
}

#[async_trait]
impl HealthProbe for PodExecProbe {
    fn name(&self) -> &'static str {
        "pod-exec"
    }

    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<String, ProbeError> {
        let image = descriptor.image_reference();
        let pods = self
            .cluster
            .list_pods(&descriptor.namespace, &descriptor.selector())
            .await?;
        let pod = select_pod(&pods, &image).ok_or(ProbeError::NoRunningPod(image.clone()))?;

        let output = self
            .cluster
            .exec(&descriptor.namespace, &pod.name, &Self::command(descriptor))
            .await?;

        if !output.success {
            return Err(ProbeError::CommandFailed {
                pod: pod.name.clone(),
                message: output
                    .message
                    .unwrap_or_else(|| "non-zero exit status".to_string()),
            });
        }
        Ok(output.stdout)
    }
}

/// Queries the network-exposure address over HTTP
pub struct ServiceHttpProbe {
    client: reqwest::Client,
}

impl ServiceHttpProbe {
    pub fn new(timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Http(e.to_string()))?;
        Ok(Self { client })
    }

    /// `health_url` if set, otherwise the service's cluster DNS name
    ///
    /// `health_path` is appended to any path already in `health_url`.
    pub fn health_url(descriptor: &ResourceDescriptor) -> Result<Url, ProbeError> {
        let base = match &descriptor.health_url {
            Some(url) => url.clone(),
            None => format!(
                "http://{}.{}.svc.cluster.local:{}",
                descriptor.service_name(),
                descriptor.namespace,
                descriptor.container_port
            ),
        };
        let mut url = Url::parse(&base)?;
        let path = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            descriptor.health_path.trim_start_matches('/')
        );
        url.set_path(&path);
        Ok(url)
    }
}

#[async_trait]
impl HealthProbe for ServiceHttpProbe {
    fn name(&self) -> &'static str {
        "service-http"
    }

    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<String, ProbeError> {
        let url = Self::health_url(descriptor)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ProbeError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::Http(format!("status {}", status)));
        }
        response
            .text()
            .await
            .map_err(|e| ProbeError::Http(e.to_string()))
    }
}

/// Probe for the descriptor's configured health target
pub fn probe_for(
    descriptor: &ResourceDescriptor,
    cluster: Arc<dyn ClusterApi>,
) -> Result<Arc<dyn HealthProbe>, ProbeError> {
    Ok(match descriptor.health_target {
        HealthTarget::Pod => Arc::new(PodExecProbe::new(cluster)),
        HealthTarget::Service => Arc::new(ServiceHttpProbe::new(Duration::from_secs(10))?),
    })
}

/// Bounded retry loop around a [`HealthProbe`]
///
/// Fixed attempt count and fixed delay; the rollout budget has already been
/// spent by the time this runs.
pub struct HealthVerifier {
    probe: Arc<dyn HealthProbe>,
    logger: RunLogger,
    metrics: DeployMetrics,
}

impl HealthVerifier {
    pub fn new(probe: Arc<dyn HealthProbe>, logger: RunLogger, metrics: DeployMetrics) -> Self {
        Self {
            probe,
            logger,
            metrics,
        }
    }

    /// First parseable sample, healthy or not. Only unparseable or missing
    /// responses are retried.
    pub async fn verify(&self, descriptor: &ResourceDescriptor) -> Result<HealthSample, HealthError> {
        let attempts = descriptor.health_max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let fetched = tokio::time::timeout(HEALTH_ATTEMPT_TIMEOUT, self.probe.fetch(descriptor))
                .await
                .unwrap_or(Err(ProbeError::TimedOut(HEALTH_ATTEMPT_TIMEOUT)));
            let result = match fetched {
                Ok(raw) => HealthSample::parse(&raw),
                Err(e) => Err(e.to_string()),
            };

            match result {
                Ok(sample) => {
                    self.logger
                        .log_health_attempt(attempt, attempts, Ok(&sample.status));
                    self.metrics.inc_health_attempts(true);
                    return Ok(sample);
                }
                Err(e) => {
                    self.logger.log_health_attempt(attempt, attempts, Err(&e));
                    self.metrics.inc_health_attempts(false);
                    last_error = e;
                }
            }

            if attempt < attempts {
                tokio::time::sleep(descriptor.health_retry_delay()).await;
            }
        }

        Err(HealthError::Unverified {
            attempts,
            last_error,
        })
    }
}
