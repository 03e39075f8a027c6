//! Desired state for one release
//!
//! A [`ResourceDescriptor`] is built once per invocation and never mutated
//! while the pipeline runs. The cluster is the only durable state.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::DescriptorError;

/// Label every managed object carries; also the pod selector
pub const APP_LABEL: &str = "app";
pub const MANAGED_BY: &str = "kdeploy";

/// Timing of one probe tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSettings {
    pub initial_delay_seconds: u32,
    pub period_seconds: u32,
    pub timeout_seconds: u32,
    pub failure_threshold: u32,
}

impl ProbeSettings {
    /// Worst-case time before this probe gives up on a container
    ///
    /// Additive: `initial_delay + failure_threshold * period`. The per-check
    /// timeout is not counted separately.
    pub fn budget(&self) -> Duration {
        Duration::from_secs(
            self.initial_delay_seconds as u64
                + self.failure_threshold as u64 * self.period_seconds as u64,
        )
    }
}

/// Startup, liveness and readiness probes for the workload container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeSet {
    /// Generous threshold with a short period so slow cold starts are not killed
    pub startup: ProbeSettings,
    /// Restarts a wedged process
    pub liveness: ProbeSettings,
    /// Gates traffic admission
    pub readiness: ProbeSettings,
}

impl Default for ProbeSet {
    fn default() -> Self {
        Self {
            startup: ProbeSettings {
                initial_delay_seconds: 5,
                period_seconds: 5,
                timeout_seconds: 3,
                failure_threshold: 24,
            },
            liveness: ProbeSettings {
                initial_delay_seconds: 0,
                period_seconds: 15,
                timeout_seconds: 3,
                failure_threshold: 3,
            },
            readiness: ProbeSettings {
                initial_delay_seconds: 0,
                period_seconds: 5,
                timeout_seconds: 3,
                failure_threshold: 3,
            },
        }
    }
}

/// Rolling-update parameters for the workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutStrategy {
    pub max_surge: u32,
    pub max_unavailable: u32,
    pub min_ready_seconds: u32,
    pub progress_deadline_seconds: u32,
}

impl Default for RolloutStrategy {
    /// Zero downtime: one extra pod is started before any old pod goes away
    fn default() -> Self {
        Self {
            max_surge: 1,
            max_unavailable: 0,
            min_ready_seconds: 5,
            progress_deadline_seconds: 600,
        }
    }
}

/// Where the health verifier sends its request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthTarget {
    /// Exec into a running pod and query its loopback address
    #[default]
    Pod,
    /// Query the network-exposure address
    Service,
}

impl std::str::FromStr for HealthTarget {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pod" => Ok(HealthTarget::Pod),
            "service" | "svc" => Ok(HealthTarget::Service),
            other => Err(DescriptorError::new(
                "health_target",
                format!("'{}' is not one of pod, service", other),
            )),
        }
    }
}

/// Desired state for one deployment attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub namespace: String,
    pub release_name: String,
    pub image_name: String,
    pub image_tag: String,
    pub registry_prefix: String,
    pub image_tool: String,
    pub replica_count: u32,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub container_port: u16,
    pub node_port: u16,
    pub rollout_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff_seconds: u64,
    pub health_path: String,
    pub health_max_attempts: u32,
    pub health_retry_delay_seconds: u64,
    pub health_target: HealthTarget,
    pub health_url: Option<String>,
    pub backend_url: String,
    /// Key/values stored in the release ConfigMap
    pub environment: BTreeMap<String, String>,
    pub probes: ProbeSet,
    pub strategy: RolloutStrategy,
}

impl ResourceDescriptor {
    /// Full image reference, `[registry/]name:tag`
    pub fn image_reference(&self) -> String {
        let prefix = self.registry_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            format!("{}:{}", self.image_name, self.image_tag)
        } else {
            format!("{}/{}:{}", prefix, self.image_name, self.image_tag)
        }
    }

    pub fn has_registry_prefix(&self) -> bool {
        !self.registry_prefix.trim().is_empty()
    }

    pub fn config_map_name(&self) -> String {
        format!("{}-config", self.release_name)
    }

    pub fn service_name(&self) -> String {
        format!("{}-svc", self.release_name)
    }

    /// Label selector matching the release's pods
    pub fn selector(&self) -> String {
        format!("{}={}", APP_LABEL, self.release_name)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        [
            (APP_LABEL.to_string(), self.release_name.clone()),
            (
                "app.kubernetes.io/name".to_string(),
                self.release_name.clone(),
            ),
            (
                "app.kubernetes.io/managed-by".to_string(),
                MANAGED_BY.to_string(),
            ),
        ]
        .into_iter()
        .collect()
    }

    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        [(APP_LABEL.to_string(), self.release_name.clone())]
            .into_iter()
            .collect()
    }

    pub fn rollout_timeout(&self) -> Duration {
        Duration::from_secs(self.rollout_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn health_retry_delay(&self) -> Duration {
        Duration::from_secs(self.health_retry_delay_seconds)
    }

    /// Check every invariant the pipeline relies on
    pub fn validate(&self) -> Result<(), DescriptorError> {
        validate_dns_label("namespace", &self.namespace)?;
        validate_dns_label("release_name", &self.release_name)?;

        if self.image_name.trim().is_empty() {
            return Err(DescriptorError::new("image_name", "must not be empty"));
        }
        if self.image_tag.trim().is_empty() || self.image_tag.contains(char::is_whitespace) {
            return Err(DescriptorError::new(
                "image_tag",
                format!("'{}' is not a valid tag", self.image_tag),
            ));
        }
        if self.replica_count == 0 {
            return Err(DescriptorError::new("replica_count", "must be at least 1"));
        }
        if self.container_port == 0 {
            return Err(DescriptorError::new("container_port", "must be in 1..=65535"));
        }
        if !(30000..=32767).contains(&self.node_port) {
            return Err(DescriptorError::new(
                "node_port",
                format!("{} is outside the node port range 30000-32767", self.node_port),
            ));
        }

        let cpu_request = parse_cpu_millis(&self.cpu_request)
            .ok_or_else(|| DescriptorError::new("cpu_request", format!("'{}' is not a quantity", self.cpu_request)))?;
        let cpu_limit = parse_cpu_millis(&self.cpu_limit)
            .ok_or_else(|| DescriptorError::new("cpu_limit", format!("'{}' is not a quantity", self.cpu_limit)))?;
        if cpu_request > cpu_limit {
            return Err(DescriptorError::new(
                "cpu_request",
                format!("{} exceeds limit {}", self.cpu_request, self.cpu_limit),
            ));
        }

        let mem_request = parse_memory_bytes(&self.memory_request).ok_or_else(|| {
            DescriptorError::new("memory_request", format!("'{}' is not a quantity", self.memory_request))
        })?;
        let mem_limit = parse_memory_bytes(&self.memory_limit).ok_or_else(|| {
            DescriptorError::new("memory_limit", format!("'{}' is not a quantity", self.memory_limit))
        })?;
        if mem_request > mem_limit {
            return Err(DescriptorError::new(
                "memory_request",
                format!("{} exceeds limit {}", self.memory_request, self.memory_limit),
            ));
        }

        if self.poll_interval_seconds == 0 {
            return Err(DescriptorError::new("poll_interval_seconds", "must be positive"));
        }
        if self.retry_backoff_seconds == 0 {
            return Err(DescriptorError::new("retry_backoff_seconds", "must be positive"));
        }
        if self.health_max_attempts == 0 {
            return Err(DescriptorError::new("health_max_attempts", "must be at least 1"));
        }
        if !self.health_path.starts_with('/') {
            return Err(DescriptorError::new("health_path", "must start with '/'"));
        }

        // The watcher can never see success if startup alone may outlast it
        let startup_budget = self.probes.startup.budget();
        if self.rollout_timeout() <= startup_budget {
            return Err(DescriptorError::new(
                "rollout_timeout_seconds",
                format!(
                    "{}s does not exceed the startup probe budget of {}s",
                    self.rollout_timeout_seconds,
                    startup_budget.as_secs()
                ),
            ));
        }

        if self.strategy.max_surge == 0 && self.strategy.max_unavailable == 0 {
            return Err(DescriptorError::new(
                "strategy",
                "max_surge and max_unavailable cannot both be zero",
            ));
        }

        Ok(())
    }
}

fn validate_dns_label(field: &'static str, value: &str) -> Result<(), DescriptorError> {
    let valid = !value.is_empty()
        && value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-');

    if valid {
        Ok(())
    } else {
        Err(DescriptorError::new(
            field,
            format!("'{}' is not a valid RFC 1123 label", value),
        ))
    }
}

/// Parse a CPU quantity ("250m", "0.5", "2") into millicores
pub fn parse_cpu_millis(quantity: &str) -> Option<u64> {
    let quantity = quantity.trim();
    if let Some(millis) = quantity.strip_suffix('m') {
        return millis.parse::<u64>().ok();
    }
    let cores: f64 = quantity.parse().ok()?;
    if !cores.is_finite() || cores < 0.0 {
        return None;
    }
    Some((cores * 1000.0).round() as u64)
}

/// Parse a memory quantity ("128Mi", "1G", "1048576") into bytes
pub fn parse_memory_bytes(quantity: &str) -> Option<u64> {
    const SUFFIXES: &[(&str, u64)] = &[
        ("Ki", 1 << 10),
        ("Mi", 1 << 20),
        ("Gi", 1 << 30),
        ("Ti", 1 << 40),
        ("Pi", 1 << 50),
        ("Ei", 1 << 60),
        ("k", 1_000),
        ("M", 1_000_000),
        ("G", 1_000_000_000),
        ("T", 1_000_000_000_000),
        ("P", 1_000_000_000_000_000),
        ("E", 1_000_000_000_000_000_000),
    ];

    let quantity = quantity.trim();
    let (number, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, mult)| quantity.strip_suffix(suffix).map(|n| (n, *mult)))
        .unwrap_or((quantity, 1));

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64).round() as u64)
}

#[cfg(test)]
pub(crate) fn test_descriptor() -> ResourceDescriptor {
    let environment = [
        ("NODE_ENV", "production"),
        ("NEXT_PUBLIC_API_URL", "/api"),
        ("BACKEND_URL", "http://api:8000"),
        ("PORT", "3000"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    ResourceDescriptor {
        namespace: "frontend".to_string(),
        release_name: "frontend-app".to_string(),
        image_name: "frontend-app".to_string(),
        image_tag: "v2".to_string(),
        registry_prefix: String::new(),
        image_tool: "docker".to_string(),
        replica_count: 2,
        cpu_request: "100m".to_string(),
        cpu_limit: "500m".to_string(),
        memory_request: "128Mi".to_string(),
        memory_limit: "512Mi".to_string(),
        container_port: 3000,
        node_port: 30080,
        rollout_timeout_seconds: 300,
        poll_interval_seconds: 5,
        max_retries: 2,
        retry_backoff_seconds: 1,
        health_path: "/api/health".to_string(),
        health_max_attempts: 5,
        health_retry_delay_seconds: 5,
        health_target: HealthTarget::Pod,
        health_url: None,
        backend_url: "http://api:8000".to_string(),
        environment,
        probes: ProbeSet::default(),
        strategy: RolloutStrategy::default(),
    }
}
