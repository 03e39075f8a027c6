//! Configuration management for the CLI
//!
//! Defaults, then a config file, then `KDEPLOY_*` environment variables,
//! then command-line flags.

use anyhow::{Context, Result};
use clap::Args;
use deploy_lib::descriptor::{ProbeSet, RolloutStrategy};
use deploy_lib::{DescriptorError, HealthTarget, ResourceDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Release options before they are turned into a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub namespace: String,
    pub release_name: String,
    pub image_name: String,
    pub image_tag: String,
    pub registry_prefix: String,
    pub image_tool: String,
    pub replica_count: u32,
    pub container_port: u16,
    pub node_port: u16,
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
    pub rollout_timeout_seconds: u64,
    pub poll_interval_seconds: u64,
    pub max_retries: u32,
    pub retry_backoff_seconds: u64,
    pub backend_url: String,
    pub api_base_path: String,
    pub runtime_mode: String,
    pub health_path: String,
    pub health_max_attempts: u32,
    pub health_retry_delay_seconds: u64,
    pub health_target: String,
    pub health_url: Option<String>,
    /// Additional key/values for the release ConfigMap
    pub extra_env: BTreeMap<String, String>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            namespace: "frontend".to_string(),
            release_name: "frontend-app".to_string(),
            image_name: "frontend-app".to_string(),
            image_tag: "latest".to_string(),
            registry_prefix: String::new(),
            image_tool: "docker".to_string(),
            replica_count: 2,
            container_port: 3000,
            node_port: 30080,
            cpu_request: "100m".to_string(),
            cpu_limit: "500m".to_string(),
            memory_request: "128Mi".to_string(),
            memory_limit: "512Mi".to_string(),
            rollout_timeout_seconds: 300,
            poll_interval_seconds: 5,
            max_retries: 3,
            retry_backoff_seconds: 5,
            backend_url: "http://api-gateway.backend.svc.cluster.local:8000".to_string(),
            api_base_path: "/api".to_string(),
            runtime_mode: "production".to_string(),
            health_path: "/api/health".to_string(),
            health_max_attempts: 5,
            health_retry_delay_seconds: 5,
            health_target: "pod".to_string(),
            health_url: None,
            extra_env: BTreeMap::new(),
        }
    }
}

impl DeployConfig {
    /// Load configuration from file and environment
    ///
    /// An explicit `path` must exist; the default location is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(default) = Self::config_path() {
                    builder = builder.add_source(config::File::from(default).required(false));
                }
            }
        }

        let config = builder
            .add_source(config::Environment::with_prefix("KDEPLOY"))
            .build()
            .context("Failed to read configuration")?;

        config
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    /// Default config file location
    fn config_path() -> Option<PathBuf> {
        let home = dirs_next::home_dir()?;
        Some(home.join(".config").join("kdeploy").join("config.toml"))
    }

    /// Key/values stored in the release ConfigMap
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = [
            ("NODE_ENV", self.runtime_mode.clone()),
            ("NEXT_PUBLIC_API_URL", self.api_base_path.clone()),
            ("BACKEND_URL", self.backend_url.clone()),
            ("PORT", self.container_port.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        for (key, value) in &self.extra_env {
            env.insert(key.clone(), value.clone());
        }
        env
    }

    pub fn into_descriptor(self) -> Result<ResourceDescriptor, DescriptorError> {
        let health_target: HealthTarget = self.health_target.parse()?;
        let environment = self.environment();

        Ok(ResourceDescriptor {
            namespace: self.namespace,
            release_name: self.release_name,
            image_name: self.image_name,
            image_tag: self.image_tag,
            registry_prefix: self.registry_prefix,
            image_tool: self.image_tool,
            replica_count: self.replica_count,
            cpu_request: self.cpu_request,
            cpu_limit: self.cpu_limit,
            memory_request: self.memory_request,
            memory_limit: self.memory_limit,
            container_port: self.container_port,
            node_port: self.node_port,
            rollout_timeout_seconds: self.rollout_timeout_seconds,
            poll_interval_seconds: self.poll_interval_seconds,
            max_retries: self.max_retries,
            retry_backoff_seconds: self.retry_backoff_seconds,
            health_path: self.health_path,
            health_max_attempts: self.health_max_attempts,
            health_retry_delay_seconds: self.health_retry_delay_seconds,
            health_target,
            health_url: self.health_url,
            backend_url: self.backend_url,
            environment,
            probes: ProbeSet::default(),
            strategy: RolloutStrategy::default(),
        })
    }
}

/// Per-option flags shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct DescriptorArgs {
    /// Target namespace
    #[arg(long, short)]
    pub namespace: Option<String>,

    /// Release (deployment) name
    #[arg(long)]
    pub release_name: Option<String>,

    /// Image name without registry or tag
    #[arg(long)]
    pub image_name: Option<String>,

    /// Image tag
    #[arg(long, short = 't')]
    pub image_tag: Option<String>,

    /// Registry prefix, e.g. registry.example.com/team
    #[arg(long)]
    pub registry_prefix: Option<String>,

    /// Local image tool used for the image lookup
    #[arg(long)]
    pub image_tool: Option<String>,

    /// Number of replicas
    #[arg(long, short)]
    pub replicas: Option<u32>,

    #[arg(long)]
    pub container_port: Option<u16>,

    /// Externally exposed node port
    #[arg(long)]
    pub node_port: Option<u16>,

    #[arg(long)]
    pub cpu_request: Option<String>,

    #[arg(long)]
    pub cpu_limit: Option<String>,

    #[arg(long)]
    pub memory_request: Option<String>,

    #[arg(long)]
    pub memory_limit: Option<String>,

    /// Seconds to wait for the rollout to converge
    #[arg(long)]
    pub timeout: Option<u64>,

    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Retries for transient API errors
    #[arg(long)]
    pub max_retries: Option<u32>,

    #[arg(long)]
    pub retry_backoff: Option<u64>,

    #[arg(long)]
    pub backend_url: Option<String>,

    /// Public API base path exposed to the application
    #[arg(long)]
    pub api_base_path: Option<String>,

    #[arg(long)]
    pub runtime_mode: Option<String>,

    #[arg(long)]
    pub health_path: Option<String>,

    #[arg(long)]
    pub health_attempts: Option<u32>,

    #[arg(long)]
    pub health_delay: Option<u64>,

    /// Where the health endpoint is queried from (pod or service)
    #[arg(long)]
    pub health_target: Option<String>,

    /// Base URL for the service health target
    #[arg(long)]
    pub health_url: Option<String>,

    /// Extra ConfigMap entries (KEY=VALUE, repeatable)
    #[arg(long = "env", short = 'e', value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

impl DescriptorArgs {
    /// Apply flags on top of the loaded configuration
    pub fn apply(&self, config: &mut DeployConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut config.namespace, &self.namespace);
        set(&mut config.release_name, &self.release_name);
        set(&mut config.image_name, &self.image_name);
        set(&mut config.image_tag, &self.image_tag);
        set(&mut config.registry_prefix, &self.registry_prefix);
        set(&mut config.image_tool, &self.image_tool);
        set(&mut config.replica_count, &self.replicas);
        set(&mut config.container_port, &self.container_port);
        set(&mut config.node_port, &self.node_port);
        set(&mut config.cpu_request, &self.cpu_request);
        set(&mut config.cpu_limit, &self.cpu_limit);
        set(&mut config.memory_request, &self.memory_request);
        set(&mut config.memory_limit, &self.memory_limit);
        set(&mut config.rollout_timeout_seconds, &self.timeout);
        set(&mut config.poll_interval_seconds, &self.poll_interval);
        set(&mut config.max_retries, &self.max_retries);
        set(&mut config.retry_backoff_seconds, &self.retry_backoff);
        set(&mut config.backend_url, &self.backend_url);
        set(&mut config.api_base_path, &self.api_base_path);
        set(&mut config.runtime_mode, &self.runtime_mode);
        set(&mut config.health_path, &self.health_path);
        set(&mut config.health_max_attempts, &self.health_attempts);
        set(&mut config.health_retry_delay_seconds, &self.health_delay);
        set(&mut config.health_target, &self.health_target);
        if self.health_url.is_some() {
            config.health_url = self.health_url.clone();
        }
        config.extra_env.extend(self.env.iter().cloned());
    }
}
