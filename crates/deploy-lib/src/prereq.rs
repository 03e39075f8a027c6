//! Checks that run before anything in the cluster is touched

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::cluster::ClusterApi;
use crate::descriptor::ResourceDescriptor;
use crate::error::PrereqError;
use crate::observability::RunLogger;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageStoreError {
    #[error("image tool '{0}' is not installed")]
    ToolMissing(String),

    #[error("image lookup failed: {0}")]
    Lookup(String),
}

/// Local image store the cluster nodes load images from
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Whether `image` is present locally
    async fn contains(&self, image: &str) -> Result<bool, ImageStoreError>;
}

/// Looks images up with `<tool> image inspect`
pub struct CliImageStore {
    tool: String,
}

impl CliImageStore {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

#[async_trait]
impl ImageStore for CliImageStore {
    async fn contains(&self, image: &str) -> Result<bool, ImageStoreError> {
        let output = Command::new(&self.tool)
            .args(["image", "inspect", image])
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ImageStoreError::ToolMissing(self.tool.clone()),
                _ => ImageStoreError::Lookup(e.to_string()),
            })?;

        if !output.status.success() {
            debug!(
                tool = %self.tool,
                image = %image,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Image not found locally"
            );
        }
        Ok(output.status.success())
    }
}

/// What a passing prerequisite check found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrereqReport {
    pub server_version: String,
    /// Soft findings that do not stop the run
    pub warnings: Vec<String>,
}

/// Verifies the control plane answers and the image can be resolved
pub struct PrerequisiteChecker {
    cluster: Arc<dyn ClusterApi>,
    images: Arc<dyn ImageStore>,
    logger: RunLogger,
}

impl PrerequisiteChecker {
    pub fn new(cluster: Arc<dyn ClusterApi>, images: Arc<dyn ImageStore>, logger: RunLogger) -> Self {
        Self {
            cluster,
            images,
            logger,
        }
    }

    /// Every check runs so the error lists all failures at once
    pub async fn check(&self, descriptor: &ResourceDescriptor) -> Result<PrereqReport, PrereqError> {
        let mut failures = Vec::new();
        let mut report = PrereqReport::default();

        match self.cluster.server_version().await {
            Ok(version) => report.server_version = version,
            Err(e) => failures.push(format!("control plane unreachable: {}", e)),
        }

        let image = descriptor.image_reference();
        let remote = descriptor.has_registry_prefix();
        match self.images.contains(&image).await {
            Ok(true) => {}
            Ok(false) if remote => {
                report.warnings.push(format!(
                    "image {} not present locally, it will be pulled from the registry",
                    image
                ));
            }
            Ok(false) => failures.push(format!(
                "image {} not found locally and no registry prefix is set",
                image
            )),
            Err(e) if remote => {
                report
                    .warnings
                    .push(format!("{}, relying on registry pull for {}", e, image));
            }
            Err(e) => failures.push(format!("{}, cannot resolve image {}", e, image)),
        }

        for warning in &report.warnings {
            self.logger.log_prereq_warning("image", warning);
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            self.logger.log_prereq_failed(&failures);
            Err(PrereqError { failures })
        }
    }
}
