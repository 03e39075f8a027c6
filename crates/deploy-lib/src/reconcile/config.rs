//! Environment ConfigMap reconciliation and its content hash

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::manifest::build_config_map;
use crate::cluster::{ClusterApi, ReconciledResource, ResourceKind};
use crate::descriptor::{APP_LABEL, MANAGED_BY};
use crate::error::FatalError;
use crate::observability::{DeployMetrics, RunLogger};
use crate::retry::{retry_transient, RetryPolicy};

/// SHA-256 over the sorted key/values, hex encoded
pub fn config_hash(key_values: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in key_values {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

/// Applies the release's environment ConfigMap
pub struct ConfigReconciler {
    cluster: Arc<dyn ClusterApi>,
    retry: RetryPolicy,
    logger: RunLogger,
    metrics: DeployMetrics,
}

impl ConfigReconciler {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        retry: RetryPolicy,
        logger: RunLogger,
        metrics: DeployMetrics,
    ) -> Self {
        Self {
            cluster,
            retry,
            logger,
            metrics,
        }
    }

    /// Declaratively apply `<release>-config` holding `key_values`
    pub async fn apply(
        &self,
        namespace: &str,
        release_name: &str,
        key_values: &BTreeMap<String, String>,
    ) -> Result<ReconciledResource, FatalError> {
        let name = format!("{}-config", release_name);
        let labels = [
            (APP_LABEL.to_string(), release_name.to_string()),
            (
                "app.kubernetes.io/managed-by".to_string(),
                MANAGED_BY.to_string(),
            ),
        ]
        .into_iter()
        .collect();
        let config_map = build_config_map(namespace, &name, labels, key_values);

        let result = retry_transient(&self.retry, "apply_config_map", &self.logger, &self.metrics, || {
            self.cluster.apply_config_map(namespace, &config_map)
        })
        .await;

        let resource = match &result {
            Ok(applied) => ReconciledResource::from_apply(ResourceKind::ConfigMap, &name, *applied),
            Err(e) => ReconciledResource::failed(ResourceKind::ConfigMap, &name, e),
        };
        self.logger.log_resource_reconciled(&resource);
        self.metrics.record_apply(&resource);

        match result {
            Ok(_) => Ok(resource),
            Err(source) => Err(FatalError {
                kind: ResourceKind::ConfigMap,
                name,
                source,
            }),
        }
    }
}
