//! Namespace existence check and creation

use std::sync::Arc;

use super::manifest::build_namespace;
use crate::cluster::{ApplyResult, ClusterApi, ReconciledResource, ResourceKind};
use crate::error::FatalError;
use crate::observability::{DeployMetrics, RunLogger};
use crate::retry::{retry_transient, RetryPolicy};

/// Guarantees the target namespace exists
///
/// Queries first and creates only when absent, so an existing namespace is
/// never written to.
pub struct NamespaceEnsurer {
    cluster: Arc<dyn ClusterApi>,
    retry: RetryPolicy,
    logger: RunLogger,
    metrics: DeployMetrics,
}

impl NamespaceEnsurer {
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

    pub async fn ensure(&self, namespace: &str) -> Result<ReconciledResource, FatalError> {
        let result = self.ensure_inner(namespace).await;

        let resource = match &result {
            Ok(applied) => ReconciledResource::from_apply(ResourceKind::Namespace, namespace, *applied),
            Err(e) => ReconciledResource::failed(ResourceKind::Namespace, namespace, e),
        };
        self.logger.log_resource_reconciled(&resource);
        self.metrics.record_apply(&resource);

        match result {
            Ok(_) => Ok(resource),
            Err(source) => Err(FatalError {
                kind: ResourceKind::Namespace,
                name: namespace.to_string(),
                source,
            }),
        }
    }

    async fn ensure_inner(&self, namespace: &str) -> Result<ApplyResult, crate::error::ClusterError> {
        let exists = retry_transient(&self.retry, "namespace_exists", &self.logger, &self.metrics, || {
            self.cluster.namespace_exists(namespace)
        })
        .await?;

        if exists {
            return Ok(ApplyResult {
                existed_before: true,
                changed: false,
            });
        }

        let object = build_namespace(namespace);
        retry_transient(&self.retry, "create_namespace", &self.logger, &self.metrics, || {
            self.cluster.create_namespace(&object)
        })
        .await?;

        Ok(ApplyResult {
            existed_before: false,
            changed: true,
        })
    }
}
