//! Deployment and Service reconciliation

use std::sync::Arc;

use super::config::config_hash;
use super::manifest::{build_deployment, build_service};
use crate::cluster::{ApplyResult, ClusterApi, ReconciledResource, ResourceKind};
use crate::descriptor::ResourceDescriptor;
use crate::error::{ClusterError, FatalError};
use crate::observability::{DeployMetrics, RunLogger};
use crate::retry::{retry_transient, RetryPolicy};

/// Applies the workload and its network exposure
pub struct WorkloadReconciler {
    cluster: Arc<dyn ClusterApi>,
    retry: RetryPolicy,
    logger: RunLogger,
    metrics: DeployMetrics,
}

impl WorkloadReconciler {
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

    /// Apply `Deployment/<release>` then `Service/<release>-svc`
    ///
    /// The pod template is annotated with the hash of `descriptor.environment`,
    /// so a configuration change rolls the pods and an unchanged one does not.
    /// Returns one entry per object; the first failure is fatal.
    pub async fn apply(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> Result<Vec<ReconciledResource>, FatalError> {
        let namespace = descriptor.namespace.as_str();
        let deployment = build_deployment(descriptor, &config_hash(&descriptor.environment));
        let service = build_service(descriptor);

        let applied = retry_transient(&self.retry, "apply_deployment", &self.logger, &self.metrics, || {
            self.cluster.apply_deployment(namespace, &deployment)
        })
        .await;
        let workload = self.record(ResourceKind::Deployment, &descriptor.release_name, applied)?;

        let applied = retry_transient(&self.retry, "apply_service", &self.logger, &self.metrics, || {
            self.cluster.apply_service(namespace, &service)
        })
        .await;
        let exposure = self.record(ResourceKind::Service, &descriptor.service_name(), applied)?;

        Ok(vec![workload, exposure])
    }

    fn record(
        &self,
        kind: ResourceKind,
        name: &str,
        result: Result<ApplyResult, ClusterError>,
    ) -> Result<ReconciledResource, FatalError> {
        let resource = match &result {
            Ok(applied) => ReconciledResource::from_apply(kind, name, *applied),
            Err(e) => ReconciledResource::failed(kind, name, e),
        };
        self.logger.log_resource_reconciled(&resource);
        self.metrics.record_apply(&resource);

        result.map(|_| resource).map_err(|source| FatalError {
            kind,
            name: name.to_string(),
            source,
        })
    }
}
