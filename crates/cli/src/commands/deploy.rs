//! Full release pipeline

use anyhow::Result;
use deploy_lib::{ClusterApi, CliImageStore, DeployMetrics, OrchestratorBuilder, ResourceDescriptor};
use std::sync::Arc;

use crate::output::{print_run_report, OutputFormat};

/// Reconcile, roll out and verify one release
pub async fn deploy(
    cluster: Arc<dyn ClusterApi>,
    descriptor: &ResourceDescriptor,
    metrics: DeployMetrics,
    format: OutputFormat,
) -> Result<i32> {
    let orchestrator = OrchestratorBuilder::new()
        .cluster(cluster)
        .image_store(Arc::new(CliImageStore::new(descriptor.image_tool.clone())))
        .metrics(metrics)
        .build()?;

    let report = orchestrator.run(descriptor).await;
    print_run_report(&report, format);
    Ok(report.exit_code)
}
