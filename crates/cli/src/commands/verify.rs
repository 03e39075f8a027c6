//! Read-only post-deploy checks

use anyhow::Result;
use deploy_lib::health::probe_for;
use deploy_lib::{ClusterApi, DeployMetrics, ExitOutcome, ResourceDescriptor, RunLogger, Verifier};
use std::sync::Arc;
use tokio::time::Instant;

use crate::output::{
    print_failure, print_verification, verification_exit, verification_line, OutputFormat,
};

/// Run the verification checks against the current cluster state
pub async fn verify(
    cluster: Arc<dyn ClusterApi>,
    descriptor: &ResourceDescriptor,
    check_backend: bool,
    metrics: DeployMetrics,
    format: OutputFormat,
) -> Result<i32> {
    let started = Instant::now();
    let logger = RunLogger::new(&descriptor.namespace, &descriptor.release_name);
    logger.log_run_started(
        "verify",
        &descriptor.image_reference(),
        descriptor.replica_count,
    );

    let (outcome, code, message) = match probe_for(descriptor, cluster.clone()) {
        Err(e) => {
            let message = format!("health probe: {}", e);
            print_failure(ExitOutcome::PrereqFailure, &message, format);
            (ExitOutcome::PrereqFailure, 2, message)
        }
        Ok(probe) => {
            let verifier = Verifier::new(cluster, probe, logger.clone(), metrics.clone())
                .with_backend_check(check_backend);

            match verifier.run(descriptor).await {
                Err(e) => {
                    let message = e.to_string();
                    print_failure(ExitOutcome::PrereqFailure, &message, format);
                    (ExitOutcome::PrereqFailure, 2, message)
                }
                Ok(report) => {
                    print_verification(&report, format);
                    let (_, message) = verification_line(&report);
                    let outcome = verification_exit(&report);
                    (outcome, outcome.exit_code(), message)
                }
            }
        }
    };

    logger.log_run_finished(outcome.label(), code, started.elapsed(), &message);
    metrics.set_outcome(outcome.label(), code);
    Ok(code)
}
