//! Offline rollout preview

use deploy_lib::{ExitOutcome, ResourceDescriptor, RolloutPlan};

use crate::output::{print_failure, print_plan, OutputFormat};

/// Print the rolling-update steps from `current_replicas` old pods to the new version
pub fn plan(
    descriptor: &ResourceDescriptor,
    current_replicas: Option<u32>,
    format: OutputFormat,
) -> i32 {
    let current = current_replicas.unwrap_or(descriptor.replica_count);

    match RolloutPlan::simulate(descriptor.replica_count, current, &descriptor.strategy) {
        Ok(plan) => {
            print_plan(&plan, format);
            0
        }
        Err(e) => {
            print_failure(ExitOutcome::FatalApplyFailure, &e.to_string(), format);
            1
        }
    }
}
