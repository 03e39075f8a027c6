//! End-to-end runs of the orchestrator against the in-memory cluster

use super::*;
use crate::cluster::{EventSummary, ExecOutput};
use crate::descriptor::test_descriptor;
use crate::error::ClusterError;
use crate::reconcile::{build_deployment, config_hash};
use crate::testing::{FakeCluster, Op, RolloutMode, StaticImageStore};

fn orchestrator(cluster: &Arc<FakeCluster>) -> Orchestrator {
    OrchestratorBuilder::new()
        .cluster(cluster.clone())
        .image_store(Arc::new(StaticImageStore::with_images(&["frontend-app:v2"])))
        .build()
        .unwrap()
}

fn exec_body(body: &str) -> Result<ExecOutput, ClusterError> {
    Ok(ExecOutput {
        stdout: body.to_string(),
        success: true,
        message: None,
    })
}

#[test]
fn test_builder_requires_cluster() {
    let result = OrchestratorBuilder::new()
        .image_store(Arc::new(StaticImageStore::empty()))
        .build();

    match result {
        Err(e) => assert_eq!(e.to_string(), "cluster is required"),
        Ok(_) => panic!("builder accepted a missing cluster"),
    }
}

#[test]
fn test_builder_requires_image_store() {
    let result = OrchestratorBuilder::default()
        .cluster(Arc::new(FakeCluster::new()))
        .build();
    assert!(result.is_err());
}

#[test]
fn test_exit_codes() {
    assert_eq!(ExitOutcome::Success.exit_code(), 0);
    assert_eq!(ExitOutcome::FatalApplyFailure.exit_code(), 1);
    assert_eq!(ExitOutcome::PrereqFailure.exit_code(), 2);
    assert_eq!(ExitOutcome::Degraded.exit_code(), 3);
    assert_eq!(ExitOutcome::RolloutOrHealthTimeout.exit_code(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_fresh_deploy_succeeds() {
    let cluster = Arc::new(FakeCluster::new());
    let report = orchestrator(&cluster).run(&test_descriptor()).await;

    assert_eq!(report.outcome, ExitOutcome::Success);
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.stage, Stage::Done);
    assert!(report.failed_stage.is_none());
    assert_eq!(report.created(), 4);
    assert_eq!(report.rollout.as_ref().unwrap().ready_replicas, 2);
    assert_eq!(report.health.as_ref().unwrap().status, "healthy");
    assert!(report.status_line().starts_with("[OK] frontend-app deployed"));

    assert!(cluster.has_namespace("frontend"));
    let config = cluster.config_map("frontend", "frontend-app-config").unwrap();
    assert_eq!(
        config.data.unwrap().get("BACKEND_URL").map(String::as_str),
        Some("http://api:8000")
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_run_changes_nothing() {
    let cluster = Arc::new(FakeCluster::new());
    let orchestrator = orchestrator(&cluster);
    let descriptor = test_descriptor();

    let first = orchestrator.run(&descriptor).await;
    assert_eq!(first.exit_code, 0);

    let second = orchestrator.run(&descriptor).await;
    assert_eq!(second.exit_code, 0);
    assert_eq!(second.created(), 0);
    assert_eq!(second.changed(), 0);
    assert_eq!(cluster.calls(Op::CreateNamespace), 1);
}

#[tokio::test(start_paused = true)]
async fn test_prereq_failure_mutates_nothing() {
    let cluster = Arc::new(FakeCluster::unreachable());
    let report = orchestrator(&cluster).run(&test_descriptor()).await;

    assert_eq!(report.outcome, ExitOutcome::PrereqFailure);
    assert_eq!(report.exit_code, 2);
    assert_eq!(report.failed_stage, Some(Stage::Validating));
    assert!(report.message.contains("control plane unreachable"));
    assert_eq!(cluster.calls(Op::NamespaceExists), 0);
    assert_eq!(cluster.mutating_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_descriptor_is_fatal() {
    let cluster = Arc::new(FakeCluster::new());
    let mut descriptor = test_descriptor();
    descriptor.replica_count = 0;

    let report = orchestrator(&cluster).run(&descriptor).await;

    assert_eq!(report.exit_code, 1);
    assert_eq!(report.failed_stage, Some(Stage::Validating));
    assert!(report.message.contains("replica_count"));
    assert_eq!(cluster.calls(Op::ServerVersion), 0);
}

#[tokio::test(start_paused = true)]
async fn test_config_failure_stops_before_workload() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.fail(
        Op::ApplyConfigMap,
        ClusterError::api(403, "Forbidden", "configmaps is forbidden"),
    );

    let report = orchestrator(&cluster).run(&test_descriptor()).await;

    assert_eq!(report.outcome, ExitOutcome::FatalApplyFailure);
    assert_eq!(report.failed_stage, Some(Stage::Reconciling));
    assert!(report.status_line().starts_with("[ERROR] fatal:"));
    assert_eq!(cluster.calls(Op::ApplyDeployment), 0);
    assert_eq!(cluster.calls(Op::ApplyService), 0);
    assert_eq!(cluster.calls(Op::RolloutStatus), 0);
    assert_eq!(cluster.calls(Op::Exec), 0);
}

#[tokio::test(start_paused = true)]
async fn test_rollout_timeout_reports_diagnostics() {
    let cluster = Arc::new(
        FakeCluster::new()
            .with_rollout_mode(RolloutMode::Never)
            .with_events(vec![
                EventSummary {
                    object: "Pod/frontend-app-6b8c-0".to_string(),
                    event_type: "Normal".to_string(),
                    reason: "Pulling".to_string(),
                    message: "Pulling image \"frontend-app:v2\"".to_string(),
                    last_seen: None,
                },
                EventSummary {
                    object: "Pod/frontend-app-6b8c-0".to_string(),
                    event_type: "Warning".to_string(),
                    reason: "Failed".to_string(),
                    message: "ErrImagePull: pull access denied".to_string(),
                    last_seen: None,
                },
            ]),
    );
    let report = orchestrator(&cluster).run(&test_descriptor()).await;

    assert_eq!(report.outcome, ExitOutcome::RolloutOrHealthTimeout);
    assert_eq!(report.failed_stage, Some(Stage::AwaitingRollout));
    assert!(report
        .status_line()
        .contains("last_event=[Failed: ErrImagePull: pull access denied]"));
    assert!(report.elapsed_ms >= 300_000);
    assert!(report.elapsed_ms < 301_000);

    let diagnostics = report.diagnostics.as_ref().unwrap();
    assert_eq!(diagnostics.pods.len(), 2);
    assert!(report.message.contains("ImagePullBackOff"));
    assert_eq!(cluster.calls(Op::Exec), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_rollout_ends_early() {
    let cluster = Arc::new(FakeCluster::new().with_rollout_mode(RolloutMode::Stall));
    let report = orchestrator(&cluster).run(&test_descriptor()).await;

    assert_eq!(report.exit_code, 4);
    assert!(report.message.contains("stalled"));
    assert_eq!(cluster.calls(Op::RolloutStatus), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unverified_health_is_timeout() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.script_exec((0..5).map(|_| exec_body("<html>starting</html>")).collect());

    let report = orchestrator(&cluster).run(&test_descriptor()).await;

    assert_eq!(report.outcome, ExitOutcome::RolloutOrHealthTimeout);
    assert_eq!(report.failed_stage, Some(Stage::VerifyingHealth));
    assert!(report.rollout.is_some());
    assert_eq!(cluster.calls(Op::Exec), 5);
}

#[tokio::test(start_paused = true)]
async fn test_degraded_health_exits_three() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.script_exec(vec![exec_body(r#"{"status":"degraded"}"#)]);

    let report = orchestrator(&cluster).run(&test_descriptor()).await;

    assert_eq!(report.outcome, ExitOutcome::Degraded);
    assert_eq!(report.exit_code, 3);
    assert_eq!(report.stage, Stage::Done);
    assert!(report.status_line().starts_with("[WARN]"));
    assert!(report.status_line().contains("'degraded'"));
}

#[tokio::test(start_paused = true)]
async fn test_upgrade_keeps_full_capacity() {
    let cluster = Arc::new(FakeCluster::new());
    let mut previous = test_descriptor();
    previous.image_tag = "v1".to_string();
    cluster.seed_deployment(
        "frontend",
        &build_deployment(&previous, &config_hash(&previous.environment)),
    );

    let report = orchestrator(&cluster).run(&test_descriptor()).await;
    assert_eq!(report.exit_code, 0);

    let steps = cluster.observed_steps();
    assert!(steps.len() > 1);
    assert!(steps.iter().all(|s| s.ready_capacity() >= 2));

    let last = steps.last().unwrap();
    assert_eq!((last.old_pods, last.new_pods), (0, 2));

    // only pods of the new version are probed
    let (pod, _) = &cluster.exec_commands()[0];
    assert!(pod.starts_with("frontend-app-new-"));
}
