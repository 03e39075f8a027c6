//! In-memory control plane for tests
//!
//! [`FakeCluster`] stores applied objects, answers applies declaratively
//! (an identical object is a no-op), counts every call per operation and
//! drives rollouts through the steps of a [`RolloutPlan`], one step per
//! status poll.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::cluster::{
    ApplyResult, ClusterApi, EventSummary, ExecOutput, PodSummary, ServicePortSummary,
    ServiceSummary,
};
use crate::descriptor::RolloutStrategy;
use crate::error::ClusterError;
use crate::prereq::{ImageStore, ImageStoreError};
use crate::rollout::{RolloutPlan, RolloutStatus, RolloutStep, StepAction, PROGRESS_DEADLINE_EXCEEDED};

pub(crate) const HEALTHY_BODY: &str =
    r#"{"status":"healthy","timestamp":"2026-10-16T12:00:00.000Z"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    ServerVersion,
    NamespaceExists,
    CreateNamespace,
    ApplyConfigMap,
    ApplyDeployment,
    ApplyService,
    RolloutStatus,
    ListPods,
    ServiceSummary,
    RecentEvents,
    Exec,
}

/// How the fake control plane converges an applied workload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RolloutMode {
    /// Advance one rolling-update step per status poll
    Plan,
    /// New pods never become ready
    Never,
    /// New pods never become ready and the progress deadline is reported
    Stall,
}

type Key = (String, String);

struct Rollout {
    plan: RolloutPlan,
    step: usize,
    old_image: String,
    new_image: String,
    generation: i64,
}

impl Rollout {
    fn current(&self) -> RolloutStep {
        self.plan.steps[self.step]
    }
}

#[derive(Default)]
struct State {
    namespaces: HashSet<String>,
    config_maps: HashMap<Key, (serde_json::Value, ConfigMap)>,
    deployments: HashMap<Key, (serde_json::Value, Deployment)>,
    services: HashMap<Key, (serde_json::Value, Service)>,
    rollouts: HashMap<Key, Rollout>,
    failures: HashMap<Op, (ClusterError, Option<usize>)>,
    hung: HashSet<Op>,
    calls: HashMap<Op, usize>,
    exec_script: VecDeque<Result<ExecOutput, ClusterError>>,
    exec_commands: Vec<(String, Vec<String>)>,
    observed: Vec<RolloutStep>,
    events: Vec<EventSummary>,
    restarts: i32,
}

pub(crate) struct FakeCluster {
    state: Mutex<State>,
    mode: RolloutMode,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            mode: RolloutMode::Plan,
        }
    }

    pub fn with_rollout_mode(mut self, mode: RolloutMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.lock().namespaces.insert(name.to_string());
        self
    }

    pub fn with_events(self, events: Vec<EventSummary>) -> Self {
        self.lock().events = events;
        self
    }

    /// Control plane that refuses connections
    pub fn unreachable() -> Self {
        let cluster = Self::new();
        cluster.fail(
            Op::ServerVersion,
            ClusterError::Transport("connection refused".to_string()),
        );
        cluster
    }

    /// Fail every call to `op` with `error`
    pub fn fail(&self, op: Op, error: ClusterError) {
        self.lock().failures.insert(op, (error, None));
    }

    /// Fail the next `times` calls to `op` with `error`
    pub fn fail_times(&self, op: Op, error: ClusterError, times: usize) {
        self.lock().failures.insert(op, (error, Some(times)));
    }

    /// Never answer calls to `op`
    pub fn hang(&self, op: Op) {
        self.lock().hung.insert(op);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Total calls that create or modify cluster state
    pub fn mutating_calls(&self) -> usize {
        [
            Op::CreateNamespace,
            Op::ApplyConfigMap,
            Op::ApplyDeployment,
            Op::ApplyService,
        ]
        .iter()
        .map(|op| self.calls(*op))
        .sum()
    }

    /// Responses for upcoming exec calls, consumed in order
    pub fn script_exec(&self, responses: Vec<Result<ExecOutput, ClusterError>>) {
        self.lock().exec_script.extend(responses);
    }

    pub fn exec_commands(&self) -> Vec<(String, Vec<String>)> {
        self.lock().exec_commands.clone()
    }

    /// Rollout steps seen by status polls, in order
    pub fn observed_steps(&self) -> Vec<RolloutStep> {
        self.lock().observed.clone()
    }

    pub fn set_restarts(&self, restarts: i32) {
        self.lock().restarts = restarts;
    }

    pub fn has_namespace(&self, name: &str) -> bool {
        self.lock().namespaces.contains(name)
    }

    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.lock()
            .config_maps
            .get(&key(namespace, name))
            .map(|(_, object)| object.clone())
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.lock()
            .deployments
            .get(&key(namespace, name))
            .map(|(_, object)| object.clone())
    }

    /// Pretend `deployment` was rolled out earlier and all its pods are ready
    pub fn seed_deployment(&self, namespace: &str, deployment: &Deployment) {
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let replicas = desired_replicas(deployment);
        let strategy = strategy_of(deployment);
        let value = serde_json::to_value(deployment).unwrap();

        let mut state = self.lock();
        state.namespaces.insert(namespace.to_string());
        state
            .deployments
            .insert(key(namespace, &name), (value, deployment.clone()));
        state.rollouts.insert(
            key(namespace, &name),
            Rollout {
                plan: RolloutPlan {
                    desired: replicas,
                    max_surge: strategy.max_surge,
                    max_unavailable: strategy.max_unavailable,
                    steps: vec![RolloutStep {
                        action: StepAction::Initial,
                        old_pods: 0,
                        new_pods: replicas,
                    }],
                },
                step: 0,
                old_image: String::new(),
                new_image: image_of(deployment),
                generation: 1,
            },
        );
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Count the call and apply any injected failure
    fn enter(&self, op: Op) -> Result<MutexGuard<'_, State>, ClusterError> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;

        let injected = match state.failures.get_mut(&op) {
            Some((error, None)) => Some(error.clone()),
            Some((error, Some(remaining))) if *remaining > 0 => {
                *remaining -= 1;
                Some(error.clone())
            }
            _ => None,
        };

        match injected {
            Some(error) => Err(error),
            None => Ok(state),
        }
    }

    /// Count a call to a hung `op` and never return
    async fn stall(&self, op: Op) {
        {
            let mut state = self.lock();
            if !state.hung.contains(&op) {
                return;
            }
            *state.calls.entry(op).or_default() += 1;
        }
        std::future::pending::<()>().await
    }

    fn pods_for(&self, state: &State, rollout: &Rollout, name: &str) -> Vec<PodSummary> {
        let running = |suffix: &str, i: u32, image: &str| PodSummary {
            name: format!("{}-{}-{}", name, suffix, i),
            phase: "Running".to_string(),
            ready: true,
            restarts: state.restarts,
            waiting_reason: None,
            image: Some(image.to_string()),
        };

        match self.mode {
            RolloutMode::Plan => {
                let step = rollout.current();
                (0..step.old_pods)
                    .map(|i| running("old", i, &rollout.old_image))
                    .chain((0..step.new_pods).map(|i| running("new", i, &rollout.new_image)))
                    .collect()
            }
            RolloutMode::Never | RolloutMode::Stall => {
                let old = rollout.plan.steps[0].old_pods;
                (0..old)
                    .map(|i| running("old", i, &rollout.old_image))
                    .chain((0..rollout.plan.desired).map(|i| PodSummary {
                        name: format!("{}-new-{}", name, i),
                        phase: "Pending".to_string(),
                        ready: false,
                        restarts: 0,
                        waiting_reason: Some("ImagePullBackOff".to_string()),
                        image: Some(rollout.new_image.clone()),
                    }))
                    .collect()
            }
        }
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn not_found(kind: &str, name: &str) -> ClusterError {
    ClusterError::api(404, "NotFound", format!("{} \"{}\" not found", kind, name))
}

fn desired_replicas(deployment: &Deployment) -> u32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
        .max(0) as u32
}

fn image_of(deployment: &Deployment) -> String {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default()
}

fn strategy_of(deployment: &Deployment) -> RolloutStrategy {
    let int = |v: Option<&IntOrString>, default: u32| match v {
        Some(IntOrString::Int(n)) => (*n).max(0) as u32,
        _ => default,
    };
    let defaults = RolloutStrategy::default();
    let rolling = deployment
        .spec
        .as_ref()
        .and_then(|s| s.strategy.as_ref())
        .and_then(|s| s.rolling_update.as_ref());

    RolloutStrategy {
        max_surge: int(rolling.and_then(|r| r.max_surge.as_ref()), defaults.max_surge),
        max_unavailable: int(
            rolling.and_then(|r| r.max_unavailable.as_ref()),
            defaults.max_unavailable,
        ),
        ..defaults
    }
}

/// Declarative upsert: identical objects leave the store untouched
fn upsert<T: Serialize + Clone>(
    store: &mut HashMap<Key, (serde_json::Value, T)>,
    key: Key,
    object: &T,
) -> Result<ApplyResult, ClusterError> {
    let value = serde_json::to_value(object).map_err(|e| ClusterError::Decode(e.to_string()))?;
    let result = match store.get(&key) {
        Some((existing, _)) if *existing == value => ApplyResult {
            existed_before: true,
            changed: false,
        },
        Some(_) => ApplyResult {
            existed_before: true,
            changed: true,
        },
        None => ApplyResult {
            existed_before: false,
            changed: true,
        },
    };
    if result.changed {
        store.insert(key, (value, object.clone()));
    }
    Ok(result)
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn server_version(&self) -> Result<String, ClusterError> {
        self.enter(Op::ServerVersion)?;
        Ok("v1.28.3".to_string())
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let state = self.enter(Op::NamespaceExists)?;
        Ok(state.namespaces.contains(name))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), ClusterError> {
        let mut state = self.enter(Op::CreateNamespace)?;
        let name = namespace.metadata.name.clone().unwrap_or_default();
        state.namespaces.insert(name);
        Ok(())
    }

    async fn apply_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ApplyResult, ClusterError> {
        let mut state = self.enter(Op::ApplyConfigMap)?;
        if !state.namespaces.contains(namespace) {
            return Err(not_found("namespaces", namespace));
        }
        let name = config_map.metadata.name.clone().unwrap_or_default();
        upsert(&mut state.config_maps, key(namespace, &name), config_map)
    }

    async fn apply_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<ApplyResult, ClusterError> {
        let mut guard = self.enter(Op::ApplyDeployment)?;
        let state = &mut *guard;
        let name = deployment.metadata.name.clone().unwrap_or_default();
        let k = key(namespace, &name);

        let result = upsert(&mut state.deployments, k.clone(), deployment)?;
        if !result.changed {
            return Ok(result);
        }

        // A new template starts a rollout from whatever pods are ready now
        let (current_ready, old_image, generation) = match state.rollouts.get(&k) {
            Some(previous) => (
                previous.current().ready_capacity(),
                previous.new_image.clone(),
                previous.generation + 1,
            ),
            None => (0, String::new(), 1),
        };
        let plan = RolloutPlan::simulate(
            desired_replicas(deployment),
            current_ready,
            &strategy_of(deployment),
        )
        .map_err(|e| ClusterError::api(422, "Invalid", e.to_string()))?;

        state.rollouts.insert(
            k,
            Rollout {
                plan,
                step: 0,
                old_image,
                new_image: image_of(deployment),
                generation,
            },
        );
        Ok(result)
    }

    async fn apply_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<ApplyResult, ClusterError> {
        let mut state = self.enter(Op::ApplyService)?;
        let name = service.metadata.name.clone().unwrap_or_default();
        upsert(&mut state.services, key(namespace, &name), service)
    }

    async fn rollout_status(&self, namespace: &str, name: &str) -> Result<RolloutStatus, ClusterError> {
        self.stall(Op::RolloutStatus).await;
        let mut guard = self.enter(Op::RolloutStatus)?;
        let state = &mut *guard;
        let rollout = state
            .rollouts
            .get_mut(&key(namespace, name))
            .ok_or_else(|| not_found("deployments.apps", name))?;
        let desired = rollout.plan.desired as i32;

        let status = match self.mode {
            RolloutMode::Plan => {
                let step = rollout.current();
                state.observed.push(step);
                if rollout.step + 1 < rollout.plan.steps.len() {
                    rollout.step += 1;
                }
                RolloutStatus {
                    desired_replicas: desired,
                    ready_replicas: step.ready_capacity() as i32,
                    updated_replicas: step.new_pods as i32,
                    available_replicas: step.ready_capacity() as i32,
                    total_replicas: step.total() as i32,
                    generation: rollout.generation,
                    observed_generation: rollout.generation,
                    condition_reason: Some("ReplicaSetUpdated".to_string()),
                }
            }
            RolloutMode::Never | RolloutMode::Stall => {
                let old = rollout.plan.steps[0].old_pods as i32;
                RolloutStatus {
                    desired_replicas: desired,
                    ready_replicas: old,
                    updated_replicas: desired,
                    available_replicas: old,
                    total_replicas: old + desired,
                    generation: rollout.generation,
                    observed_generation: rollout.generation,
                    condition_reason: Some(if self.mode == RolloutMode::Stall {
                        PROGRESS_DEADLINE_EXCEEDED.to_string()
                    } else {
                        "ReplicaSetUpdated".to_string()
                    }),
                }
            }
        };
        Ok(status)
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodSummary>, ClusterError> {
        self.stall(Op::ListPods).await;
        let state = self.enter(Op::ListPods)?;
        let pods = state
            .rollouts
            .iter()
            .filter(|((ns, name), _)| ns == namespace && selector == format!("app={}", name))
            .flat_map(|((_, name), rollout)| self.pods_for(&state, rollout, name))
            .collect();
        Ok(pods)
    }

    async fn service_summary(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceSummary>, ClusterError> {
        let state = self.enter(Op::ServiceSummary)?;
        Ok(state.services.get(&key(namespace, name)).map(|(_, service)| {
            let spec = service.spec.clone().unwrap_or_default();
            ServiceSummary {
                name: name.to_string(),
                service_type: spec.type_.unwrap_or_else(|| "ClusterIP".to_string()),
                ports: spec
                    .ports
                    .unwrap_or_default()
                    .into_iter()
                    .map(|p| ServicePortSummary {
                        port: p.port,
                        target_port: match p.target_port {
                            Some(IntOrString::Int(port)) => Some(port),
                            _ => None,
                        },
                        node_port: p.node_port,
                    })
                    .collect(),
            }
        }))
    }

    async fn recent_events(
        &self,
        _namespace: &str,
        name_prefix: &str,
        limit: usize,
    ) -> Result<Vec<EventSummary>, ClusterError> {
        self.stall(Op::RecentEvents).await;
        let state = self.enter(Op::RecentEvents)?;
        let related: Vec<EventSummary> = state
            .events
            .iter()
            .filter(|e| {
                e.object
                    .split_once('/')
                    .is_some_and(|(_, name)| name.starts_with(name_prefix))
            })
            .cloned()
            .collect();
        let skip = related.len().saturating_sub(limit);
        Ok(related.into_iter().skip(skip).collect())
    }

    async fn exec(
        &self,
        _namespace: &str,
        pod: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError> {
        let mut state = self.enter(Op::Exec)?;
        state
            .exec_commands
            .push((pod.to_string(), command.to_vec()));
        state.exec_script.pop_front().unwrap_or_else(|| {
            Ok(ExecOutput {
                stdout: HEALTHY_BODY.to_string(),
                success: true,
                message: None,
            })
        })
    }
}

/// Image store with a fixed set of local images
pub(crate) struct StaticImageStore {
    images: HashSet<String>,
    tool_missing: bool,
    calls: AtomicUsize,
}

impl StaticImageStore {
    pub fn with_images(images: &[&str]) -> Self {
        Self {
            images: images.iter().map(|s| s.to_string()).collect(),
            tool_missing: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::with_images(&[])
    }

    pub fn tool_missing() -> Self {
        Self {
            tool_missing: true,
            ..Self::empty()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageStore for StaticImageStore {
    async fn contains(&self, image: &str) -> Result<bool, ImageStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.tool_missing {
            return Err(ImageStoreError::ToolMissing("docker".to_string()));
        }
        Ok(self.images.contains(image))
    }
}
