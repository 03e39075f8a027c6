//! [`ClusterApi`] backed by the Kubernetes API server

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Event, Namespace, Pod, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{AttachParams, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::debug;

use super::{
    ApplyResult, ClusterApi, EventSummary, ExecOutput, PodSummary, ServicePortSummary,
    ServiceSummary,
};
use crate::error::ClusterError;
use crate::rollout::RolloutStatus;

/// Field manager recorded on every server-side apply
pub const FIELD_MANAGER: &str = "kdeploy";

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig, or infer one
    /// (KUBECONFIG, ~/.kube/config, in-cluster service account)
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, ClusterError> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ClusterError::Config(format!("{}: {}", path.display(), e)))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| ClusterError::Config(e.to_string()))?
            }
            None => Config::infer()
                .await
                .map_err(|e| ClusterError::Config(e.to_string()))?,
        };

        let client = Client::try_from(config).map_err(|e| ClusterError::Config(e.to_string()))?;
        Ok(Self::new(client))
    }

    /// Server-side apply, reporting whether the object existed and changed
    async fn apply<K>(&self, api: Api<K>, name: &str, object: &K) -> Result<ApplyResult, ClusterError>
    where
        K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
    {
        let before = api.get_opt(name).await?;
        let params = PatchParams::apply(FIELD_MANAGER).force();
        let after = api.patch(name, &params, &Patch::Apply(object)).await?;

        let before_version = before
            .as_ref()
            .and_then(|o| o.meta().resource_version.clone());
        let changed = before_version.is_none() || before_version != after.meta().resource_version;

        debug!(
            kind = %K::kind(&()),
            name = %name,
            existed_before = before.is_some(),
            changed = changed,
            "Applied object"
        );

        Ok(ApplyResult {
            existed_before: before.is_some(),
            changed,
        })
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn server_version(&self) -> Result<String, ClusterError> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }

    async fn namespace_exists(&self, name: &str) -> Result<bool, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        match api.create(&PostParams::default(), namespace).await {
            Ok(_) => Ok(()),
            // Lost a race with another creator; the namespace is there either way
            Err(e) => {
                let err = ClusterError::from(e);
                if err.is_already_exists() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn apply_config_map(
        &self,
        namespace: &str,
        config_map: &ConfigMap,
    ) -> Result<ApplyResult, ClusterError> {
        let name = object_name(config_map.metadata.name.as_deref())?;
        self.apply(Api::namespaced(self.client.clone(), namespace), name, config_map)
            .await
    }

    async fn apply_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<ApplyResult, ClusterError> {
        let name = object_name(deployment.metadata.name.as_deref())?;
        self.apply(Api::namespaced(self.client.clone(), namespace), name, deployment)
            .await
    }

    async fn apply_service(
        &self,
        namespace: &str,
        service: &Service,
    ) -> Result<ApplyResult, ClusterError> {
        let name = object_name(service.metadata.name.as_deref())?;
        self.apply(Api::namespaced(self.client.clone(), namespace), name, service)
            .await
    }

    async fn rollout_status(&self, namespace: &str, name: &str) -> Result<RolloutStatus, ClusterError> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let deployment = api.get(name).await?;
        Ok(RolloutStatus::from_deployment(&deployment))
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodSummary>, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api.list(&ListParams::default().labels(selector)).await?;
        Ok(pods.items.iter().map(pod_summary).collect())
    }

    async fn service_summary(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ServiceSummary>, ClusterError> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let Some(service) = api.get_opt(name).await? else {
            return Ok(None);
        };

        let spec = service.spec.unwrap_or_default();
        let ports = spec
            .ports
            .unwrap_or_default()
            .into_iter()
            .map(|p| ServicePortSummary {
                port: p.port,
                target_port: match p.target_port {
                    Some(IntOrString::Int(port)) => Some(port),
                    Some(IntOrString::String(named)) => named.parse().ok(),
                    None => None,
                },
                node_port: p.node_port,
            })
            .collect();

        Ok(Some(ServiceSummary {
            name: name.to_string(),
            service_type: spec.type_.unwrap_or_else(|| "ClusterIP".to_string()),
            ports,
        }))
    }

    async fn recent_events(
        &self,
        namespace: &str,
        name_prefix: &str,
        limit: usize,
    ) -> Result<Vec<EventSummary>, ClusterError> {
        let api: Api<Event> = Api::namespaced(self.client.clone(), namespace);
        let events = api.list(&ListParams::default()).await?;

        let mut related: Vec<(Option<chrono::DateTime<chrono::Utc>>, EventSummary)> = events
            .items
            .into_iter()
            .filter(|e| {
                e.involved_object
                    .name
                    .as_deref()
                    .is_some_and(|n| n.starts_with(name_prefix))
            })
            .map(|e| {
                let seen = e
                    .last_timestamp
                    .as_ref()
                    .map(|t| t.0)
                    .or_else(|| e.event_time.as_ref().map(|t| t.0))
                    .or_else(|| e.metadata.creation_timestamp.as_ref().map(|t| t.0));
                let summary = EventSummary {
                    object: format!(
                        "{}/{}",
                        e.involved_object.kind.clone().unwrap_or_default(),
                        e.involved_object.name.clone().unwrap_or_default()
                    ),
                    event_type: e.type_.unwrap_or_else(|| "Normal".to_string()),
                    reason: e.reason.unwrap_or_default(),
                    message: e.message.unwrap_or_default(),
                    last_seen: seen.map(|t| t.to_rfc3339()),
                };
                (seen, summary)
            })
            .collect();

        related.sort_by_key(|(seen, _)| *seen);
        let skip = related.len().saturating_sub(limit);
        Ok(related.into_iter().skip(skip).map(|(_, e)| e).collect())
    }

    async fn exec(
        &self,
        namespace: &str,
        pod: &str,
        command: &[String],
    ) -> Result<ExecOutput, ClusterError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = AttachParams::default().stdout(true).stderr(false);

        let mut attached = api
            .exec(pod, command.to_vec(), &params)
            .await
            .map_err(|e| ClusterError::Exec(e.to_string()))?;

        let mut stdout = String::new();
        if let Some(mut reader) = attached.stdout() {
            reader
                .read_to_string(&mut stdout)
                .await
                .map_err(|e| ClusterError::Exec(e.to_string()))?;
        }

        let status = match attached.take_status() {
            Some(status) => status.await,
            None => None,
        };

        let success = status
            .as_ref()
            .and_then(|s| s.status.as_deref())
            .map(|s| s == "Success")
            .unwrap_or(true);
        let message = status.and_then(|s| s.message);

        Ok(ExecOutput {
            stdout,
            success,
            message,
        })
    }
}

fn object_name(name: Option<&str>) -> Result<&str, ClusterError> {
    name.ok_or_else(|| ClusterError::Decode("object has no metadata.name".to_string()))
}

fn pod_summary(pod: &Pod) -> PodSummary {
    let status = pod.status.as_ref();
    let containers = status
        .and_then(|s| s.container_statuses.as_ref())
        .cloned()
        .unwrap_or_default();

    PodSummary {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        ready: !containers.is_empty() && containers.iter().all(|c| c.ready),
        restarts: containers.iter().map(|c| c.restart_count).sum(),
        waiting_reason: containers.iter().find_map(|c| {
            c.state
                .as_ref()
                .and_then(|s| s.waiting.as_ref())
                .and_then(|w| w.reason.clone())
        }),
        image: pod
            .spec
            .as_ref()
            .and_then(|s| s.containers.first())
            .and_then(|c| c.image.clone()),
    }
}
