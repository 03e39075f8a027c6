//! Desired-state objects built from a [`ResourceDescriptor`]
//!
//! Builders are pure: the same descriptor always yields the same objects, so
//! re-applying an unchanged descriptor is a no-op on the control plane.

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, ContainerPort, EnvFromSource, HTTPGetAction,
    Namespace, PodSpec, PodTemplateSpec, Probe, ResourceRequirements, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use std::collections::BTreeMap;

use crate::descriptor::{ProbeSettings, ResourceDescriptor, MANAGED_BY};

/// Pod template annotation carrying the hash of the release configuration
pub const CONFIG_HASH_ANNOTATION: &str = "kdeploy.io/config-hash";

const PORT_NAME: &str = "http";

pub fn build_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(
                [(
                    "app.kubernetes.io/managed-by".to_string(),
                    MANAGED_BY.to_string(),
                )]
                .into_iter()
                .collect(),
            ),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}

pub fn build_config_map(
    namespace: &str,
    name: &str,
    labels: BTreeMap<String, String>,
    key_values: &BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        data: Some(key_values.clone()),
        ..ConfigMap::default()
    }
}

fn http_probe(descriptor: &ResourceDescriptor, settings: &ProbeSettings) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(descriptor.health_path.clone()),
            port: IntOrString::String(PORT_NAME.to_string()),
            scheme: Some("HTTP".to_string()),
            ..HTTPGetAction::default()
        }),
        initial_delay_seconds: Some(settings.initial_delay_seconds as i32),
        period_seconds: Some(settings.period_seconds as i32),
        timeout_seconds: Some(settings.timeout_seconds as i32),
        failure_threshold: Some(settings.failure_threshold as i32),
        ..Probe::default()
    }
}

fn resources(descriptor: &ResourceDescriptor) -> ResourceRequirements {
    let requests = [
        ("cpu".to_string(), Quantity(descriptor.cpu_request.clone())),
        ("memory".to_string(), Quantity(descriptor.memory_request.clone())),
    ];
    let limits = [
        ("cpu".to_string(), Quantity(descriptor.cpu_limit.clone())),
        ("memory".to_string(), Quantity(descriptor.memory_limit.clone())),
    ];
    ResourceRequirements {
        requests: Some(requests.into_iter().collect()),
        limits: Some(limits.into_iter().collect()),
        ..ResourceRequirements::default()
    }
}

/// Workload with zero-downtime rolling updates and three probe tiers
pub fn build_deployment(descriptor: &ResourceDescriptor, config_hash: &str) -> Deployment {
    let labels = descriptor.labels();
    let annotations = [(CONFIG_HASH_ANNOTATION.to_string(), config_hash.to_string())]
        .into_iter()
        .collect();
    let strategy = &descriptor.strategy;

    Deployment {
        metadata: ObjectMeta {
            name: Some(descriptor.release_name.clone()),
            namespace: Some(descriptor.namespace.clone()),
            labels: Some(labels.clone()),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(descriptor.replica_count as i32),
            selector: LabelSelector {
                match_labels: Some(descriptor.selector_labels()),
                ..LabelSelector::default()
            },
            min_ready_seconds: Some(strategy.min_ready_seconds as i32),
            progress_deadline_seconds: Some(strategy.progress_deadline_seconds as i32),
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_owned()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_surge: Some(IntOrString::Int(strategy.max_surge as i32)),
                    max_unavailable: Some(IntOrString::Int(strategy.max_unavailable as i32)),
                }),
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(annotations),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: descriptor.release_name.clone(),
                        image: Some(descriptor.image_reference()),
                        // Locally loaded images have no registry to pull from
                        image_pull_policy: Some(
                            if descriptor.has_registry_prefix() {
                                "Always"
                            } else {
                                "IfNotPresent"
                            }
                            .to_string(),
                        ),
                        ports: Some(vec![ContainerPort {
                            name: Some(PORT_NAME.to_string()),
                            container_port: descriptor.container_port as i32,
                            protocol: Some("TCP".to_string()),
                            ..ContainerPort::default()
                        }]),
                        env_from: Some(vec![EnvFromSource {
                            config_map_ref: Some(ConfigMapEnvSource {
                                name: Some(descriptor.config_map_name()),
                                optional: Some(false),
                            }),
                            ..EnvFromSource::default()
                        }]),
                        resources: Some(resources(descriptor)),
                        startup_probe: Some(http_probe(descriptor, &descriptor.probes.startup)),
                        liveness_probe: Some(http_probe(descriptor, &descriptor.probes.liveness)),
                        readiness_probe: Some(http_probe(descriptor, &descriptor.probes.readiness)),
                        ..Container::default()
                    }],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// NodePort service mapping the exposed port to the container port
pub fn build_service(descriptor: &ResourceDescriptor) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(descriptor.service_name()),
            namespace: Some(descriptor.namespace.clone()),
            labels: Some(descriptor.labels()),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("NodePort".to_string()),
            selector: Some(descriptor.selector_labels()),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: descriptor.container_port as i32,
                target_port: Some(IntOrString::Int(descriptor.container_port as i32)),
                node_port: Some(descriptor.node_port as i32),
                protocol: Some("TCP".to_string()),
                ..ServicePort::default()
            }]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}
