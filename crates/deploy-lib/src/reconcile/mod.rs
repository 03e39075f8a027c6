//! Idempotent reconciliation of the release's desired state
//!
//! Every object is applied declaratively; the control plane computes the
//! difference, so re-running against an unchanged descriptor changes nothing.

mod config;
mod manifest;
mod namespace;
mod workload;

pub use config::{config_hash, ConfigReconciler};
pub use manifest::{
    build_config_map, build_deployment, build_namespace, build_service, CONFIG_HASH_ANNOTATION,
};
pub use namespace::NamespaceEnsurer;
pub use workload::WorkloadReconciler;
