//! Kubernetes client for kubesweep
//!
//! This crate provides the cluster boundary: listing and deleting pods,
//! PVCs and services, reading endpoints, and connecting to a cluster from
//! a kubeconfig.

mod client;
mod convert;
mod error;
mod factory;
#[cfg(any(test, feature = "testing"))]
mod memory;

pub use client::{ClusterClient, KubeClient};
pub use error::{ClusterError, Result};
pub use factory::{ClientFactory, KubeconfigFactory, resolve_context};
#[cfg(any(test, feature = "testing"))]
pub use memory::InMemoryCluster;

// Re-export types that are used in our public API
pub use kubesweep_types::{
    BackendRef, ClaimPhase, InstancePhase, LoadBalancerEndpoint, ReadinessRecord,
    ReadinessSubset, ResourceKey, ResourceKind, StorageClaim, WorkloadInstance,
};
