//! Conversion from API objects into the snapshot model

use k8s_openapi::api::core::v1::{
    EndpointAddress, Endpoints, PersistentVolumeClaim, Pod, Service,
};
use kube::ResourceExt;

use kubesweep_types::{
    BackendRef, ClaimPhase, InstancePhase, LoadBalancerEndpoint, ReadinessRecord,
    ReadinessSubset, ResourceKey, StorageClaim, TerminatedContainer, WorkloadInstance,
};

/// Objects listed through `Api::namespaced` may omit the namespace
fn key_of<K: ResourceExt>(obj: &K, fallback_namespace: &str) -> ResourceKey {
    let namespace = obj
        .namespace()
        .unwrap_or_else(|| fallback_namespace.to_string());
    ResourceKey::new(namespace, obj.name_any())
}

pub fn pod_to_instance(pod: Pod, namespace: &str) -> WorkloadInstance {
    let mut instance = WorkloadInstance::new(key_of(&pod, namespace), InstancePhase::Unknown);

    if let Some(spec) = pod.spec {
        instance.claims = spec
            .volumes
            .unwrap_or_default()
            .into_iter()
            .filter_map(|v| v.persistent_volume_claim)
            .map(|pvc| pvc.claim_name)
            .collect();
    }

    if let Some(status) = pod.status {
        instance.phase = status
            .phase
            .as_deref()
            .map(InstancePhase::from)
            .unwrap_or(InstancePhase::Unknown);

        // Init containers are not considered
        instance.terminated = status
            .container_statuses
            .unwrap_or_default()
            .into_iter()
            .filter_map(|cs| {
                let finished_at = cs.state?.terminated?.finished_at?;
                Some(TerminatedContainer {
                    container: cs.name,
                    finished_at: finished_at.0,
                })
            })
            .collect();
    }

    instance
}

pub fn pvc_to_claim(pvc: PersistentVolumeClaim, namespace: &str) -> StorageClaim {
    let key = key_of(&pvc, namespace);
    let phase = pvc
        .status
        .and_then(|s| s.phase)
        .as_deref()
        .map(ClaimPhase::from)
        .unwrap_or(ClaimPhase::Unknown);
    StorageClaim::new(key, phase)
}

pub fn service_to_endpoint(svc: Service, namespace: &str) -> LoadBalancerEndpoint {
    let key = key_of(&svc, namespace);
    let service_type = svc.spec.and_then(|s| s.type_).unwrap_or_default();
    LoadBalancerEndpoint::new(key, service_type)
}

fn backends(addresses: Option<Vec<EndpointAddress>>) -> Vec<BackendRef> {
    addresses
        .unwrap_or_default()
        .into_iter()
        .filter_map(|addr| {
            let target = addr.target_ref?;
            Some(BackendRef {
                namespace: target.namespace,
                name: target.name?,
            })
        })
        .collect()
}

pub fn endpoints_to_readiness(endpoints: Endpoints) -> ReadinessRecord {
    ReadinessRecord {
        subsets: endpoints
            .subsets
            .unwrap_or_default()
            .into_iter()
            .map(|subset| ReadinessSubset {
                ready: backends(subset.addresses),
                not_ready: backends(subset.not_ready_addresses),
            })
            .collect(),
    }
}
