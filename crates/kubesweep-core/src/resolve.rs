//! Dependent deletions: PVCs and LoadBalancer services orphaned by the
//! pods a run expires.

use std::collections::BTreeSet;

use tracing::debug;

use kubesweep_types::{
    ClaimPhase, LoadBalancerEndpoint, ResourceKey, StorageClaim, WorkloadInstance,
};

/// Bound claims that no surviving pod mounts.
///
/// A pod in `expired` does not keep a claim alive even though it has not
/// been deleted yet.
pub fn resolve_claims(
    expired: &BTreeSet<ResourceKey>,
    instances: &[WorkloadInstance],
    claims: &[StorageClaim],
) -> BTreeSet<ResourceKey> {
    claims
        .iter()
        .filter(|claim| claim.phase == ClaimPhase::Bound)
        .filter(|claim| {
            let user = instances
                .iter()
                .filter(|i| !expired.contains(&i.key))
                .find(|i| i.references_claim(&claim.key));
            if let Some(user) = user {
                debug!(pvc = %claim.key, pod = %user.key, "PVC still in use");
            }
            user.is_none()
        })
        .map(|claim| claim.key.clone())
        .collect()
}

/// Why a service was judged orphaned
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrphanReason {
    NoReadinessRecord,
    NoSubsets,
    NotReadyBackendExpired,
}

/// LoadBalancer services left without a cause to exist.
///
/// Services whose readiness record was not fetched (`readiness == None`)
/// are treated as having no record.
pub fn resolve_services(
    expired: &BTreeSet<ResourceKey>,
    services: &[LoadBalancerEndpoint],
) -> BTreeSet<ResourceKey> {
    services
        .iter()
        .filter(|svc| svc.is_load_balancer())
        .filter_map(|svc| {
            let reason = orphan_reason(expired, svc)?;
            debug!(service = %svc.key, ?reason, "service orphaned");
            Some(svc.key.clone())
        })
        .collect()
}

/// Only not-ready backends are correlated with the expire-set; ready
/// backends never cause a deletion.
pub fn orphan_reason(
    expired: &BTreeSet<ResourceKey>,
    svc: &LoadBalancerEndpoint,
) -> Option<OrphanReason> {
    let Some(record) = &svc.readiness else {
        return Some(OrphanReason::NoReadinessRecord);
    };

    if record.subsets.is_empty() {
        return Some(OrphanReason::NoSubsets);
    }

    record
        .subsets
        .iter()
        .flat_map(|subset| subset.not_ready.iter())
        .any(|backend| expired.contains(&backend.key_in(&svc.key.namespace)))
        .then_some(OrphanReason::NotReadyBackendExpired)
}
