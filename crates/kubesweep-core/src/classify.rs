use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use kubesweep_types::{InstancePhase, ResourceKey, RetentionThreshold, WorkloadInstance};

/// Pods partitioned by whether they outlived the retention window
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    pub expire: BTreeSet<ResourceKey>,
    pub retain: BTreeSet<ResourceKey>,
}

/// Mark Succeeded pods whose last container finished before `now - threshold`.
///
/// Pods in any other phase, and Succeeded pods with no terminated container,
/// are always retained.
pub fn classify(
    instances: &[WorkloadInstance],
    threshold: RetentionThreshold,
    now: DateTime<Utc>,
) -> Classification {
    let cutoff = threshold.cutoff(now);
    let mut result = Classification::default();

    for instance in instances {
        if is_expired(instance, cutoff) {
            result.expire.insert(instance.key.clone());
        } else {
            result.retain.insert(instance.key.clone());
        }
    }

    result
}

fn is_expired(instance: &WorkloadInstance, cutoff: DateTime<Utc>) -> bool {
    if instance.phase != InstancePhase::Succeeded {
        return false;
    }

    match instance.latest_finish() {
        Some(finished) if finished < cutoff => {
            debug!(pod = %instance.key, %finished, %cutoff, "pod expired");
            true
        }
        _ => false,
    }
}
