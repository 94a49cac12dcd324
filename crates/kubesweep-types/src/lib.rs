//! Shared types for kubesweep
//!
//! This crate contains the cluster snapshot model and the result of a
//! reconciliation run, used across all kubesweep crates.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

// ============================================================================
// Identity
// ============================================================================

/// Namespaced identity of a cluster object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// The three resource kinds a run may delete
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    Instance,
    Claim,
    Service,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Instance => "pods",
            Self::Claim => "PVCs",
            Self::Service => "services",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Workload Instances (pods)
// ============================================================================

/// Lifecycle phase of a workload instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum InstancePhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl From<&str> for InstancePhase {
    fn from(s: &str) -> Self {
        match s {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// A container that reached the terminated state
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TerminatedContainer {
    pub container: String,
    pub finished_at: DateTime<Utc>,
}

/// A running or finished pod
#[derive(Clone, Debug)]
pub struct WorkloadInstance {
    pub key: ResourceKey,
    pub phase: InstancePhase,
    pub terminated: Vec<TerminatedContainer>,
    /// Names of the PVCs mounted by this pod (same namespace)
    pub claims: Vec<String>,
}

impl WorkloadInstance {
    pub fn new(key: ResourceKey, phase: InstancePhase) -> Self {
        Self {
            key,
            phase,
            terminated: Vec::new(),
            claims: Vec::new(),
        }
    }

    /// Most recent container finish time, if any container terminated
    pub fn latest_finish(&self) -> Option<DateTime<Utc>> {
        self.terminated.iter().map(|t| t.finished_at).max()
    }

    /// Whether this pod mounts the given claim
    pub fn references_claim(&self, claim: &ResourceKey) -> bool {
        self.key.namespace == claim.namespace && self.claims.iter().any(|c| c == &claim.name)
    }
}

// ============================================================================
// Storage Claims (PVCs)
// ============================================================================

/// Binding phase of a storage claim
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ClaimPhase {
    Bound,
    Pending,
    Lost,
    Unknown,
}

impl From<&str> for ClaimPhase {
    fn from(s: &str) -> Self {
        match s {
            "Bound" => Self::Bound,
            "Pending" => Self::Pending,
            "Lost" => Self::Lost,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageClaim {
    pub key: ResourceKey,
    pub phase: ClaimPhase,
}

impl StorageClaim {
    pub fn new(key: ResourceKey, phase: ClaimPhase) -> Self {
        Self { key, phase }
    }
}

// ============================================================================
// Load Balancer Services
// ============================================================================

pub const LOAD_BALANCER: &str = "LoadBalancer";

/// Reference from an endpoint address to the pod backing it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendRef {
    /// Target namespace, when the reference carries one
    pub namespace: Option<String>,
    pub name: String,
}

impl BackendRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Resolve to a key, defaulting to the owning service's namespace
    pub fn key_in(&self, service_namespace: &str) -> ResourceKey {
        ResourceKey::new(
            self.namespace.as_deref().unwrap_or(service_namespace),
            self.name.clone(),
        )
    }
}

#[derive(Clone, Debug, Default)]
pub struct ReadinessSubset {
    pub ready: Vec<BackendRef>,
    pub not_ready: Vec<BackendRef>,
}

/// The endpoints object of a service
#[derive(Clone, Debug, Default)]
pub struct ReadinessRecord {
    pub subsets: Vec<ReadinessSubset>,
}

/// A service together with its readiness record
#[derive(Clone, Debug)]
pub struct LoadBalancerEndpoint {
    pub key: ResourceKey,
    /// Declared `spec.type`, as reported by the API
    pub service_type: String,
    /// `None` when no endpoints object exists for the service
    pub readiness: Option<ReadinessRecord>,
}

impl LoadBalancerEndpoint {
    pub fn new(key: ResourceKey, service_type: impl Into<String>) -> Self {
        Self {
            key,
            service_type: service_type.into(),
            readiness: None,
        }
    }

    pub fn is_load_balancer(&self) -> bool {
        self.service_type == LOAD_BALANCER
    }
}

// ============================================================================
// Retention
// ============================================================================

/// How long a completed pod is kept after its last container finished
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct RetentionThreshold {
    hours: u32,
}

impl RetentionThreshold {
    pub const DEFAULT_HOURS: u32 = 24;

    pub fn from_hours(hours: u32) -> Self {
        Self { hours }
    }

    pub fn hours(&self) -> u32 {
        self.hours
    }

    /// Pods that finished strictly before this instant are expired.
    ///
    /// Saturates at the earliest representable time, so a huge threshold
    /// expires nothing.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(Duration::hours(i64::from(self.hours)))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for RetentionThreshold {
    fn default() -> Self {
        Self::from_hours(Self::DEFAULT_HOURS)
    }
}

// ============================================================================
// Reconciliation Result
// ============================================================================

/// Whether deletions were simulated or executed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Simulated,
    Executed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedDeletion {
    pub key: ResourceKey,
    pub reason: String,
}

/// Outcome for one resource kind
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct KindReport {
    /// Everything the run decided to remove ("would delete" in a dry run)
    pub planned: Vec<ResourceKey>,
    /// Deletions confirmed by the API; always empty in a dry run
    pub deleted: Vec<ResourceKey>,
    pub failed: Vec<FailedDeletion>,
}

impl KindReport {
    pub fn planned(planned: Vec<ResourceKey>) -> Self {
        Self {
            planned,
            ..Default::default()
        }
    }
}

/// Size of the snapshot a run worked from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Inventory {
    pub instances: usize,
    pub claims: usize,
    pub load_balancers: usize,
}

/// The result of one reconciliation run
#[derive(Clone, Debug, Serialize)]
pub struct ReconciliationResult {
    pub mode: RunMode,
    pub inventory: Inventory,
    pub instances: KindReport,
    pub claims: KindReport,
    pub services: KindReport,
    /// Set when the run was cancelled while deleting
    pub cancelled: bool,
    /// Pods left after deletion, when re-listed
    pub remaining_instances: Option<usize>,
}

impl ReconciliationResult {
    fn kinds(&self) -> [(&'static str, &KindReport); 3] {
        [
            ("pods", &self.instances),
            ("PVCs", &self.claims),
            ("LoadBalancer services", &self.services),
        ]
    }
}

fn join_keys<'a>(keys: impl Iterator<Item = &'a ResourceKey>) -> String {
    keys.map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Scanned {} pods, {} PVCs, {} LoadBalancer services",
            self.inventory.instances, self.inventory.claims, self.inventory.load_balancers
        )?;

        for (label, report) in self.kinds() {
            match self.mode {
                RunMode::Simulated => writeln!(
                    f,
                    "{} {} to delete: [{}]",
                    report.planned.len(),
                    label,
                    join_keys(report.planned.iter())
                )?,
                RunMode::Executed => {
                    writeln!(
                        f,
                        "Deleted {} {}: [{}]",
                        report.deleted.len(),
                        label,
                        join_keys(report.deleted.iter())
                    )?;
                    if !report.failed.is_empty() {
                        let failed = report
                            .failed
                            .iter()
                            .map(|d| format!("{} ({})", d.key, d.reason))
                            .collect::<Vec<_>>()
                            .join(", ");
                        writeln!(
                            f,
                            "Failed to delete {} {}: [{}]",
                            report.failed.len(),
                            label,
                            failed
                        )?;
                    }
                }
            }
        }

        if let Some(remaining) = self.remaining_instances {
            writeln!(f, "{} pods remain after deletion", remaining)?;
        }
        if self.cancelled {
            writeln!(f, "Run was cancelled; only confirmed deletions are listed")?;
        }
        Ok(())
    }
}
