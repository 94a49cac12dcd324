//! Liveness classification and reconciliation for kubesweep
//!
//! Given a snapshot of pods, PVCs and LoadBalancer services, decide which
//! are dangling and remove them (or report what would be removed).

mod classify;
mod config;
mod error;
mod reconcile;
mod resolve;

pub use classify::{Classification, classify};
pub use config::{DEFAULT_CONCURRENCY, RunConfig};
pub use error::{Result, SweepError};
pub use reconcile::{Phase, Plan, Reconciler, Snapshot, reconcile};
pub use resolve::{OrphanReason, orphan_reason, resolve_claims, resolve_services};

// Re-export types used in our public API
pub use kubesweep_types::{ReconciliationResult, RetentionThreshold, RunMode};
