use kubesweep_k8s::ClusterError;
use kubesweep_types::ResourceKind;

pub type Result<T, E = SweepError> = std::result::Result<T, E>;

/// Fatal errors of a sweep run; nothing is reported when one occurs.
///
/// Failures to delete individual objects are not errors, they are recorded
/// in the result.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("Cannot reach the cluster")]
    Connectivity {
        #[source]
        source: ClusterError,
    },

    #[error("Namespace '{namespace}' not found in cluster. Re-check --namespace")]
    NamespaceNotFound { namespace: String },

    #[error("Failed to list {kind}")]
    Listing {
        kind: ResourceKind,
        #[source]
        source: ClusterError,
    },

    #[error("Sweep cancelled before any deletion was made")]
    Cancelled,
}

impl SweepError {
    pub fn listing(kind: ResourceKind) -> impl FnOnce(ClusterError) -> Self {
        move |source| Self::Listing { kind, source }
    }

    /// Errors caused by user input rather than the cluster
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::NamespaceNotFound { .. })
    }
}
