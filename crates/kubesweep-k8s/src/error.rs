use kube::config::KubeconfigError;

pub type Result<T, E = ClusterError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Failed to read kubeconfig. Is kubectl configured?")]
    Kubeconfig {
        #[source]
        source: KubeconfigError,
    },

    #[error("Cluster '{cluster}' not found in kubeconfig (available contexts: {available})")]
    ClusterNotFound { cluster: String, available: String },

    #[error("Failed to create config for context: {context}")]
    ClientConfig {
        context: String,
        #[source]
        source: KubeconfigError,
    },

    #[error("Failed to {operation}")]
    Api {
        operation: String,
        #[source]
        source: kube::Error,
    },
}

impl ClusterError {
    pub fn api(operation: impl Into<String>, source: kube::Error) -> Self {
        Self::Api {
            operation: operation.into(),
            source,
        }
    }

    /// Whether the API answered 404 for the requested object
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Api {
                source: kube::Error::Api(response),
                ..
            } if response.code == 404
        )
    }
}

/// Human-readable scope for log and error messages
pub(crate) fn scope(namespace: &str) -> String {
    if namespace.is_empty() {
        "all namespaces".to_string()
    } else {
        format!("namespace \"{}\"", namespace)
    }
}
