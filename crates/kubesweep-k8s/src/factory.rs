use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::{debug, info};

use crate::client::{ClusterClient, KubeClient};
use crate::error::{ClusterError, Result};

/// Produces an authenticated client for a named cluster
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self, cluster: &str) -> Result<Arc<dyn ClusterClient>>;
}

/// Builds clients from a kubeconfig file
///
/// Authentication (tokens, exec plugins, certificates) is left to `kube`.
#[derive(Clone, Debug, Default)]
pub struct KubeconfigFactory {
    path: Option<PathBuf>,
}

impl KubeconfigFactory {
    /// Use `$KUBECONFIG` or `~/.kube/config`
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn read(&self) -> Result<Kubeconfig> {
        let kubeconfig = match &self.path {
            Some(path) => Kubeconfig::read_from(path),
            None => Kubeconfig::read(),
        };
        kubeconfig.map_err(|source| ClusterError::Kubeconfig { source })
    }
}

/// Find the context for `cluster`: a context name first, then a cluster name
pub fn resolve_context(kubeconfig: &Kubeconfig, cluster: &str) -> Result<String> {
    if kubeconfig.contexts.iter().any(|c| c.name == cluster) {
        return Ok(cluster.to_string());
    }

    let by_cluster = kubeconfig.contexts.iter().find(|c| {
        c.context
            .as_ref()
            .is_some_and(|ctx| ctx.cluster == cluster)
    });
    if let Some(ctx) = by_cluster {
        return Ok(ctx.name.clone());
    }

    let available = kubeconfig
        .contexts
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    Err(ClusterError::ClusterNotFound {
        cluster: cluster.to_string(),
        available,
    })
}

#[async_trait]
impl ClientFactory for KubeconfigFactory {
    async fn connect(&self, cluster: &str) -> Result<Arc<dyn ClusterClient>> {
        let kubeconfig = self.read()?;
        let context = resolve_context(&kubeconfig, cluster)?;
        debug!(%cluster, %context, "resolved kubeconfig context");

        let config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &KubeConfigOptions {
                context: Some(context.clone()),
                ..Default::default()
            },
        )
        .await
        .map_err(|source| ClusterError::ClientConfig {
            context: context.clone(),
            source,
        })?;

        let client = kube::Client::try_from(config).map_err(|e| {
            ClusterError::api(format!("create client for context: {}", context), e)
        })?;

        let client = KubeClient::new(client);
        client.validate().await?;
        info!(%cluster, %context, "connected to cluster");

        Ok(Arc::new(client))
    }
}
