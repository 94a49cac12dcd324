use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, PersistentVolumeClaim, Pod, Service};
use kube::Api;
use kube::api::{DeleteParams, ListParams};
use tracing::debug;

use kubesweep_types::{LoadBalancerEndpoint, ReadinessRecord, StorageClaim, WorkloadInstance};

use crate::convert;
use crate::error::{ClusterError, Result, scope};

/// The cluster operations a sweep needs.
///
/// An empty `namespace` means cluster-wide scope for the list calls. Get and
/// delete calls always take the object's own namespace.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    async fn list_instances(&self, namespace: &str) -> Result<Vec<WorkloadInstance>>;

    async fn list_claims(&self, namespace: &str) -> Result<Vec<StorageClaim>>;

    /// Services are returned without their readiness record
    async fn list_services(&self, namespace: &str) -> Result<Vec<LoadBalancerEndpoint>>;

    /// `Ok(None)` when the service has no endpoints object
    async fn get_readiness(&self, namespace: &str, service: &str)
    -> Result<Option<ReadinessRecord>>;

    async fn delete_instance(&self, namespace: &str, name: &str) -> Result<()>;

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl KubeClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Validate that the client can make API calls
    pub async fn validate(&self) -> Result<()> {
        let ns: Api<Namespace> = Api::all(self.client.clone());
        // Just try to list with limit 1 to validate auth
        ns.list(&ListParams::default().limit(1))
            .await
            .map_err(|e| ClusterError::api("reach the cluster API", e))?;
        Ok(())
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    fn pvcs(&self, namespace: &str) -> Api<PersistentVolumeClaim> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    fn services(&self, namespace: &str) -> Api<Service> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let list = namespaces
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::api("list namespaces", e))?;

        Ok(list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect())
    }

    async fn list_instances(&self, namespace: &str) -> Result<Vec<WorkloadInstance>> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::api(format!("list pods in {}", scope(namespace)), e))?;

        debug!(count = list.items.len(), scope = %scope(namespace), "listed pods");
        Ok(list
            .items
            .into_iter()
            .map(|pod| convert::pod_to_instance(pod, namespace))
            .collect())
    }

    async fn list_claims(&self, namespace: &str) -> Result<Vec<StorageClaim>> {
        let list = self
            .pvcs(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| ClusterError::api(format!("list PVCs in {}", scope(namespace)), e))?;

        debug!(count = list.items.len(), scope = %scope(namespace), "listed PVCs");
        Ok(list
            .items
            .into_iter()
            .map(|pvc| convert::pvc_to_claim(pvc, namespace))
            .collect())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<LoadBalancerEndpoint>> {
        let list = self
            .services(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| {
                ClusterError::api(format!("list services in {}", scope(namespace)), e)
            })?;

        debug!(count = list.items.len(), scope = %scope(namespace), "listed services");
        Ok(list
            .items
            .into_iter()
            .map(|svc| convert::service_to_endpoint(svc, namespace))
            .collect())
    }

    async fn get_readiness(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<ReadinessRecord>> {
        let endpoints: Api<Endpoints> = Api::namespaced(self.client.clone(), namespace);
        let found = endpoints.get_opt(service).await.map_err(|e| {
            ClusterError::api(
                format!("get endpoints for service \"{}/{}\"", namespace, service),
                e,
            )
        })?;
        Ok(found.map(convert::endpoints_to_readiness))
    }

    async fn delete_instance(&self, namespace: &str, name: &str) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| ClusterError::api(format!("delete pod \"{}/{}\"", namespace, name), e))?;
        Ok(())
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        pvcs.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| ClusterError::api(format!("delete PVC \"{}/{}\"", namespace, name), e))?;
        Ok(())
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        services
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| {
                ClusterError::api(format!("delete service \"{}/{}\"", namespace, name), e)
            })?;
        Ok(())
    }
}
