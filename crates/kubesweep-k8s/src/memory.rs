//! In-memory cluster for driving a sweep without an API server

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use kube::error::ErrorResponse;
use parking_lot::RwLock;

use kubesweep_types::{
    LoadBalancerEndpoint, ReadinessRecord, ResourceKey, ResourceKind, StorageClaim,
    WorkloadInstance,
};

use crate::client::ClusterClient;
use crate::error::{ClusterError, Result};

#[derive(Default)]
struct State {
    namespaces: Vec<String>,
    instances: Vec<WorkloadInstance>,
    claims: Vec<StorageClaim>,
    services: Vec<LoadBalancerEndpoint>,
    readiness: HashMap<ResourceKey, ReadinessRecord>,
    failing_lists: HashSet<ResourceKind>,
    failing_deletes: HashSet<(ResourceKind, ResourceKey)>,
    failing_readiness: HashSet<ResourceKey>,
    deletions: Vec<(ResourceKind, ResourceKey)>,
    list_calls: usize,
}

/// A [`ClusterClient`] over a fixed set of objects.
///
/// Deletes remove the object and are recorded in call order, so tests can
/// inspect both the remaining state and the sequence of deletions.
#[derive(Default)]
pub struct InMemoryCluster {
    state: RwLock<State>,
}

fn error(code: u16, reason: &str, operation: String) -> ClusterError {
    ClusterError::api(
        operation,
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: reason.to_string(),
            reason: reason.to_string(),
            code,
        }),
    )
}

fn in_scope(key: &ResourceKey, namespace: &str) -> bool {
    namespace.is_empty() || key.namespace == namespace
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(self, namespace: &str) -> Self {
        self.state.write().namespaces.push(namespace.to_string());
        self
    }

    pub fn with_instance(self, instance: WorkloadInstance) -> Self {
        self.state.write().instances.push(instance);
        self
    }

    pub fn with_claim(self, claim: StorageClaim) -> Self {
        self.state.write().claims.push(claim);
        self
    }

    /// Add a service; `readiness` becomes its endpoints object, if any
    pub fn with_service(
        self,
        service: LoadBalancerEndpoint,
        readiness: Option<ReadinessRecord>,
    ) -> Self {
        {
            let mut state = self.state.write();
            if let Some(record) = readiness {
                state.readiness.insert(service.key.clone(), record);
            }
            state.services.push(service);
        }
        self
    }

    /// Make every list call for `kind` fail
    pub fn fail_listing(self, kind: ResourceKind) -> Self {
        self.state.write().failing_lists.insert(kind);
        self
    }

    /// Make the endpoints lookup for one service fail with 500
    pub fn fail_readiness(self, service: ResourceKey) -> Self {
        self.state.write().failing_readiness.insert(service);
        self
    }

    /// Make deletion of one object fail with 403
    pub fn fail_delete(self, kind: ResourceKind, key: ResourceKey) -> Self {
        self.state.write().failing_deletes.insert((kind, key));
        self
    }

    /// Successful deletions, in the order they were issued
    pub fn deletions(&self) -> Vec<(ResourceKind, ResourceKey)> {
        self.state.read().deletions.clone()
    }

    pub fn instance_keys(&self) -> Vec<ResourceKey> {
        self.state.read().instances.iter().map(|i| i.key.clone()).collect()
    }

    /// Number of list calls served for pods, PVCs and services
    pub fn list_calls(&self) -> usize {
        self.state.read().list_calls
    }

    fn check_listing(&self, kind: ResourceKind, namespace: &str) -> Result<()> {
        let mut state = self.state.write();
        state.list_calls += 1;
        if state.failing_lists.contains(&kind) {
            return Err(error(
                503,
                "ServiceUnavailable",
                format!("list {} in namespace \"{}\"", kind, namespace),
            ));
        }
        Ok(())
    }

    fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<()> {
        let key = ResourceKey::new(namespace, name);
        let operation = format!("delete {} \"{}\"", kind, key);
        let mut state = self.state.write();

        if state.failing_deletes.contains(&(kind, key.clone())) {
            return Err(error(403, "Forbidden", operation));
        }

        let removed = match kind {
            ResourceKind::Instance => {
                let before = state.instances.len();
                state.instances.retain(|i| i.key != key);
                before - state.instances.len()
            }
            ResourceKind::Claim => {
                let before = state.claims.len();
                state.claims.retain(|c| c.key != key);
                before - state.claims.len()
            }
            ResourceKind::Service => {
                let before = state.services.len();
                state.services.retain(|s| s.key != key);
                state.readiness.remove(&key);
                before - state.services.len()
            }
        };

        if removed == 0 {
            return Err(error(404, "NotFound", operation));
        }
        state.deletions.push((kind, key));
        Ok(())
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        Ok(self.state.read().namespaces.clone())
    }

    async fn list_instances(&self, namespace: &str) -> Result<Vec<WorkloadInstance>> {
        self.check_listing(ResourceKind::Instance, namespace)?;
        let state = self.state.read();
        Ok(state
            .instances
            .iter()
            .filter(|i| in_scope(&i.key, namespace))
            .cloned()
            .collect())
    }

    async fn list_claims(&self, namespace: &str) -> Result<Vec<StorageClaim>> {
        self.check_listing(ResourceKind::Claim, namespace)?;
        let state = self.state.read();
        Ok(state
            .claims
            .iter()
            .filter(|c| in_scope(&c.key, namespace))
            .cloned()
            .collect())
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<LoadBalancerEndpoint>> {
        self.check_listing(ResourceKind::Service, namespace)?;
        let state = self.state.read();
        Ok(state
            .services
            .iter()
            .filter(|s| in_scope(&s.key, namespace))
            .map(|s| LoadBalancerEndpoint::new(s.key.clone(), s.service_type.clone()))
            .collect())
    }

    async fn get_readiness(
        &self,
        namespace: &str,
        service: &str,
    ) -> Result<Option<ReadinessRecord>> {
        let key = ResourceKey::new(namespace, service);
        let state = self.state.read();
        if state.failing_readiness.contains(&key) {
            return Err(error(
                500,
                "InternalError",
                format!("get endpoints \"{}\"", key),
            ));
        }
        Ok(state.readiness.get(&key).cloned())
    }

    async fn delete_instance(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(ResourceKind::Instance, namespace, name)
    }

    async fn delete_claim(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(ResourceKind::Claim, namespace, name)
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<()> {
        self.delete(ResourceKind::Service, namespace, name)
    }
}
