use std::collections::BTreeSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kubesweep_k8s::{ClusterClient, ClusterError};
use kubesweep_types::{
    FailedDeletion, Inventory, KindReport, LoadBalancerEndpoint, ReconciliationResult,
    ResourceKey, ResourceKind, RunMode, StorageClaim, WorkloadInstance,
};

use crate::classify::classify;
use crate::config::RunConfig;
use crate::error::{Result, SweepError};
use crate::resolve::{resolve_claims, resolve_services};

/// Stages of a run, entered strictly in order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Fetching,
    Classifying,
    Resolving,
    Acting,
    Reporting,
    Done,
}

/// Cluster state a run decides on; fetched once, never refreshed mid-run
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    pub instances: Vec<WorkloadInstance>,
    pub claims: Vec<StorageClaim>,
    /// LoadBalancer services only, with readiness attached
    pub services: Vec<LoadBalancerEndpoint>,
}

impl Snapshot {
    fn inventory(&self) -> Inventory {
        Inventory {
            instances: self.instances.len(),
            claims: self.claims.len(),
            load_balancers: self.services.len(),
        }
    }
}

/// What a run intends to delete
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub instances: BTreeSet<ResourceKey>,
    pub claims: BTreeSet<ResourceKey>,
    pub services: BTreeSet<ResourceKey>,
}

/// Runs one fetch → classify → resolve → act → report cycle
pub struct Reconciler<'a, C: ClusterClient + ?Sized> {
    client: &'a C,
    config: RunConfig,
}

impl<'a, C: ClusterClient + ?Sized> Reconciler<'a, C> {
    pub fn new(client: &'a C, config: RunConfig) -> Self {
        Self { client, config }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<ReconciliationResult> {
        self.run_at(Utc::now(), cancel).await
    }

    /// Run with an explicit "now" anchoring the retention window
    pub async fn run_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult> {
        self.enter(Phase::Fetching);
        let snapshot = guarded(cancel, self.fetch())
            .await
            .inspect_err(|e| debug!(phase = ?Phase::Fetching, error = %e, "sweep failed"))?;

        self.enter(Phase::Classifying);
        let classification = classify(&snapshot.instances, self.config.threshold, now);
        debug!(
            expire = classification.expire.len(),
            retain = classification.retain.len(),
            "classified pods"
        );

        self.enter(Phase::Resolving);
        let claims =
            resolve_claims(&classification.expire, &snapshot.instances, &snapshot.claims);
        let services = resolve_services(&classification.expire, &snapshot.services);
        let plan = Plan {
            instances: classification.expire,
            claims,
            services,
        };
        if cancel.is_cancelled() {
            return Err(SweepError::Cancelled);
        }
        info!(
            pods = plan.instances.len(),
            pvcs = plan.claims.len(),
            services = plan.services.len(),
            dry_run = self.config.dry_run,
            "planned deletions"
        );

        self.enter(Phase::Acting);
        let outcome = self.act(&plan, cancel).await;

        self.enter(Phase::Reporting);
        let remaining_instances = if self.should_relist(&outcome) {
            self.relist().await
        } else {
            None
        };

        let result = ReconciliationResult {
            mode: if self.config.dry_run {
                RunMode::Simulated
            } else {
                RunMode::Executed
            },
            inventory: snapshot.inventory(),
            instances: outcome.instances,
            claims: outcome.claims,
            services: outcome.services,
            cancelled: outcome.cancelled,
            remaining_instances,
        };

        self.enter(Phase::Done);
        Ok(result)
    }

    fn enter(&self, phase: Phase) {
        debug!(?phase, "entering phase");
    }

    async fn fetch(&self) -> Result<Snapshot> {
        if let Some(namespace) = &self.config.namespace {
            let namespaces = self
                .client
                .list_namespaces()
                .await
                .map_err(|source| SweepError::Connectivity { source })?;
            if !namespaces.iter().any(|ns| ns == namespace) {
                return Err(SweepError::NamespaceNotFound {
                    namespace: namespace.clone(),
                });
            }
        }

        let scope = self.config.scope();
        let (instances, claims, services) = tokio::try_join!(
            async {
                self.client
                    .list_instances(scope)
                    .await
                    .map_err(SweepError::listing(ResourceKind::Instance))
            },
            async {
                self.client
                    .list_claims(scope)
                    .await
                    .map_err(SweepError::listing(ResourceKind::Claim))
            },
            async {
                self.client
                    .list_services(scope)
                    .await
                    .map_err(SweepError::listing(ResourceKind::Service))
            },
        )?;

        let services = self.attach_readiness(services).await?;
        let snapshot = Snapshot {
            instances,
            claims,
            services,
        };
        info!(
            pods = snapshot.instances.len(),
            pvcs = snapshot.claims.len(),
            load_balancers = snapshot.services.len(),
            scope = if scope.is_empty() { "all namespaces" } else { scope },
            "fetched cluster snapshot"
        );
        Ok(snapshot)
    }

    /// Look up endpoints for every LoadBalancer service; other types are dropped
    async fn attach_readiness(
        &self,
        services: Vec<LoadBalancerEndpoint>,
    ) -> Result<Vec<LoadBalancerEndpoint>> {
        let lookups = services
            .into_iter()
            .filter(|svc| svc.is_load_balancer())
            .map(|mut svc| async move {
                svc.readiness = self
                    .client
                    .get_readiness(&svc.key.namespace, &svc.key.name)
                    .await
                    .map_err(SweepError::listing(ResourceKind::Service))?;
                Ok::<_, SweepError>(svc)
            });

        let mut services: Vec<_> = stream::iter(lookups)
            .buffer_unordered(self.config.concurrency)
            .try_collect()
            .await?;
        services.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(services)
    }

    async fn act(&self, plan: &Plan, cancel: &CancellationToken) -> Outcome {
        if self.config.dry_run {
            return Outcome {
                instances: KindReport::planned(plan.instances.iter().cloned().collect()),
                claims: KindReport::planned(plan.claims.iter().cloned().collect()),
                services: KindReport::planned(plan.services.iter().cloned().collect()),
                cancelled: false,
            };
        }

        // Pod deletions are all issued before any dependent is touched
        let (instances, mut cancelled) = self
            .delete_all(ResourceKind::Instance, &plan.instances, cancel)
            .await;
        let (claims, c) = self
            .delete_all(ResourceKind::Claim, &plan.claims, cancel)
            .await;
        cancelled |= c;
        let (services, c) = self
            .delete_all(ResourceKind::Service, &plan.services, cancel)
            .await;
        cancelled |= c;

        Outcome {
            instances,
            claims,
            services,
            cancelled,
        }
    }

    /// Delete every key, recording per-item failures instead of aborting.
    ///
    /// Returns early, flagged as cancelled, when `cancel` fires; only the
    /// deletions confirmed so far are recorded.
    async fn delete_all(
        &self,
        kind: ResourceKind,
        keys: &BTreeSet<ResourceKey>,
        cancel: &CancellationToken,
    ) -> (KindReport, bool) {
        let mut report = KindReport::planned(keys.iter().cloned().collect());
        if cancel.is_cancelled() {
            return (report, true);
        }

        let mut outcomes = stream::iter(keys)
            .map(|key| async move { (key, self.delete_one(kind, key).await) })
            .buffer_unordered(self.config.concurrency);

        let cancelled = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(%kind, "cancelled while deleting");
                    break true;
                }
                next = outcomes.next() => match next {
                    Some((key, Ok(()))) => {
                        info!(%kind, namespace = %key.namespace, name = %key.name, "deleted");
                        report.deleted.push(key.clone());
                    }
                    Some((key, Err(e))) => {
                        let reason = failure_reason(&e);
                        warn!(
                            %kind,
                            namespace = %key.namespace,
                            name = %key.name,
                            %reason,
                            "delete failed"
                        );
                        report.failed.push(FailedDeletion {
                            key: key.clone(),
                            reason,
                        });
                    }
                    None => break false,
                },
            }
        };

        report.deleted.sort();
        report.failed.sort_by(|a, b| a.key.cmp(&b.key));
        (report, cancelled)
    }

    async fn delete_one(
        &self,
        kind: ResourceKind,
        key: &ResourceKey,
    ) -> kubesweep_k8s::Result<()> {
        let (namespace, name) = (key.namespace.as_str(), key.name.as_str());
        match kind {
            ResourceKind::Instance => self.client.delete_instance(namespace, name).await,
            ResourceKind::Claim => self.client.delete_claim(namespace, name).await,
            ResourceKind::Service => self.client.delete_service(namespace, name).await,
        }
    }

    fn should_relist(&self, outcome: &Outcome) -> bool {
        !self.config.dry_run
            && self.config.relist_after_delete
            && !outcome.cancelled
            && !outcome.instances.deleted.is_empty()
    }

    /// Informational only; the decision is already made
    async fn relist(&self) -> Option<usize> {
        match self.client.list_instances(self.config.scope()).await {
            Ok(instances) => {
                info!(remaining = instances.len(), "pods remaining after deletion");
                Some(instances.len())
            }
            Err(e) => {
                warn!(error = %e, "could not re-list pods after deletion");
                None
            }
        }
    }
}

struct Outcome {
    instances: KindReport,
    claims: KindReport,
    services: KindReport,
    cancelled: bool,
}

async fn guarded<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SweepError::Cancelled),
        result = fut => result,
    }
}

/// The API's own message, without the operation prefix
fn failure_reason(e: &ClusterError) -> String {
    match std::error::Error::source(e) {
        Some(source) => source.to_string(),
        None => e.to_string(),
    }
}

/// Sweep `client` once with the given configuration
pub async fn reconcile<C: ClusterClient + ?Sized>(
    client: &C,
    config: RunConfig,
    cancel: &CancellationToken,
) -> Result<ReconciliationResult> {
    Reconciler::new(client, config).run(cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use kubesweep_k8s::InMemoryCluster;
    use kubesweep_types::{
        BackendRef, ClaimPhase, InstancePhase, ReadinessRecord, ReadinessSubset,
        RetentionThreshold, TerminatedContainer,
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()
    }

    fn key(name: &str) -> ResourceKey {
        ResourceKey::new("batch", name)
    }

    fn finished_pod(name: &str, hours_ago: i64, claims: &[&str]) -> WorkloadInstance {
        let mut pod = WorkloadInstance::new(key(name), InstancePhase::Succeeded);
        pod.terminated.push(TerminatedContainer {
            container: "main".to_string(),
            finished_at: now() - Duration::hours(hours_ago),
        });
        pod.claims = claims.iter().map(|c| c.to_string()).collect();
        pod
    }

    fn lb(name: &str) -> LoadBalancerEndpoint {
        LoadBalancerEndpoint::new(key(name), "LoadBalancer")
    }

    fn not_ready(names: &[&str]) -> ReadinessRecord {
        ReadinessRecord {
            subsets: vec![ReadinessSubset {
                ready: vec![],
                not_ready: names.iter().map(|n| BackendRef::new(*n)).collect(),
            }],
        }
    }

    fn ready(names: &[&str]) -> ReadinessRecord {
        ReadinessRecord {
            subsets: vec![ReadinessSubset {
                ready: names.iter().map(|n| BackendRef::new(*n)).collect(),
                not_ready: vec![],
            }],
        }
    }

    /// job-a expired, job-b recent, with one PVC and service each
    fn cluster() -> InMemoryCluster {
        InMemoryCluster::new()
            .with_namespace("batch")
            .with_instance(finished_pod("job-a", 30, &["data-1"]))
            .with_instance(finished_pod("job-b", 1, &["data-2"]))
            .with_instance(WorkloadInstance::new(key("api"), InstancePhase::Running))
            .with_claim(StorageClaim::new(key("data-1"), ClaimPhase::Bound))
            .with_claim(StorageClaim::new(key("data-2"), ClaimPhase::Bound))
            .with_claim(StorageClaim::new(key("data-3"), ClaimPhase::Pending))
            .with_service(lb("svc-x"), Some(not_ready(&["job-a"])))
            .with_service(lb("svc-y"), None)
            .with_service(lb("svc-z"), Some(ready(&["api"])))
            .with_service(LoadBalancerEndpoint::new(key("internal"), "ClusterIP"), None)
    }

    /// Cancels the run as soon as the first pod deletion succeeds
    struct CancelAfterFirstDelete {
        inner: InMemoryCluster,
        cancel: CancellationToken,
    }

    #[async_trait::async_trait]
    impl ClusterClient for CancelAfterFirstDelete {
        async fn list_namespaces(&self) -> kubesweep_k8s::Result<Vec<String>> {
            self.inner.list_namespaces().await
        }

        async fn list_instances(
            &self,
            namespace: &str,
        ) -> kubesweep_k8s::Result<Vec<WorkloadInstance>> {
            self.inner.list_instances(namespace).await
        }

        async fn list_claims(&self, namespace: &str) -> kubesweep_k8s::Result<Vec<StorageClaim>> {
            self.inner.list_claims(namespace).await
        }

        async fn list_services(
            &self,
            namespace: &str,
        ) -> kubesweep_k8s::Result<Vec<LoadBalancerEndpoint>> {
            self.inner.list_services(namespace).await
        }

        async fn get_readiness(
            &self,
            namespace: &str,
            service: &str,
        ) -> kubesweep_k8s::Result<Option<ReadinessRecord>> {
            self.inner.get_readiness(namespace, service).await
        }

        async fn delete_instance(&self, namespace: &str, name: &str) -> kubesweep_k8s::Result<()> {
            self.inner.delete_instance(namespace, name).await?;
            self.cancel.cancel();
            Ok(())
        }

        async fn delete_claim(&self, namespace: &str, name: &str) -> kubesweep_k8s::Result<()> {
            self.inner.delete_claim(namespace, name).await
        }

        async fn delete_service(&self, namespace: &str, name: &str) -> kubesweep_k8s::Result<()> {
            self.inner.delete_service(namespace, name).await
        }
    }

    fn config(dry_run: bool) -> RunConfig {
        RunConfig::new(
            Some("batch".to_string()),
            RetentionThreshold::from_hours(24),
            dry_run,
        )
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_deleting() {
        let cluster = cluster();
        let result = Reconciler::new(&cluster, config(true))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.mode, RunMode::Simulated);
        assert_eq!(result.instances.planned, vec![key("job-a")]);
        assert_eq!(result.claims.planned, vec![key("data-1")]);
        assert_eq!(result.services.planned, vec![key("svc-x"), key("svc-y")]);
        assert!(result.instances.deleted.is_empty());
        assert!(cluster.deletions().is_empty());
        assert_eq!(result.inventory.load_balancers, 3);
        assert_eq!(result.remaining_instances, None);
    }

    #[tokio::test]
    async fn test_execute_deletes_plan() {
        let cluster = cluster();
        let result = Reconciler::new(&cluster, config(false))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.mode, RunMode::Executed);
        assert_eq!(result.instances.deleted, vec![key("job-a")]);
        assert_eq!(result.claims.deleted, vec![key("data-1")]);
        assert_eq!(result.services.deleted, vec![key("svc-x"), key("svc-y")]);
        assert_eq!(result.remaining_instances, Some(2));
        assert_eq!(cluster.instance_keys(), vec![key("job-b"), key("api")]);
    }

    #[tokio::test]
    async fn test_dry_run_and_execute_plan_the_same() {
        let dry = Reconciler::new(&cluster(), config(true))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap();
        let executed = Reconciler::new(&cluster(), config(false))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(dry.instances.planned, executed.instances.planned);
        assert_eq!(dry.claims.planned, executed.claims.planned);
        assert_eq!(dry.services.planned, executed.services.planned);
    }

    #[tokio::test]
    async fn test_pods_deleted_before_dependents() {
        let cluster = cluster().with_instance(finished_pod("job-c", 48, &[]));
        Reconciler::new(&cluster, config(false))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap();

        let kinds: Vec<_> = cluster.deletions().into_iter().map(|(kind, _)| kind).collect();
        let last_pod = kinds.iter().rposition(|k| *k == ResourceKind::Instance).unwrap();
        let first_other = kinds.iter().position(|k| *k != ResourceKind::Instance).unwrap();
        assert!(last_pod < first_other);
    }

    #[tokio::test]
    async fn test_item_failure_does_not_abort() {
        let cluster = cluster().fail_delete(ResourceKind::Claim, key("data-1"));
        let result = Reconciler::new(&cluster, config(false))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.claims.planned, vec![key("data-1")]);
        assert!(result.claims.deleted.is_empty());
        assert_eq!(result.claims.failed.len(), 1);
        assert_eq!(result.claims.failed[0].key, key("data-1"));
        assert_eq!(result.services.deleted.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_namespace() {
        let cluster = cluster();
        let config = RunConfig::new(
            Some("nope".to_string()),
            RetentionThreshold::default(),
            false,
        );
        let err = Reconciler::new(&cluster, config)
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SweepError::NamespaceNotFound { .. }));
        assert!(err.is_user_error());
        assert_eq!(cluster.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let cluster = cluster().fail_listing(ResourceKind::Service);
        let err = Reconciler::new(&cluster, config(false))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SweepError::Listing {
                kind: ResourceKind::Service,
                ..
            }
        ));
        assert!(cluster.deletions().is_empty());
    }

    #[tokio::test]
    async fn test_readiness_failure_is_fatal() {
        let cluster = cluster().fail_readiness(key("svc-y"));
        let err = Reconciler::new(&cluster, config(false))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SweepError::Listing {
                kind: ResourceKind::Service,
                ..
            }
        ));
        assert!(cluster.deletions().is_empty());
        assert_eq!(cluster.instance_keys().len(), 3);
    }

    #[tokio::test]
    async fn test_cluster_wide_scope() {
        let cluster = cluster()
            .with_instance({
                let mut pod = finished_pod("job-a", 30, &[]);
                pod.key = ResourceKey::new("other", "job-a");
                pod
            });
        let config = RunConfig::new(None, RetentionThreshold::from_hours(24), true);
        let result = Reconciler::new(&cluster, config)
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            result.instances.planned,
            vec![key("job-a"), ResourceKey::new("other", "job-a")]
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cluster = cluster();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = Reconciler::new(&cluster, config(false))
            .run_at(now(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SweepError::Cancelled));
        assert!(cluster.deletions().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_deletion_reports_nothing_confirmed() {
        let cluster = cluster();
        let reconciler = Reconciler::new(&cluster, config(false));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let keys: BTreeSet<_> = [key("job-a")].into_iter().collect();
        let (report, cancelled) = reconciler
            .delete_all(ResourceKind::Instance, &keys, &cancel)
            .await;

        assert!(cancelled);
        assert_eq!(report.planned, vec![key("job-a")]);
        assert!(report.deleted.is_empty());
        assert!(cluster.deletions().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_deletion_keeps_confirmed() {
        let cancel = CancellationToken::new();
        let client = CancelAfterFirstDelete {
            inner: cluster().with_instance(finished_pod("job-c", 48, &[])),
            cancel: cancel.clone(),
        };
        let result = Reconciler::new(&client, config(false).with_concurrency(1))
            .run_at(now(), &cancel)
            .await
            .unwrap();

        assert!(result.cancelled);
        assert_eq!(result.instances.planned, vec![key("job-a"), key("job-c")]);
        assert_eq!(result.instances.deleted, vec![key("job-a")]);
        assert!(result.claims.deleted.is_empty());
        assert!(result.services.deleted.is_empty());
        assert_eq!(result.remaining_instances, None);
        assert_eq!(
            client.inner.deletions(),
            vec![(ResourceKind::Instance, key("job-a"))]
        );
    }

    #[tokio::test]
    async fn test_scan_twice_is_stable() {
        let cluster = cluster();
        let first = Reconciler::new(&cluster, RunConfig::scan(None))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap();
        let second = Reconciler::new(&cluster, RunConfig::scan(None))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(first.instances, second.instances);
        assert_eq!(first.claims, second.claims);
        assert_eq!(first.services, second.services);
    }

    #[tokio::test]
    async fn test_relist_can_be_disabled() {
        let cluster = cluster();
        let result = Reconciler::new(&cluster, config(false).with_relist(false))
            .run_at(now(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.remaining_instances, None);
    }
}
