//! Chart operator release in the tenant cluster
//!
//! The one release installed directly rather than through an App. Its
//! values carry the cluster DNS IP and registry, both derived from the
//! specification and the provider policy.

use std::sync::Arc;

use async_trait::async_trait;
use tenant_common::{Error, OwnerConfig, Result, KUBE_SYSTEM_NAMESPACE};
use tenant_reconcile::{
    list_owned, CancellationSignal, DeletionPolicy, ManagedObject, ObjectKey, ObjectStore,
    ResourceKind, ResourceState, StateTag,
};

use super::cluster_labels;
use super::values::{ChartOperatorValues, Image, TillerValues};
use crate::chart::ReleaseValues;
use crate::policy::{cluster_dns_ip, ChartSettings, ProviderPolicy};
use crate::spec::ClusterSpecification;

/// Chart operator release kind
pub struct ChartKind {
    store: Arc<dyn ObjectStore<ReleaseValues>>,
    owner: OwnerConfig,
    settings: ChartSettings,
    registry_domain: String,
}

impl ChartKind {
    /// Kind installing the chart of `policy` through `store`
    pub fn new(store: Arc<dyn ObjectStore<ReleaseValues>>, policy: &ProviderPolicy) -> Self {
        Self {
            store,
            owner: policy.owner.clone(),
            settings: policy.chart.clone(),
            registry_domain: policy.registry_domain.clone(),
        }
    }

    fn values(&self, spec: &ClusterSpecification) -> Result<ReleaseValues> {
        let values = ChartOperatorValues {
            cluster_dns_ip: cluster_dns_ip(&spec.network.cluster_ip_range)?.to_string(),
            image: Image {
                registry: self.registry_domain.clone(),
            },
            tiller: TillerValues {
                namespace: KUBE_SYSTEM_NAMESPACE.to_string(),
            },
        };
        serde_json::to_value(&values)
            .map(ReleaseValues)
            .map_err(|e| Error::serialization_for_kind("chart-operator values", e.to_string()))
    }
}

#[async_trait]
impl ResourceKind<ClusterSpecification> for ChartKind {
    type Payload = ReleaseValues;

    fn name(&self) -> &'static str {
        "chart"
    }

    fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy::Redirect
    }

    fn store(&self) -> &dyn ObjectStore<ReleaseValues> {
        self.store.as_ref()
    }

    async fn resolve_current(
        &self,
        _spec: &ClusterSpecification,
        signal: &mut CancellationSignal,
    ) -> Result<ResourceState<ReleaseValues>> {
        let namespaces = [self.settings.namespace.clone()];
        list_owned(self.store.as_ref(), &self.owner, &namespaces, signal).await
    }

    fn resolve_desired(&self, spec: &ClusterSpecification) -> Result<ResourceState<ReleaseValues>> {
        let values = self.values(spec).map_err(|e| e.in_cluster(&spec.cluster_id))?;
        let release = ManagedObject::new(
            ObjectKey::new(&self.settings.namespace, &self.settings.release),
            values,
        )
        .with_labels(cluster_labels(&self.owner, spec));
        ResourceState::from_objects(StateTag::Desired, [release])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::fixtures::aws_cluster;
    use serde_json::json;
    use tenant_common::ApiErrorKind;
    use tenant_reconcile::testing::{MemoryStore, Op};
    use tenant_reconcile::{run_pass, PassOutcome};

    fn kind(store: &Arc<MemoryStore<ReleaseValues>>) -> ChartKind {
        ChartKind::new(store.clone(), &ProviderPolicy::default())
    }

    fn key() -> ObjectKey {
        ObjectKey::new("kube-system", "chart-operator")
    }

    #[test]
    fn test_desired_release_values() {
        let store = Arc::new(MemoryStore::new());
        let desired = kind(&store).resolve_desired(&aws_cluster()).unwrap();

        let release = desired.get(&key()).unwrap();
        assert_eq!(
            release.payload.0,
            json!({
                "clusterDNSIP": "172.31.0.10",
                "image": {"registry": "quay.io"},
                "tiller": {"namespace": "kube-system"}
            })
        );
        assert_eq!(release.labels.get("tenant.dev/cluster").map(String::as_str), Some("5xchu"));
        assert!(!release.labels.contains_key("tenant.dev/service-type"));
    }

    #[test]
    fn test_bad_cluster_ip_range_names_the_cluster() {
        let store = Arc::new(MemoryStore::new());
        let mut spec = aws_cluster();
        spec.network.cluster_ip_range = "garbage".to_string();

        let err = kind(&store).resolve_desired(&spec).unwrap_err();
        assert_eq!(err.cluster(), Some("5xchu"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_installs_then_converges() {
        let store = Arc::new(MemoryStore::new());
        let kind = kind(&store);

        let outcome = run_pass(&kind, &aws_cluster()).await.unwrap();
        assert!(matches!(outcome, PassOutcome::Done(r) if r.created == 1));

        store.clear_calls();
        run_pass(&kind, &aws_cluster()).await.unwrap();
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_registry_change_upgrades_release() {
        let store = Arc::new(MemoryStore::new());
        run_pass(&kind(&store), &aws_cluster()).await.unwrap();

        let policy = ProviderPolicy {
            registry_domain: "registry.example.com".to_string(),
            ..Default::default()
        };
        let outcome = run_pass(&ChartKind::new(store.clone(), &policy), &aws_cluster())
            .await
            .unwrap();

        assert!(matches!(outcome, PassOutcome::Done(r) if r.updated == 1));
        let release = store.object(&key()).unwrap();
        assert_eq!(release.payload.0["image"]["registry"], "registry.example.com");
    }

    #[tokio::test]
    async fn test_unreachable_tenant_cancels_reconciliation() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(Op::List, ApiErrorKind::Unavailable);

        let outcome = run_pass(&kind(&store), &aws_cluster()).await.unwrap();
        assert_eq!(outcome, PassOutcome::ReconciliationCanceled);
        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_release_is_left_alone() {
        let store = Arc::new(MemoryStore::new());
        store.seed(ManagedObject::new(
            ObjectKey::new("kube-system", "someone-elses"),
            ReleaseValues(json!({})),
        ));

        run_pass(&kind(&store), &aws_cluster()).await.unwrap();

        assert_eq!(store.objects().len(), 2);
    }

    #[tokio::test]
    async fn test_deleted_cluster_is_redirected() {
        let store = Arc::new(MemoryStore::new());
        let mut spec = aws_cluster();
        spec.deleted = true;

        let outcome = run_pass(&kind(&store), &spec).await.unwrap();
        assert_eq!(outcome, PassOutcome::ResourceCanceled);
        assert!(store.calls().is_empty());
    }
}
