//! System namespace in the tenant cluster
//!
//! Created once and never updated or deleted here. On cluster deletion the
//! whole tenant cluster goes away with it.

use std::sync::Arc;

use async_trait::async_trait;
use tenant_common::{OwnerConfig, Result};
use tenant_reconcile::{
    get_owned, CancellationSignal, ChangeKinds, DeletionPolicy, ManagedObject, ObjectKey,
    ObjectStore, ResourceKind, ResourceState, StateTag,
};

use super::cluster_labels;
use crate::kube_store::NamespacePayload;
use crate::spec::ClusterSpecification;

/// Namespace resource kind
pub struct NamespaceKind {
    store: Arc<dyn ObjectStore<NamespacePayload>>,
    owner: OwnerConfig,
    namespace: String,
}

impl NamespaceKind {
    /// Kind creating `namespace` through `store`
    pub fn new(
        store: Arc<dyn ObjectStore<NamespacePayload>>,
        owner: OwnerConfig,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            owner,
            namespace: namespace.into(),
        }
    }

    fn key(&self) -> ObjectKey {
        ObjectKey::cluster_scoped(&self.namespace)
    }
}

#[async_trait]
impl ResourceKind<ClusterSpecification> for NamespaceKind {
    type Payload = NamespacePayload;

    fn name(&self) -> &'static str {
        "namespace"
    }

    fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy::Redirect
    }

    fn changes(&self) -> ChangeKinds {
        ChangeKinds::CREATE_ONLY
    }

    fn store(&self) -> &dyn ObjectStore<NamespacePayload> {
        self.store.as_ref()
    }

    async fn resolve_current(
        &self,
        _spec: &ClusterSpecification,
        signal: &mut CancellationSignal,
    ) -> Result<ResourceState<NamespacePayload>> {
        get_owned(self.store.as_ref(), &self.owner, &self.key(), signal).await
    }

    fn resolve_desired(&self, spec: &ClusterSpecification) -> Result<ResourceState<NamespacePayload>> {
        let object = ManagedObject::new(self.key(), NamespacePayload)
            .with_labels(cluster_labels(&self.owner, spec));
        ResourceState::from_objects(StateTag::Desired, [object])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::fixtures::aws_cluster;
    use tenant_common::ApiErrorKind;
    use tenant_reconcile::testing::{MemoryStore, Op};
    use tenant_reconcile::{run_pass, PassOutcome};

    fn kind(store: &Arc<MemoryStore<NamespacePayload>>) -> NamespaceKind {
        NamespaceKind::new(store.clone(), OwnerConfig::default(), "tenant-system")
    }

    #[tokio::test]
    async fn test_creates_missing_namespace_with_cluster_labels() {
        let store = Arc::new(MemoryStore::new());
        let outcome = run_pass(&kind(&store), &aws_cluster()).await.unwrap();

        assert!(matches!(outcome, PassOutcome::Done(r) if r.created == 1));
        let created = store.object(&ObjectKey::cluster_scoped("tenant-system")).unwrap();
        assert_eq!(created.labels.get("tenant.dev/cluster").map(String::as_str), Some("5xchu"));
        assert_eq!(
            created.labels.get("tenant.dev/organization").map(String::as_str),
            Some("acme")
        );
    }

    #[tokio::test]
    async fn test_existing_namespace_is_never_updated() {
        let store = Arc::new(MemoryStore::new());
        store.seed(
            ManagedObject::new(ObjectKey::cluster_scoped("tenant-system"), NamespacePayload)
                .with_labels(OwnerConfig::default().owner_labels()),
        );

        run_pass(&kind(&store), &aws_cluster()).await.unwrap();

        assert!(store.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_namespace_of_same_name_is_tolerated() {
        let store = Arc::new(MemoryStore::new());
        store.seed(ManagedObject::new(
            ObjectKey::cluster_scoped("tenant-system"),
            NamespacePayload,
        ));

        let outcome = run_pass(&kind(&store), &aws_cluster()).await.unwrap();

        assert!(matches!(outcome, PassOutcome::Done(r) if r.created == 1));
        assert!(store.object(&ObjectKey::cluster_scoped("tenant-system")).unwrap().labels.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_cluster_is_left_alone() {
        let store = Arc::new(MemoryStore::new());
        let mut spec = aws_cluster();
        spec.deleted = true;

        let outcome = run_pass(&kind(&store), &spec).await.unwrap();

        assert_eq!(outcome, PassOutcome::ResourceCanceled);
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_booting_tenant_api_cancels_reconciliation() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(Op::Get, ApiErrorKind::Timeout);

        let outcome = run_pass(&kind(&store), &aws_cluster()).await.unwrap();

        assert_eq!(outcome, PassOutcome::ReconciliationCanceled);
        assert!(store.mutations().is_empty());
    }
}
