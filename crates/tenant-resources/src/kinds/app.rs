//! App resources on the management cluster
//!
//! One App per catalog entry, in the cluster's management namespace. Several
//! tenant clusters may share that namespace, so App names carry the cluster
//! id and listing is scoped by the cluster label. The app operator installs them into the tenant cluster through the
//! kubeconfig Secret and reports release state back in the App status.

use std::sync::Arc;

use async_trait::async_trait;
use tenant_common::crd::{AppKubeConfig, AppSpec, SecretReference};
use tenant_common::labels::APP_LABEL;
use tenant_common::{OwnerConfig, Result};
use tenant_reconcile::{
    list_owned, CancellationSignal, DeletionPolicy, ManagedObject, ObjectKey, ObjectStore,
    ResourceKind, ResourceState, StateTag,
};

use super::cluster_labels;
use crate::policy::AppCatalogEntry;
use crate::spec::ClusterSpecification;

/// App resource kind
pub struct AppKind {
    store: Arc<dyn ObjectStore<AppSpec>>,
    owner: OwnerConfig,
    catalog: Vec<AppCatalogEntry>,
}

impl AppKind {
    /// Kind creating one App per entry of `catalog`
    pub fn new(
        store: Arc<dyn ObjectStore<AppSpec>>,
        owner: OwnerConfig,
        catalog: Vec<AppCatalogEntry>,
    ) -> Self {
        Self {
            store,
            owner,
            catalog,
        }
    }

    fn owner_for(&self, spec: &ClusterSpecification) -> OwnerConfig {
        self.owner.clone().with_cluster(&spec.cluster_id)
    }

    fn app(&self, spec: &ClusterSpecification, entry: &AppCatalogEntry) -> ManagedObject<AppSpec> {
        let payload = AppSpec {
            name: entry.name.clone(),
            namespace: entry.namespace.clone(),
            catalog: entry.catalog.clone(),
            version: entry.version.clone(),
            kube_config: AppKubeConfig {
                in_cluster: false,
                secret: Some(SecretReference {
                    name: spec.kubeconfig_secret_name(),
                    namespace: spec.management_namespace.clone(),
                }),
            },
        };
        let name = format!("{}-{}", spec.cluster_id, entry.name);
        ManagedObject::new(ObjectKey::new(&spec.management_namespace, name), payload)
            .with_labels(cluster_labels(&self.owner, spec))
            .with_label(APP_LABEL, &entry.name)
    }
}

#[async_trait]
impl ResourceKind<ClusterSpecification> for AppKind {
    type Payload = AppSpec;

    fn name(&self) -> &'static str {
        "app"
    }

    fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy::Redirect
    }

    fn store(&self) -> &dyn ObjectStore<AppSpec> {
        self.store.as_ref()
    }

    async fn resolve_current(
        &self,
        spec: &ClusterSpecification,
        signal: &mut CancellationSignal,
    ) -> Result<ResourceState<AppSpec>> {
        let namespaces = [spec.management_namespace.clone()];
        list_owned(self.store.as_ref(), &self.owner_for(spec), &namespaces, signal).await
    }

    fn resolve_desired(&self, spec: &ClusterSpecification) -> Result<ResourceState<AppSpec>> {
        ResourceState::from_objects(
            StateTag::Desired,
            self.catalog.iter().map(|entry| self.app(spec, entry)),
        )
    }
}
