//! Kubeconfig Secret on the management cluster
//!
//! Packaged application releases reach the tenant cluster through this
//! Secret. It lives in the cluster's management namespace, which the
//! provider removes as a whole on deletion.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tenant_common::labels::{SERVICE_TYPE_LABEL, SERVICE_TYPE_MANAGED};
use tenant_common::{OwnerConfig, Result};
use tenant_reconcile::{
    get_owned, CancellationSignal, DeletionPolicy, ManagedObject, ObjectKey, ObjectStore,
    ResourceKind, ResourceState, StateTag,
};

use super::cluster_labels;
use crate::access::TenantAccess;
use crate::kube_store::SecretData;
use crate::spec::ClusterSpecification;

/// Data key holding the kubeconfig document
pub const KUBECONFIG_KEY: &str = "kubeConfig";

/// Kubeconfig Secret resource kind
pub struct KubeconfigKind {
    store: Arc<dyn ObjectStore<SecretData>>,
    owner: OwnerConfig,
    access: TenantAccess,
}

impl KubeconfigKind {
    /// Kind storing a kubeconfig rendered from `access`
    pub fn new(store: Arc<dyn ObjectStore<SecretData>>, owner: OwnerConfig, access: TenantAccess) -> Self {
        Self { store, owner, access }
    }

    fn key(spec: &ClusterSpecification) -> ObjectKey {
        ObjectKey::new(&spec.management_namespace, spec.kubeconfig_secret_name())
    }
}

#[async_trait]
impl ResourceKind<ClusterSpecification> for KubeconfigKind {
    type Payload = SecretData;

    fn name(&self) -> &'static str {
        "kubeconfig"
    }

    fn deletion_policy(&self) -> DeletionPolicy {
        DeletionPolicy::Redirect
    }

    fn store(&self) -> &dyn ObjectStore<SecretData> {
        self.store.as_ref()
    }

    async fn resolve_current(
        &self,
        spec: &ClusterSpecification,
        signal: &mut CancellationSignal,
    ) -> Result<ResourceState<SecretData>> {
        get_owned(self.store.as_ref(), &self.owner, &Self::key(spec), signal).await
    }

    fn resolve_desired(&self, spec: &ClusterSpecification) -> Result<ResourceState<SecretData>> {
        let kubeconfig = self.access.render_kubeconfig(&spec.cluster_id)?;
        let data = BTreeMap::from([(KUBECONFIG_KEY.to_string(), kubeconfig.into_bytes())]);

        let object = ManagedObject::new(Self::key(spec), SecretData(data))
            .with_labels(cluster_labels(&self.owner, spec))
            .with_label(SERVICE_TYPE_LABEL, SERVICE_TYPE_MANAGED);
        ResourceState::from_objects(StateTag::Desired, [object])
    }
}
