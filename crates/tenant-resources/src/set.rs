//! Resource set assembly for one tenant cluster

use std::sync::Arc;

use kube::Client;
use tenant_common::crd::AppSpec;
use tenant_common::kube_utils::ClientTimeouts;
use tenant_common::Result;
use tenant_reconcile::{ObjectStore, ResourceSet};
use tracing::debug;

use crate::access::{tenant_client, TenantAccess};
use crate::chart::{
    ChartRef, HelmCli, HelmPull, HelmReleaseStore, KubeReleaseRecords, ReleaseValues,
    DEFAULT_HELM_TIMEOUT,
};
use crate::kinds::{AppKind, ChartKind, ConfigMapKind, KubeconfigKind, NamespaceKind};
use crate::kube_store::{ConfigMapData, KubeStore, NamespacePayload, SecretData};
use crate::policy::ProviderPolicy;
use crate::spec::ClusterSpecification;

/// Stores the kinds of one tenant cluster write through
///
/// Management stores write to the cluster running the operator, tenant
/// stores to the tenant cluster itself.
pub struct Stores {
    /// Kubeconfig Secrets on the management cluster
    pub secrets: Arc<dyn ObjectStore<SecretData>>,
    /// App resources on the management cluster
    pub apps: Arc<dyn ObjectStore<AppSpec>>,
    /// Namespaces in the tenant cluster
    pub namespaces: Arc<dyn ObjectStore<NamespacePayload>>,
    /// Chart releases in the tenant cluster
    pub releases: Arc<dyn ObjectStore<ReleaseValues>>,
    /// Chart values in the tenant cluster
    pub configmaps: Arc<dyn ObjectStore<ConfigMapData>>,
}

impl Stores {
    /// Kube and Helm backed stores for one tenant cluster
    pub async fn connect(
        policy: &ProviderPolicy,
        spec: &ClusterSpecification,
        access: &TenantAccess,
        management: Client,
        timeouts: ClientTimeouts,
    ) -> Result<Self> {
        let tenant = tenant_client(access, &spec.cluster_id, timeouts)
            .await
            .map_err(|e| e.in_cluster(&spec.cluster_id))?;
        let helm = HelmCli::new(access, &spec.cluster_id, DEFAULT_HELM_TIMEOUT)
            .map_err(|e| e.in_cluster(&spec.cluster_id))?;
        let chart = ChartRef {
            repository: policy.chart.repository.clone(),
            chart: policy.chart.chart.clone(),
            version: policy.chart.version.clone(),
        };
        debug!(cluster = %spec.cluster_id, chart = %chart.chart, "Connected tenant stores");

        Ok(Self {
            secrets: Arc::new(KubeStore::<SecretData>::new(management.clone())),
            apps: Arc::new(KubeStore::<AppSpec>::new(management)),
            namespaces: Arc::new(KubeStore::<NamespacePayload>::new(tenant.clone())),
            releases: Arc::new(HelmReleaseStore::new(
                Box::new(KubeReleaseRecords::new(tenant.clone())),
                Box::new(helm),
                Box::new(HelmPull::default()),
                chart,
            )),
            configmaps: Arc::new(KubeStore::<ConfigMapData>::new(tenant)),
        })
    }
}

/// Every kind reconciled for a tenant cluster, in run order
///
/// The kubeconfig Secret comes before the Apps that reference it, and the
/// chart operator before the values its charts read.
pub fn resource_set(
    policy: &ProviderPolicy,
    access: TenantAccess,
    stores: Stores,
) -> ResourceSet<ClusterSpecification> {
    ResourceSet::new()
        .with(KubeconfigKind::new(stores.secrets, policy.owner.clone(), access))
        .with(AppKind::new(
            stores.apps,
            policy.owner.clone(),
            policy.app_catalog.clone(),
        ))
        .with(NamespaceKind::new(
            stores.namespaces,
            policy.owner.clone(),
            &policy.system_namespace,
        ))
        .with(ChartKind::new(stores.releases, policy))
        .with(ConfigMapKind::new(stores.configmaps, policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::fixtures::access;
    use crate::spec::fixtures::aws_cluster;
    use tenant_common::ApiErrorKind;
    use tenant_reconcile::testing::{MemoryStore, Op};
    use tenant_reconcile::PassOutcome;

    struct Memory {
        secrets: Arc<MemoryStore<SecretData>>,
        apps: Arc<MemoryStore<AppSpec>>,
        namespaces: Arc<MemoryStore<NamespacePayload>>,
        releases: Arc<MemoryStore<ReleaseValues>>,
        configmaps: Arc<MemoryStore<ConfigMapData>>,
    }

    impl Memory {
        fn new() -> Self {
            Self {
                secrets: Arc::new(MemoryStore::new()),
                apps: Arc::new(MemoryStore::new()),
                namespaces: Arc::new(MemoryStore::new()),
                releases: Arc::new(MemoryStore::new()),
                configmaps: Arc::new(MemoryStore::new()),
            }
        }

        fn stores(&self) -> Stores {
            Stores {
                secrets: self.secrets.clone(),
                apps: self.apps.clone(),
                namespaces: self.namespaces.clone(),
                releases: self.releases.clone(),
                configmaps: self.configmaps.clone(),
            }
        }
    }

    #[test]
    fn test_kinds_run_in_dependency_order() {
        let memory = Memory::new();
        let set = resource_set(&ProviderPolicy::default(), access(), memory.stores());
        assert_eq!(
            set.names(),
            vec!["kubeconfig", "app", "namespace", "chart", "configmap"]
        );
    }

    #[tokio::test]
    async fn story_fresh_cluster_gets_everything_created() {
        let memory = Memory::new();
        let set = resource_set(&ProviderPolicy::default(), access(), memory.stores());

        let report = set.run(&aws_cluster()).await.unwrap();

        assert!(!report.reconciliation_canceled());
        assert_eq!(memory.secrets.objects().len(), 1);
        assert_eq!(memory.apps.objects().len(), 2);
        assert_eq!(memory.namespaces.objects().len(), 1);
        assert_eq!(memory.releases.objects().len(), 1);
        assert_eq!(memory.configmaps.objects().len(), 6);
        assert_eq!(report.totals().created, 11);
    }

    #[tokio::test]
    async fn story_unreachable_tenant_stops_before_tenant_writes() {
        let memory = Memory::new();
        memory.namespaces.fail_always(Op::Get, ApiErrorKind::Unavailable);
        let set = resource_set(&ProviderPolicy::default(), access(), memory.stores());

        let report = set.run(&aws_cluster()).await.unwrap();

        assert!(report.reconciliation_canceled());
        assert_eq!(report.outcome_of("namespace"), Some(PassOutcome::ReconciliationCanceled));
        assert_eq!(report.outcome_of("chart"), None);
        assert!(memory.releases.calls().is_empty());
        assert!(memory.configmaps.calls().is_empty());
    }

    #[tokio::test]
    async fn story_deleted_cluster_tears_down_values_only() {
        let memory = Memory::new();
        let policy = ProviderPolicy::default();
        resource_set(&policy, access(), memory.stores())
            .run(&aws_cluster())
            .await
            .unwrap();

        let mut spec = aws_cluster();
        spec.deleted = true;
        let report = resource_set(&policy, access(), memory.stores())
            .run(&spec)
            .await
            .unwrap();

        for redirected in ["kubeconfig", "app", "namespace", "chart"] {
            assert_eq!(report.outcome_of(redirected), Some(PassOutcome::ResourceCanceled));
        }
        assert!(memory.configmaps.objects().is_empty());
        assert_eq!(memory.releases.objects().len(), 1);
    }
}
