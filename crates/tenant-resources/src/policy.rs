//! Provider policy and capabilities
//!
//! Everything that differs between installations (registry, owner labels,
//! chart source, app catalog) lives in [`ProviderPolicy`]. Everything that
//! differs between providers lives in [`Capabilities`]. Resource kinds are
//! parameterized by both instead of being duplicated per provider.

use std::net::Ipv4Addr;

use tenant_common::crd::ProviderKind;
use tenant_common::labels::SERVICE_TYPE_MANAGED;
use tenant_common::{Error, OwnerConfig, Result, KUBE_SYSTEM_NAMESPACE, TENANT_SYSTEM_NAMESPACE};

/// Default container registry domain
pub const DEFAULT_REGISTRY_DOMAIN: &str = "quay.io";
/// Default chart repository
pub const DEFAULT_CHART_REPOSITORY: &str = "https://charts.tenant.dev/stable";
/// Chart installing the chart operator
pub const CHART_OPERATOR_CHART: &str = "chart-operator-chart";
/// Release name of the chart operator
pub const CHART_OPERATOR_RELEASE: &str = "chart-operator";
/// Offset of the cluster DNS service inside the cluster IP range
pub const CLUSTER_DNS_OFFSET: u32 = 10;

/// Chart release installed directly by the operator
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartSettings {
    /// Repository the chart is pulled from
    pub repository: String,
    /// Chart name
    pub chart: String,
    /// Chart version to pull, latest when unset
    pub version: Option<String>,
    /// Release name in the tenant cluster
    pub release: String,
    /// Namespace the release is installed into
    pub namespace: String,
}

impl Default for ChartSettings {
    fn default() -> Self {
        Self {
            repository: DEFAULT_CHART_REPOSITORY.to_string(),
            chart: CHART_OPERATOR_CHART.to_string(),
            version: None,
            release: CHART_OPERATOR_RELEASE.to_string(),
            namespace: KUBE_SYSTEM_NAMESPACE.to_string(),
        }
    }
}

/// One packaged application installed into every tenant cluster
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppCatalogEntry {
    /// Chart name, also used as the App resource name suffix
    pub name: String,
    /// Target namespace in the tenant cluster
    pub namespace: String,
    /// Catalog name
    pub catalog: String,
    /// Chart version
    pub version: String,
}

impl AppCatalogEntry {
    /// Entry from its four fields
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        catalog: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            catalog: catalog.into(),
            version: version.into(),
        }
    }
}

/// Default app catalog
pub fn default_app_catalog() -> Vec<AppCatalogEntry> {
    vec![
        AppCatalogEntry::new("kubernetes-node-exporter", KUBE_SYSTEM_NAMESPACE, "default", "0.4.0"),
        AppCatalogEntry::new("kube-state-metrics", KUBE_SYSTEM_NAMESPACE, "default", "0.5.1"),
    ]
}

/// Installation-wide policy shared by all resource kinds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderPolicy {
    /// Registry domain images are pulled from
    pub registry_domain: String,
    /// Owner identity written to and selected from every object
    pub owner: OwnerConfig,
    /// Chart operator release
    pub chart: ChartSettings,
    /// Apps created per tenant cluster
    pub app_catalog: Vec<AppCatalogEntry>,
    /// Namespace created in every tenant cluster
    pub system_namespace: String,
}

impl Default for ProviderPolicy {
    fn default() -> Self {
        Self {
            registry_domain: DEFAULT_REGISTRY_DOMAIN.to_string(),
            owner: OwnerConfig::default(),
            chart: ChartSettings::default(),
            app_catalog: default_app_catalog(),
            system_namespace: TENANT_SYSTEM_NAMESPACE.to_string(),
        }
    }
}

impl ProviderPolicy {
    /// Owner scoped to managed services, used by the chart values kind
    pub fn managed_service_owner(&self) -> OwnerConfig {
        self.owner.clone().with_service_type(SERVICE_TYPE_MANAGED)
    }
}

/// Behaviour switches that depend on the provider
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Ingress controller is being migrated into the tenant cluster, so its
    /// service is left disabled until the migration completes
    pub ingress_migration: bool,
    /// Load balancers in front of the ingress speak the proxy protocol
    pub proxy_protocol: bool,
}

impl Capabilities {
    /// Capabilities of a provider
    pub fn for_provider(provider: ProviderKind) -> Self {
        match provider {
            ProviderKind::Aws => Self {
                ingress_migration: false,
                proxy_protocol: true,
            },
            ProviderKind::Azure | ProviderKind::Kvm => Self {
                ingress_migration: true,
                proxy_protocol: false,
            },
        }
    }
}

/// Temporary ingress controller replicas during migration
///
/// Half the workers rounded up. Zero workers is invalid.
pub fn temp_replicas(workers: u32) -> Result<u32> {
    if workers == 0 {
        return Err(Error::validation_for_field(
            tenant_common::error::UNKNOWN_CONTEXT,
            "spec.workers.count",
            "worker count must be greater than zero",
        ));
    }
    Ok(workers.div_ceil(2))
}

/// Cluster DNS service IP: network address of the cluster IP range plus ten
pub fn cluster_dns_ip(cluster_ip_range: &str) -> Result<Ipv4Addr> {
    let invalid = |msg: &str| {
        Error::validation_for_field(
            tenant_common::error::UNKNOWN_CONTEXT,
            "spec.network.clusterIpRange",
            format!("invalid cluster IP range {:?}: {}", cluster_ip_range, msg),
        )
    };

    let (addr, prefix) = cluster_ip_range
        .split_once('/')
        .ok_or_else(|| invalid("missing prefix length"))?;
    let addr: Ipv4Addr = addr.parse().map_err(|_| invalid("bad address"))?;
    let prefix: u32 = prefix.parse().map_err(|_| invalid("bad prefix length"))?;
    if prefix > 30 {
        return Err(invalid("range too small"));
    }

    let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
    let network = u32::from(addr) & mask;
    Ok(Ipv4Addr::from(network + CLUSTER_DNS_OFFSET))
}
