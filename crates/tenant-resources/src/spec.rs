//! Specification view over a TenantCluster resource
//!
//! Resource kinds never see the custom resource itself. They read this
//! validated, owned snapshot, which is what makes desired-state computation
//! a pure function of its inputs.

use kube::ResourceExt;
use tenant_common::crd::{FeatureFlags, NetworkSpec, ProviderKind, TenantCluster};
use tenant_common::{Error, Result};
use tenant_reconcile::Specification;

/// Validated snapshot of a tenant cluster specification
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterSpecification {
    /// Cluster identifier
    pub cluster_id: String,
    /// Owning organization
    pub organization: String,
    /// Infrastructure provider
    pub provider: ProviderKind,
    /// Tenant API host
    pub api_host: String,
    /// Number of worker nodes
    pub workers: u32,
    /// Network ranges
    pub network: NetworkSpec,
    /// Optional features
    pub features: FeatureFlags,
    /// Extra tenant namespaces scanned for chart values
    pub namespaces: Vec<String>,
    /// Namespace of the TenantCluster on the management cluster
    pub management_namespace: String,
    /// Deletion timestamp present
    pub deleted: bool,
}

impl ClusterSpecification {
    /// Build and validate from the custom resource
    pub fn from_resource(cluster: &TenantCluster) -> Result<Self> {
        cluster.spec.validate()?;
        let spec = &cluster.spec;

        let management_namespace = cluster.namespace().ok_or_else(|| {
            Error::validation_for_field(
                &spec.cluster_id,
                "metadata.namespace",
                "TenantCluster must be namespaced",
            )
        })?;

        Ok(Self {
            cluster_id: spec.cluster_id.clone(),
            organization: spec.organization.clone(),
            provider: spec.provider,
            api_host: spec.api_host(),
            workers: spec.workers.count,
            network: spec.network.clone(),
            features: spec.features.clone(),
            namespaces: spec.namespaces.clone(),
            management_namespace,
            deleted: cluster.metadata.deletion_timestamp.is_some(),
        })
    }

    /// Tenant API URL
    pub fn api_url(&self) -> String {
        format!("https://{}", self.api_host)
    }

    /// Name of the kubeconfig Secret on the management cluster
    pub fn kubeconfig_secret_name(&self) -> String {
        format!("{}-kubeconfig", self.cluster_id)
    }

    /// Name of the Secret holding issued tenant credentials
    pub fn credential_secret_name(&self) -> String {
        format!("{}-api", self.cluster_id)
    }
}

impl Specification for ClusterSpecification {
    fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Live AWS cluster with three workers
    pub fn aws_cluster() -> ClusterSpecification {
        ClusterSpecification {
            cluster_id: "5xchu".to_string(),
            organization: "acme".to_string(),
            provider: ProviderKind::Aws,
            api_host: "api.5xchu.example.com".to_string(),
            workers: 3,
            network: NetworkSpec::default(),
            features: FeatureFlags::default(),
            namespaces: vec![],
            management_namespace: "5xchu".to_string(),
            deleted: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use tenant_common::crd::{TenantClusterSpec, WorkersSpec};

    fn resource(namespace: Option<&str>) -> TenantCluster {
        let mut cluster = TenantCluster::new(
            "5xchu",
            TenantClusterSpec {
                cluster_id: "5xchu".to_string(),
                organization: "acme".to_string(),
                provider: ProviderKind::Kvm,
                base_domain: "k8s.example.com".to_string(),
                workers: WorkersSpec { count: 4 },
                network: NetworkSpec::default(),
                features: FeatureFlags::default(),
                namespaces: vec!["monitoring".to_string()],
                release_version: None,
            },
        );
        cluster.metadata.namespace = namespace.map(String::from);
        cluster
    }

    #[test]
    fn test_from_resource_copies_fields() {
        let spec = ClusterSpecification::from_resource(&resource(Some("5xchu"))).unwrap();
        assert_eq!(spec.api_host, "api.5xchu.k8s.example.com");
        assert_eq!(spec.api_url(), "https://api.5xchu.k8s.example.com");
        assert_eq!(spec.workers, 4);
        assert_eq!(spec.management_namespace, "5xchu");
        assert_eq!(spec.namespaces, vec!["monitoring"]);
        assert!(!spec.is_deleted());
        assert_eq!(spec.kubeconfig_secret_name(), "5xchu-kubeconfig");
        assert_eq!(spec.credential_secret_name(), "5xchu-api");
    }

    #[test]
    fn test_deletion_timestamp_marks_deleted() {
        let mut cluster = resource(Some("5xchu"));
        cluster.metadata.deletion_timestamp = Some(Time(Default::default()));
        assert!(ClusterSpecification::from_resource(&cluster).unwrap().is_deleted());
    }

    #[test]
    fn test_missing_namespace_is_invalid() {
        let err = ClusterSpecification::from_resource(&resource(None)).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_invalid_spec_is_rejected() {
        let mut cluster = resource(Some("5xchu"));
        cluster.spec.organization.clear();
        assert!(ClusterSpecification::from_resource(&cluster).is_err());
    }
}
