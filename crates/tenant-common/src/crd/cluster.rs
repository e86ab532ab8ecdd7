//! TenantCluster Custom Resource Definition
//!
//! A TenantCluster describes one tenant cluster whose provider-managed
//! sub-resources (namespaces, chart values, credentials, app releases) this
//! operator keeps in sync. The resource lives in the cluster's management
//! namespace on the management cluster.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ChangeCounts, FeatureFlags, NetworkSpec, ProviderKind, ReconcileOutcome, WorkersSpec};

/// Maximum length of a cluster id (it is embedded in DNS names)
pub const MAX_CLUSTER_ID_LEN: usize = 20;

/// Specification for a TenantCluster
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "tenant.dev",
    version = "v1alpha1",
    kind = "TenantCluster",
    plural = "tenantclusters",
    shortname = "tc",
    status = "TenantClusterStatus",
    namespaced,
    printcolumn = r#"{"name":"ID","type":"string","jsonPath":".spec.clusterId"}"#,
    printcolumn = r#"{"name":"Provider","type":"string","jsonPath":".spec.provider"}"#,
    printcolumn = r#"{"name":"Outcome","type":"string","jsonPath":".status.lastOutcome"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantClusterSpec {
    /// Short cluster identifier used in object names and DNS (e.g. "5xchu")
    pub cluster_id: String,

    /// Organization owning the cluster
    pub organization: String,

    /// Infrastructure provider
    pub provider: ProviderKind,

    /// Base domain; the tenant API is served at `api.<cluster-id>.<base-domain>`
    pub base_domain: String,

    /// Worker topology
    pub workers: WorkersSpec,

    /// Network ranges
    #[serde(default)]
    pub network: NetworkSpec,

    /// Optional features
    #[serde(default)]
    pub features: FeatureFlags,

    /// Additional tenant namespaces that receive chart values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Release version of the tenant cluster, informational
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_version: Option<String>,
}

impl TenantClusterSpec {
    /// Validate the cluster specification
    ///
    /// Worker count is checked by the resource kinds that depend on it, so a
    /// cluster without workers still gets the kinds that don't.
    pub fn validate(&self) -> Result<(), crate::Error> {
        let id = &self.cluster_id;
        if id.is_empty() {
            return Err(crate::Error::validation_for_field(
                UNNAMED,
                "spec.clusterId",
                "cluster id cannot be empty",
            ));
        }
        if id.len() > MAX_CLUSTER_ID_LEN || !is_dns_label(id) {
            return Err(crate::Error::validation_for_field(
                id,
                "spec.clusterId",
                format!(
                    "cluster id must be a DNS label of at most {} characters",
                    MAX_CLUSTER_ID_LEN
                ),
            ));
        }
        if self.organization.is_empty() {
            return Err(crate::Error::validation_for_field(
                id,
                "spec.organization",
                "organization cannot be empty",
            ));
        }
        if self.base_domain.is_empty() {
            return Err(crate::Error::validation_for_field(
                id,
                "spec.baseDomain",
                "base domain cannot be empty",
            ));
        }
        for ns in &self.namespaces {
            if !is_dns_label(ns) {
                return Err(crate::Error::validation_for_field(
                    id,
                    "spec.namespaces",
                    format!("invalid namespace name: {}", ns),
                ));
            }
        }
        Ok(())
    }

    /// Tenant API endpoint host
    pub fn api_host(&self) -> String {
        format!("api.{}.{}", self.cluster_id, self.base_domain)
    }
}

const UNNAMED: &str = "<unnamed>";

fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

/// Status for a TenantCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantClusterStatus {
    /// The generation of the spec that was last processed by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Outcome of the last reconciliation
    #[serde(default)]
    pub last_outcome: ReconcileOutcome,

    /// Human-readable message about the last reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Objects changed by the last reconciliation
    #[serde(default)]
    pub changes: ChangeCounts,

    /// RFC 3339 timestamp of the last reconciliation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn sample_spec() -> TenantClusterSpec {
        TenantClusterSpec {
            cluster_id: "5xchu".to_string(),
            organization: "acme".to_string(),
            provider: ProviderKind::Aws,
            base_domain: "gauss.eu-central-1.aws.example.com".to_string(),
            workers: WorkersSpec { count: 3 },
            network: NetworkSpec::default(),
            features: FeatureFlags::default(),
            namespaces: vec![],
            release_version: Some("9.0.1".to_string()),
        }
    }

    // =========================================================================
    // Validation Stories
    // =========================================================================

    /// Story: a complete specification passes validation
    #[test]
    fn story_valid_spec_passes_validation() {
        assert!(sample_spec().validate().is_ok());
    }

    /// Story: the cluster id ends up in DNS names, so it must be a DNS label
    #[test]
    fn story_cluster_id_must_be_dns_safe() {
        for bad in ["", "Upper", "-lead", "trail-", "has.dot", "waytoolongclusterid123"] {
            let mut spec = sample_spec();
            spec.cluster_id = bad.to_string();
            let err = spec.validate().unwrap_err();
            match err {
                crate::Error::Validation { field, .. } => {
                    assert_eq!(field.as_deref(), Some("spec.clusterId"), "id {bad:?}");
                }
                other => panic!("Expected Validation error, got {other:?}"),
            }
        }
    }

    /// Story: zero workers is not rejected at the spec level
    #[test]
    fn story_zero_workers_is_left_to_resource_kinds() {
        let mut spec = sample_spec();
        spec.workers.count = 0;
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_extra_namespaces_are_validated() {
        let mut spec = sample_spec();
        spec.namespaces = vec!["monitoring".to_string(), "Bad_Name".to_string()];
        let err = spec.validate().unwrap_err();
        assert_eq!(err.cluster(), Some("5xchu"));
    }

    #[test]
    fn test_api_host() {
        assert_eq!(
            sample_spec().api_host(),
            "api.5xchu.gauss.eu-central-1.aws.example.com"
        );
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let yaml = r#"
clusterId: 5xchu
organization: acme
provider: azure
baseDomain: example.com
workers:
  count: 4
"#;
        let spec: TenantClusterSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.provider, ProviderKind::Azure);
        assert_eq!(spec.network, NetworkSpec::default());
        assert!(spec.features.monitoring);
        assert!(spec.namespaces.is_empty());
    }

    #[test]
    fn test_crd_is_namespaced_with_status() {
        let crd = TenantCluster::crd();
        assert_eq!(crd.spec.group, "tenant.dev");
        assert_eq!(crd.spec.scope, "Namespaced");
        let version = &crd.spec.versions[0];
        assert!(version.subresources.as_ref().and_then(|s| s.status.as_ref()).is_some());
    }
}
