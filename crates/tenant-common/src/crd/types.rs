//! Supporting types for the TenantCluster CRD

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Infrastructure provider hosting the tenant cluster
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Amazon Web Services
    #[default]
    Aws,
    /// Microsoft Azure
    Azure,
    /// KVM on-premises
    Kvm,
}

impl std::str::FromStr for ProviderKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "aws" => Ok(Self::Aws),
            "azure" => Ok(Self::Azure),
            "kvm" => Ok(Self::Kvm),
            _ => Err(crate::Error::validation(format!(
                "invalid provider: {s}, expected one of: aws, azure, kvm"
            ))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aws => write!(f, "aws"),
            Self::Azure => write!(f, "azure"),
            Self::Kvm => write!(f, "kvm"),
        }
    }
}

/// Worker node topology
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkersSpec {
    /// Number of worker nodes
    pub count: u32,
}

/// Network ranges of the tenant cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Service IP range in CIDR notation (e.g. "172.31.0.0/16")
    pub cluster_ip_range: String,

    /// Pod IP range in CIDR notation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_cidr: Option<String>,
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            cluster_ip_range: "172.31.0.0/16".to_string(),
            pod_cidr: None,
        }
    }
}

/// Optional features of the tenant cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlags {
    /// Run the managed ingress controller
    #[serde(default = "default_true")]
    pub ingress_controller: bool,

    /// Run the managed monitoring exporters (kube-state-metrics, node-exporter)
    #[serde(default = "default_true")]
    pub monitoring: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            ingress_controller: true,
            monitoring: true,
        }
    }
}

/// Result of the last reconciliation recorded in status
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Not reconciled yet
    #[default]
    Pending,
    /// Every resource kind converged
    Reconciled,
    /// The pass was canceled (tenant cluster not reachable yet)
    Canceled,
    /// A hard failure ended the pass
    Failed,
}

impl std::fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Reconciled => write!(f, "Reconciled"),
            Self::Canceled => write!(f, "Canceled"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Number of objects changed by the last reconciliation
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeCounts {
    /// Objects created
    pub created: u32,
    /// Objects replaced
    pub updated: u32,
    /// Objects deleted
    pub deleted: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parses_case_insensitively() {
        assert_eq!("AWS".parse::<ProviderKind>().ok(), Some(ProviderKind::Aws));
        assert_eq!("kvm".parse::<ProviderKind>().ok(), Some(ProviderKind::Kvm));
        assert!("gcp".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_provider_kind_roundtrips_through_display() {
        for kind in [ProviderKind::Aws, ProviderKind::Azure, ProviderKind::Kvm] {
            assert_eq!(kind.to_string().parse::<ProviderKind>().ok(), Some(kind));
        }
    }

    #[test]
    fn test_feature_flags_default_from_empty_object() {
        let flags: FeatureFlags = serde_json::from_str("{}").unwrap();
        assert_eq!(flags, FeatureFlags::default());
        assert!(flags.monitoring);
        assert!(flags.ingress_controller);
    }
}
