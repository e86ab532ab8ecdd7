//! Chart values documents
//!
//! Each managed chart reads its values from a `values.json` key. Values are
//! typed so every field is always written and serialization is stable:
//! struct fields serialize in declaration order.

use serde::Serialize;
use tenant_common::{Error, Result};

/// Registry images are pulled from
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Image {
    /// Registry domain
    pub registry: String,
}

/// Values for charts that only need the image registry
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BasicValues {
    /// Image settings
    pub image: Image,
}

/// Values for exporters that run in a fixed namespace
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ExporterValues {
    /// Namespace the exporter runs in
    pub namespace: String,
}

/// Values for the ingress controller chart
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngressControllerValues {
    /// Controller deployment
    pub controller: IngressController,
    /// Settings shared with the migration job
    pub global: IngressGlobal,
    /// Image settings
    pub image: Image,
}

#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngressController {
    pub replicas: u32,
    pub service: Enabled,
}

#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IngressGlobal {
    pub controller: IngressGlobalController,
    pub migration: Enabled,
}

#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressGlobalController {
    pub temp_replicas: u32,
    pub use_proxy_protocol: bool,
}

/// A single `enabled` switch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Enabled {
    /// Whether the feature is on
    pub enabled: bool,
}

/// Values for the cluster DNS chart
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CoreDnsValues {
    /// Cluster network settings
    pub cluster: CoreDnsCluster,
    /// Image settings
    pub image: Image,
}

#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CoreDnsCluster {
    pub kubernetes: CoreDnsKubernetes,
}

#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoreDnsKubernetes {
    pub cluster_ip_range: String,
    pub dns_ip: String,
    pub pod_cidr: Option<String>,
}

/// Values of the chart operator release
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChartOperatorValues {
    /// Cluster DNS service IP
    #[serde(rename = "clusterDNSIP")]
    pub cluster_dns_ip: String,
    /// Image settings
    pub image: Image,
    /// Namespace of the release manager
    pub tiller: TillerValues,
}

#[allow(missing_docs)]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TillerValues {
    pub namespace: String,
}

/// Serialize values to the `values.json` document
pub fn to_values_json<T: Serialize>(chart: &str, values: &T) -> Result<String> {
    serde_json::to_string(values)
        .map_err(|e| Error::serialization_for_kind(format!("{} values", chart), e.to_string()))
}
