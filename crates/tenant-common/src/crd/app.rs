//! App Custom Resource Definition
//!
//! An App is a packaged application release, installed into a tenant cluster
//! by an app operator running on the management cluster. This operator only
//! writes the spec; the release status is filled in by the app operator.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Specification for an App
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "application.tenant.dev",
    version = "v1alpha1",
    kind = "App",
    plural = "apps",
    status = "AppStatus",
    namespaced,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Release","type":"string","jsonPath":".status.release.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {
    /// Chart name in the catalog
    pub name: String,

    /// Target namespace in the tenant cluster
    pub namespace: String,

    /// Catalog the chart is pulled from
    pub catalog: String,

    /// Chart version
    pub version: String,

    /// How the app operator reaches the tenant cluster
    pub kube_config: AppKubeConfig,
}

/// Kubeconfig reference for an App
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppKubeConfig {
    /// Install into the cluster the app operator runs in
    #[serde(default)]
    pub in_cluster: bool,

    /// Secret holding the tenant kubeconfig
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretReference>,
}

/// Reference to a Secret by name and namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
}

/// Status for an App, written by the app operator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    /// Installed chart version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Release state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<AppRelease>,
}

/// Release state of an App
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppRelease {
    /// Release status (e.g. "DEPLOYED", "FAILED")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_app_status_reads_back_release() {
        let json = r#"{"version":"1.2.0","release":{"status":"DEPLOYED"}}"#;
        let status: AppStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.version.as_deref(), Some("1.2.0"));
        assert_eq!(
            status.release.and_then(|r| r.status).as_deref(),
            Some("DEPLOYED")
        );
    }

    #[test]
    fn test_app_crd_group() {
        let crd = App::crd();
        assert_eq!(crd.spec.group, "application.tenant.dev");
        assert_eq!(crd.spec.names.kind, "App");
    }
}
