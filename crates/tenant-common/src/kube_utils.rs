//! Kubernetes client helpers using kube-rs
//!
//! Clients for the management cluster come from the ambient kubeconfig or an
//! explicit path. Clients for tenant clusters are built from a rendered
//! kubeconfig document, always with bounded connect/read timeouts so that a
//! tenant API server that is still booting surfaces as a timeout instead of
//! hanging a pass.

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::info;

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect/read timeouts applied to every client we build
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// TCP + TLS connect timeout
    pub connect: Duration,
    /// Per-request read timeout
    pub read: Duration,
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self {
            connect: DEFAULT_CONNECT_TIMEOUT,
            read: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl ClientTimeouts {
    fn apply(&self, config: &mut Config) {
        config.connect_timeout = Some(self.connect);
        config.read_timeout = Some(self.read);
    }
}

/// Create a management cluster client from an optional kubeconfig path
pub async fn create_client(
    kubeconfig: Option<&Path>,
    timeouts: ClientTimeouts,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            config_from_kubeconfig(kubeconfig).await?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    timeouts.apply(&mut config);
    build_client(config)
}

/// Create a client from an in-memory kubeconfig document
///
/// Used for tenant clusters, whose kubeconfig is rendered from issued access
/// material rather than read from disk.
pub async fn client_from_kubeconfig_yaml(
    yaml: &str,
    timeouts: ClientTimeouts,
) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::from_yaml(yaml).map_err(|e| {
        Error::internal_with_context("tenant_client", format!("invalid kubeconfig: {}", e))
    })?;
    let mut config = config_from_kubeconfig(kubeconfig).await?;
    timeouts.apply(&mut config);
    build_client(config)
}

async fn config_from_kubeconfig(kubeconfig: Kubeconfig) -> Result<Config, Error> {
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to load kubeconfig: {}", e))
        })
}

fn build_client(config: Config) -> Result<Client, Error> {
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Install or update a CRD with server-side apply
pub async fn apply_crd(
    client: &Client,
    crd: &CustomResourceDefinition,
    field_manager: &str,
) -> Result<(), Error> {
    let name = crd.metadata.name.clone().unwrap_or_default();
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        &name,
        &PatchParams::apply(field_manager).force(),
        &Patch::Apply(crd),
    )
    .await
    .map_err(|e| Error::from(e).with_context(format!("apply crd {}", name)))?;
    info!(crd = %name, "CRD applied");
    Ok(())
}

/// Patch the status sub-resource of a namespaced resource with a merge patch
///
/// Returns `kube::Error` so callers can map to their own error type.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
) -> std::result::Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Raw bytes of one key of a Secret, if present
pub fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|v| v.0.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;

    #[test]
    fn test_secret_value_reads_present_key() {
        let mut data = BTreeMap::new();
        data.insert("ca".to_string(), ByteString(b"pem".to_vec()));
        let secret = Secret {
            data: Some(data),
            ..Default::default()
        };
        assert_eq!(secret_value(&secret, "ca"), Some(b"pem".to_vec()));
        assert_eq!(secret_value(&secret, "crt"), None);
        assert_eq!(secret_value(&Secret::default(), "ca"), None);
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = ClientTimeouts::default();
        assert_eq!(timeouts.connect, Duration::from_secs(5));
        assert_eq!(timeouts.read, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_invalid_kubeconfig_is_rejected() {
        let err = client_from_kubeconfig_yaml(": not yaml :", ClientTimeouts::default())
            .await
            .err().unwrap();
        assert_eq!(err.context(), Some("tenant_client"));
    }

    #[tokio::test]
    async fn test_kubeconfig_yaml_builds_client_with_timeouts() {
        let yaml = r#"
apiVersion: v1
kind: Config
clusters:
- name: tenant
  cluster:
    server: https://api.example.invalid:443
    insecure-skip-tls-verify: true
contexts:
- name: tenant
  context:
    cluster: tenant
    user: tenant
current-context: tenant
users:
- name: tenant
  user:
    token: abc
"#;
        let client = client_from_kubeconfig_yaml(yaml, ClientTimeouts::default()).await;
        assert!(client.is_ok());
    }
}
