//! Tenant cluster access material
//!
//! Client credentials for a tenant cluster are issued elsewhere and stored in
//! a Secret on the management cluster. This module reads them back, renders
//! a kubeconfig from them and builds tenant clients with bounded timeouts.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use tenant_common::kube_utils::{client_from_kubeconfig_yaml, secret_value, ClientTimeouts};
use tenant_common::{Error, Result};
use tracing::debug;

use crate::spec::ClusterSpecification;

/// Secret key holding the CA certificate
pub const CA_KEY: &str = "ca";
/// Secret key holding the client certificate
pub const CERT_KEY: &str = "crt";
/// Secret key holding the client key
pub const KEY_KEY: &str = "key";

/// Issued access material for one tenant cluster
#[derive(Clone, PartialEq, Eq)]
pub struct TenantAccess {
    /// API endpoint URL
    pub endpoint: String,
    /// PEM encoded CA certificate
    pub ca: Vec<u8>,
    /// PEM encoded client certificate
    pub cert: Vec<u8>,
    /// PEM encoded client key
    pub key: Vec<u8>,
}

impl std::fmt::Debug for TenantAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantAccess")
            .field("endpoint", &self.endpoint)
            .field("key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct KubeconfigDoc<'a> {
    api_version: &'a str,
    kind: &'a str,
    clusters: [Named<'a, ClusterEntry>; 1],
    users: [Named<'a, UserEntry>; 1],
    contexts: [Named<'a, ContextEntry<'a>>; 1],
    current_context: &'a str,
}

#[derive(Serialize)]
struct Named<'a, T> {
    name: &'a str,
    #[serde(flatten)]
    entry: T,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterEntry {
    cluster: ClusterData,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct ClusterData {
    server: String,
    certificate_authority_data: String,
}

#[derive(Serialize)]
struct UserEntry {
    user: UserData,
}

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct UserData {
    client_certificate_data: String,
    client_key_data: String,
}

#[derive(Serialize)]
struct ContextEntry<'a> {
    context: ContextData<'a>,
}

#[derive(Serialize)]
struct ContextData<'a> {
    cluster: &'a str,
    user: &'a str,
}

impl TenantAccess {
    /// Render a kubeconfig document for this access material
    ///
    /// Output is deterministic so the stored Secret only changes when the
    /// material does.
    pub fn render_kubeconfig(&self, cluster_id: &str) -> Result<String> {
        let cluster_name = format!("tenant-{}", cluster_id);
        let user_name = format!("tenant-{}-user", cluster_id);
        let context_name = format!("tenant-{}-context", cluster_id);

        let doc = KubeconfigDoc {
            api_version: "v1",
            kind: "Config",
            clusters: [Named {
                name: &cluster_name,
                entry: ClusterEntry {
                    cluster: ClusterData {
                        server: self.endpoint.clone(),
                        certificate_authority_data: STANDARD.encode(&self.ca),
                    },
                },
            }],
            users: [Named {
                name: &user_name,
                entry: UserEntry {
                    user: UserData {
                        client_certificate_data: STANDARD.encode(&self.cert),
                        client_key_data: STANDARD.encode(&self.key),
                    },
                },
            }],
            contexts: [Named {
                name: &context_name,
                entry: ContextEntry {
                    context: ContextData {
                        cluster: &cluster_name,
                        user: &user_name,
                    },
                },
            }],
            current_context: &context_name,
        };

        serde_yaml::to_string(&doc)
            .map_err(|e| Error::serialization_for_kind("kubeconfig", e.to_string()))
    }
}

/// Build a client for a tenant cluster
pub async fn tenant_client(
    access: &TenantAccess,
    cluster_id: &str,
    timeouts: ClientTimeouts,
) -> Result<Client> {
    let yaml = access.render_kubeconfig(cluster_id)?;
    client_from_kubeconfig_yaml(&yaml, timeouts).await
}

/// Source of issued tenant access material
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Access material for a cluster, `None` while not yet issued
    async fn tenant_access(&self, spec: &ClusterSpecification) -> Result<Option<TenantAccess>>;
}

/// Reads access material from the `<cluster-id>-api` Secret
pub struct SecretCredentialSource {
    client: Client,
}

impl SecretCredentialSource {
    /// Source reading through a management cluster client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialSource for SecretCredentialSource {
    async fn tenant_access(&self, spec: &ClusterSpecification) -> Result<Option<TenantAccess>> {
        let name = spec.credential_secret_name();
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &spec.management_namespace);
        let secret = secrets
            .get_opt(&name)
            .await
            .map_err(|e| Error::from(e).with_context(format!("get secret {}", name)))?;

        let Some(secret) = secret else {
            debug!(cluster = %spec.cluster_id, secret = %name, "Access secret not issued yet");
            return Ok(None);
        };

        Ok(access_from_secret(&secret, spec.api_url()))
    }
}

fn access_from_secret(secret: &Secret, endpoint: String) -> Option<TenantAccess> {
    let ca = secret_value(secret, CA_KEY)?;
    let cert = secret_value(secret, CERT_KEY)?;
    let key = secret_value(secret, KEY_KEY)?;
    if ca.is_empty() || cert.is_empty() || key.is_empty() {
        return None;
    }
    Some(TenantAccess {
        endpoint,
        ca,
        cert,
        key,
    })
}
