//! Release records read from Helm's storage Secrets
//!
//! Helm keeps one Secret per release revision, labeled with the release
//! name, revision and status plus any labels given at install time.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tenant_common::{Error, Result};
use tracing::debug;

use super::{ReleaseRecord, ReleaseRecords};

const OWNER_SELECTOR: &str = "owner=helm";
const SYSTEM_LABELS: [&str; 6] = ["name", "owner", "status", "version", "createdAt", "modifiedAt"];

/// [`ReleaseRecords`] over a tenant cluster kube client
pub struct KubeReleaseRecords {
    client: Client,
}

impl KubeReleaseRecords {
    /// Records read through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReleaseRecords for KubeReleaseRecords {
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<ReleaseRecord>> {
        let selector = if selector.is_empty() {
            OWNER_SELECTOR.to_string()
        } else {
            format!("{},{}", OWNER_SELECTOR, selector)
        };
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let list = secrets
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| Error::from(e).with_context(format!("list releases in {:?}", namespace)))?;

        let records = latest_records(namespace, &list.items);
        debug!(namespace = %namespace, revisions = list.items.len(), releases = records.len(), "Read release records");
        Ok(records)
    }
}

/// Latest revision of every release, ordered by name
fn latest_records(namespace: &str, secrets: &[Secret]) -> Vec<ReleaseRecord> {
    let mut latest: BTreeMap<String, ReleaseRecord> = BTreeMap::new();

    for secret in secrets {
        let labels = secret.labels();
        let Some(name) = labels.get("name") else {
            continue;
        };
        let Some(revision) = labels.get("version").and_then(|v| v.parse::<u32>().ok()) else {
            continue;
        };
        if latest.get(name).is_some_and(|r| r.revision >= revision) {
            continue;
        }

        let user_labels = labels
            .iter()
            .filter(|(k, _)| !SYSTEM_LABELS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        latest.insert(
            name.clone(),
            ReleaseRecord {
                name: name.clone(),
                namespace: namespace.to_string(),
                revision,
                status: labels.get("status").cloned().unwrap_or_default(),
                labels: user_labels,
            },
        );
    }

    latest.into_values().collect()
}
