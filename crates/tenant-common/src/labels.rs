//! Ownership labels for managed objects
//!
//! Every object this operator creates carries the managed-by marker from an
//! injected [`OwnerConfig`]. Listing queries are scoped with the same labels,
//! so objects owned by anyone else are never read, diffed or deleted.

use std::collections::BTreeMap;

/// Label key naming the application a managed object belongs to
pub const APP_LABEL: &str = "app";

/// Label key naming the tenant cluster an object belongs to
pub const CLUSTER_LABEL: &str = "tenant.dev/cluster";

/// Label key identifying the controller that owns an object
pub const MANAGED_BY_LABEL: &str = "tenant.dev/managed-by";

/// Label key naming the organization that owns the tenant cluster
pub const ORGANIZATION_LABEL: &str = "tenant.dev/organization";

/// Label key for the service type of an object
pub const SERVICE_TYPE_LABEL: &str = "tenant.dev/service-type";

/// Service type value for objects managed on behalf of the provider
pub const SERVICE_TYPE_MANAGED: &str = "managed";

/// Default managed-by value
pub const DEFAULT_MANAGED_BY: &str = "tenant-operator";

/// Owner identity injected into every resource kind
///
/// Multiple operator instances in one process each get their own value, so
/// nothing about ownership is process-global.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OwnerConfig {
    /// Value of the managed-by label
    pub managed_by: String,
    /// Value of the service-type label, if the kind scopes by it
    pub service_type: Option<String>,
    /// Value of the cluster label, for kinds whose objects of several
    /// tenant clusters share a namespace
    pub cluster: Option<String>,
}

impl Default for OwnerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MANAGED_BY)
    }
}

impl OwnerConfig {
    /// Owner scoped only by the managed-by label
    pub fn new(managed_by: impl Into<String>) -> Self {
        Self {
            managed_by: managed_by.into(),
            service_type: None,
            cluster: None,
        }
    }

    /// Additionally scope by service type
    pub fn with_service_type(mut self, service_type: impl Into<String>) -> Self {
        self.service_type = Some(service_type.into());
        self
    }

    /// Additionally scope by tenant cluster
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Labels every owned object must carry
    pub fn owner_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_BY_LABEL.to_string(), self.managed_by.clone());
        if let Some(service_type) = &self.service_type {
            labels.insert(SERVICE_TYPE_LABEL.to_string(), service_type.clone());
        }
        if let Some(cluster) = &self.cluster {
            labels.insert(CLUSTER_LABEL.to_string(), cluster.clone());
        }
        labels
    }

    /// Label selector for listing queries (e.g. `tenant.dev/managed-by=tenant-operator`)
    pub fn selector(&self) -> String {
        self.owner_labels()
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether an object with these labels is owned by this controller
    pub fn owns(&self, labels: &BTreeMap<String, String>) -> bool {
        self.owner_labels()
            .iter()
            .all(|(k, v)| labels.get(k) == Some(v))
    }
}
