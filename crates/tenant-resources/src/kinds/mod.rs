//! Resource kinds reconciled for every tenant cluster

mod app;
mod chart;
mod configmap;
mod kubeconfig;
mod namespace;
pub mod values;

pub use app::AppKind;
pub use chart::ChartKind;
pub use configmap::{ConfigMapKind, VALUES_KEY};
pub use kubeconfig::{KubeconfigKind, KUBECONFIG_KEY};
pub use namespace::NamespaceKind;

use std::collections::BTreeMap;

use tenant_common::labels::{CLUSTER_LABEL, ORGANIZATION_LABEL};
use tenant_common::OwnerConfig;

use crate::spec::ClusterSpecification;

/// Owner labels plus the cluster and organization labels
fn cluster_labels(owner: &OwnerConfig, spec: &ClusterSpecification) -> BTreeMap<String, String> {
    let mut labels = owner.owner_labels();
    labels.insert(CLUSTER_LABEL.to_string(), spec.cluster_id.clone());
    labels.insert(ORGANIZATION_LABEL.to_string(), spec.organization.clone());
    labels
}
