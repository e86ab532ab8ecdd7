//! Custom Resource Definitions for the tenant operator

mod app;
mod cluster;
mod types;

pub use app::{App, AppKubeConfig, AppRelease, AppSpec, AppStatus, SecretReference};
pub use cluster::{TenantCluster, TenantClusterSpec, TenantClusterStatus, MAX_CLUSTER_ID_LEN};
pub use types::{ChangeCounts, FeatureFlags, NetworkSpec, ProviderKind, ReconcileOutcome, WorkersSpec};
