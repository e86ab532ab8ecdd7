//! Chart releases in a tenant cluster
//!
//! A release is managed through three collaborators:
//!
//! - [`ReleaseRecords`] reads release records through the typed kube client.
//!   It decides existence and ownership, and because it runs before every
//!   Helm call it also classifies an unreachable tenant API.
//! - [`ReleaseClient`] reads values and installs, upgrades or uninstalls.
//! - [`ChartTransport`] stages a chart archive locally for install/upgrade.
//!
//! [`HelmReleaseStore`] combines them into an object store.

mod helm;
mod records;
mod store;

pub use helm::{HelmCli, HelmPull, DEFAULT_HELM_TIMEOUT};
pub use records::KubeReleaseRecords;
pub use store::HelmReleaseStore;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tempfile::TempDir;
use tenant_common::Result;
use tracing::{debug, warn};

/// User-supplied values of a release
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReleaseValues(pub serde_json::Value);

/// Latest record of a release
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseRecord {
    /// Release name
    pub name: String,
    /// Release namespace
    pub namespace: String,
    /// Revision of the latest record
    pub revision: u32,
    /// Release status (e.g. "deployed")
    pub status: String,
    /// Labels set at install or upgrade, without the release system labels
    pub labels: BTreeMap<String, String>,
}

/// Reads release records from the tenant cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseRecords: Send + Sync {
    /// Latest record of every release in `namespace` matching `selector`
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<ReleaseRecord>>;
}

/// Install, upgrade or uninstall parameters
#[derive(Clone, Debug, PartialEq)]
pub struct ReleaseRequest {
    /// Release name
    pub name: String,
    /// Release namespace
    pub namespace: String,
    /// Local chart archive
    pub chart: PathBuf,
    /// Values to install with
    pub values: serde_json::Value,
    /// Labels stored with the release
    pub labels: BTreeMap<String, String>,
}

/// Release operations in a tenant cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ReleaseClient: Send + Sync {
    /// User-supplied values of an installed release
    async fn values(&self, namespace: &str, name: &str) -> Result<serde_json::Value>;

    /// Install a new release
    async fn install(&self, request: &ReleaseRequest) -> Result<()>;

    /// Upgrade an existing release
    async fn upgrade(&self, request: &ReleaseRequest) -> Result<()>;

    /// Uninstall a release
    async fn uninstall(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Chart to fetch
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartRef {
    /// Repository URL
    pub repository: String,
    /// Chart name
    pub chart: String,
    /// Version, latest when unset
    pub version: Option<String>,
}

/// Stages chart archives on local disk
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChartTransport: Send + Sync {
    /// Fetch a chart into a fresh local directory
    async fn stage(&self, chart: &ChartRef) -> Result<StagedChart>;
}

/// A chart archive on local disk
///
/// The backing directory is removed by [`StagedChart::release`] or on drop.
#[derive(Debug)]
pub struct StagedChart {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl StagedChart {
    /// Archive at `path` inside `dir`, which is owned from now on
    pub fn new(path: PathBuf, dir: TempDir) -> Self {
        Self {
            path,
            dir: Some(dir),
        }
    }

    /// Archive not backed by a temporary directory
    pub fn at(path: PathBuf) -> Self {
        Self { path, dir: None }
    }

    /// Local archive path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the local artifact; failures are logged, never returned
    pub fn release(mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let location = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!(path = %location.display(), "Released staged chart"),
            Err(e) => warn!(path = %location.display(), error = %e, "Failed to remove staged chart"),
        }
    }
}
