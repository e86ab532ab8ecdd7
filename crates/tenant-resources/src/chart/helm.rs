//! Helm CLI implementations of the release client and chart transport
//!
//! Every invocation is bounded by a timeout. Helm's output is never parsed
//! for error classification: failures here are `Other` or `Timeout`, and the
//! release records read through kube beforehand classify tenant API
//! availability.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::{NamedTempFile, TempDir};
use tenant_common::{ApiErrorKind, Error, Result};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{ChartRef, ChartTransport, ReleaseClient, ReleaseRequest, StagedChart};
use crate::access::TenantAccess;

/// Timeout for a single Helm invocation
pub const DEFAULT_HELM_TIMEOUT: Duration = Duration::from_secs(120);

const HELM: &str = "helm";

async fn run_helm(args: Vec<OsString>, timeout: Duration, description: &str) -> Result<Vec<u8>> {
    debug!(command = %description, "Running helm");
    let mut cmd = Command::new(HELM);
    cmd.args(&args).kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| {
            warn!(command = %description, ?timeout, "Helm timed out");
            Error::store(description, ApiErrorKind::Timeout, format!("timed out after {:?}", timeout))
        })?
        .map_err(|e| Error::store(description, ApiErrorKind::Other, format!("failed to execute helm: {}", e)))?;

    if output.status.success() {
        Ok(output.stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        warn!(command = %description, error = %stderr, "Helm failed");
        Err(Error::store(description, ApiErrorKind::Other, stderr))
    }
}

fn write_temp(contents: &[u8], what: &str) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()
        .map_err(|e| Error::internal_with_context("helm", format!("failed to create {} file: {}", what, e)))?;
    file.write_all(contents)
        .and_then(|()| file.flush())
        .map_err(|e| Error::internal_with_context("helm", format!("failed to write {} file: {}", what, e)))?;
    Ok(file)
}

fn label_arg(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn args<I, S>(parts: I) -> Vec<OsString>
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    parts.into_iter().map(Into::into).collect()
}

/// Release client running the Helm CLI against one tenant cluster
pub struct HelmCli {
    kubeconfig: NamedTempFile,
    timeout: Duration,
}

impl HelmCli {
    /// Client for the tenant cluster reachable with `access`
    pub fn new(access: &TenantAccess, cluster_id: &str, timeout: Duration) -> Result<Self> {
        let yaml = access.render_kubeconfig(cluster_id)?;
        Ok(Self {
            kubeconfig: write_temp(yaml.as_bytes(), "kubeconfig")?,
            timeout,
        })
    }

    fn base_args(&self, namespace: &str) -> Vec<OsString> {
        let mut base = args(["--kubeconfig"]);
        base.push(self.kubeconfig.path().as_os_str().to_owned());
        base.extend(args(["--namespace", namespace]));
        base
    }

    fn write_args(&self, verb: &str, request: &ReleaseRequest, values: &Path) -> Vec<OsString> {
        let mut all = args([verb, request.name.as_str()]);
        all.push(request.chart.as_os_str().to_owned());
        all.extend(self.base_args(&request.namespace));
        all.push("--values".into());
        all.push(values.as_os_str().to_owned());
        if !request.labels.is_empty() {
            all.extend(args(["--labels".to_string(), label_arg(&request.labels)]));
        }
        all
    }

    async fn write(&self, verb: &str, request: &ReleaseRequest) -> Result<()> {
        let values = serde_json::to_vec(&request.values)
            .map_err(|e| Error::serialization_for_kind("release values", e.to_string()))?;
        let values_file = write_temp(&values, "values")?;

        let description = format!("helm {} {}/{}", verb, request.namespace, request.name);
        run_helm(
            self.write_args(verb, request, values_file.path()),
            self.timeout,
            &description,
        )
        .await?;
        info!(release = %request.name, namespace = %request.namespace, "Helm {} succeeded", verb);
        Ok(())
    }
}

#[async_trait]
impl ReleaseClient for HelmCli {
    async fn values(&self, namespace: &str, name: &str) -> Result<serde_json::Value> {
        let mut all = args(["get", "values", name, "--output", "json"]);
        all.extend(self.base_args(namespace));
        let description = format!("helm get values {}/{}", namespace, name);

        let stdout = run_helm(all, self.timeout, &description).await?;
        let values: serde_json::Value = serde_json::from_slice(&stdout)
            .map_err(|e| Error::serialization_for_kind("release values", e.to_string()))?;
        // A release installed without values reports null
        Ok(match values {
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        })
    }

    async fn install(&self, request: &ReleaseRequest) -> Result<()> {
        self.write("install", request).await
    }

    async fn upgrade(&self, request: &ReleaseRequest) -> Result<()> {
        self.write("upgrade", request).await
    }

    async fn uninstall(&self, namespace: &str, name: &str) -> Result<()> {
        let mut all = args(["uninstall", name]);
        all.extend(self.base_args(namespace));
        run_helm(all, self.timeout, &format!("helm uninstall {}/{}", namespace, name)).await?;
        info!(release = %name, namespace = %namespace, "Helm uninstall succeeded");
        Ok(())
    }
}

/// Chart transport pulling archives with `helm pull`
#[derive(Clone, Debug)]
pub struct HelmPull {
    timeout: Duration,
}

impl HelmPull {
    /// Transport with a per-pull timeout
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HelmPull {
    fn default() -> Self {
        Self::new(DEFAULT_HELM_TIMEOUT)
    }
}

fn pull_args(chart: &ChartRef, destination: &Path) -> Vec<OsString> {
    let mut all = args(["pull", chart.chart.as_str(), "--repo", chart.repository.as_str()]);
    if let Some(version) = &chart.version {
        all.extend(args(["--version", version.as_str()]));
    }
    all.push("--destination".into());
    all.push(destination.as_os_str().to_owned());
    all
}

#[async_trait]
impl ChartTransport for HelmPull {
    async fn stage(&self, chart: &ChartRef) -> Result<StagedChart> {
        let dir = TempDir::new()
            .map_err(|e| Error::internal_with_context("helm pull", format!("failed to create staging dir: {}", e)))?;
        let description = format!("helm pull {}", chart.chart);
        run_helm(pull_args(chart, dir.path()), self.timeout, &description).await?;

        let mut entries = tokio::fs::read_dir(dir.path())
            .await
            .map_err(|e| Error::internal_with_context("helm pull", e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::internal_with_context("helm pull", e.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "tgz") {
                debug!(chart = %chart.chart, path = %path.display(), "Staged chart");
                return Ok(StagedChart::new(path, dir));
            }
        }

        Err(Error::store(
            description,
            ApiErrorKind::Other,
            "no chart archive was downloaded",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::fixtures::access;
    use std::path::PathBuf;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_pull_args_with_and_without_version() {
        let mut chart = ChartRef {
            repository: "https://charts.example.com".to_string(),
            chart: "chart-operator-chart".to_string(),
            version: None,
        };
        assert_eq!(
            strings(&pull_args(&chart, Path::new("/tmp/x"))),
            vec![
                "pull",
                "chart-operator-chart",
                "--repo",
                "https://charts.example.com",
                "--destination",
                "/tmp/x"
            ]
        );

        chart.version = Some("0.3.0".to_string());
        let with_version = strings(&pull_args(&chart, Path::new("/tmp/x")));
        assert_eq!(with_version[4..6], ["--version", "0.3.0"]);
    }

    #[test]
    fn test_install_args_carry_values_and_labels() {
        let cli = HelmCli::new(&access(), "5xchu", DEFAULT_HELM_TIMEOUT).unwrap();
        let request = ReleaseRequest {
            name: "chart-operator".to_string(),
            namespace: "kube-system".to_string(),
            chart: PathBuf::from("/tmp/stage/chart-operator-chart-0.3.0.tgz"),
            values: serde_json::json!({}),
            labels: BTreeMap::from([
                ("tenant.dev/cluster".to_string(), "5xchu".to_string()),
                ("tenant.dev/managed-by".to_string(), "tenant-operator".to_string()),
            ]),
        };

        let all = strings(&cli.write_args("install", &request, Path::new("/tmp/values.json")));

        assert_eq!(all[..3], ["install", "chart-operator", "/tmp/stage/chart-operator-chart-0.3.0.tgz"]);
        assert_eq!(all[3], "--kubeconfig");
        assert_eq!(all[5..7], ["--namespace", "kube-system"]);
        assert_eq!(all[7..9], ["--values", "/tmp/values.json"]);
        assert_eq!(
            all[9..],
            [
                "--labels",
                "tenant.dev/cluster=5xchu,tenant.dev/managed-by=tenant-operator"
            ]
        );
    }

    #[test]
    fn test_kubeconfig_file_holds_rendered_access() {
        let cli = HelmCli::new(&access(), "5xchu", DEFAULT_HELM_TIMEOUT).unwrap();
        let written = std::fs::read_to_string(cli.kubeconfig.path()).unwrap();
        assert_eq!(written, access().render_kubeconfig("5xchu").unwrap());
    }
}
