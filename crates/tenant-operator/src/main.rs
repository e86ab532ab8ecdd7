//! Tenant operator - reconciles tenant cluster sub-resources

use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};

use tenant_common::crd::{App, TenantCluster};
use tenant_common::kube_utils::{apply_crd, create_client};
use tenant_common::retry::{retry_with_backoff, RetryConfig};
use tenant_common::telemetry::{init_tracing, TelemetryConfig};
use tenant_operator::{error_policy, reconcile, Context, OperatorArgs, OperatorConfig};

/// Watcher timeout (seconds), below the client read timeout so idle watches
/// are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

const FIELD_MANAGER: &str = "tenant-operator";

/// Tenant operator - keeps tenant cluster sub-resources in sync
#[derive(Parser, Debug)]
#[command(name = "tenant-operator", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    args: OperatorArgs,
}

fn crd_manifests() -> anyhow::Result<String> {
    let cluster = serde_yaml::to_string(&TenantCluster::crd())?;
    let app = serde_yaml::to_string(&App::crd())?;
    Ok(format!("{cluster}---\n{app}"))
}

/// Install the operator's CRDs, retrying while the API server is unreachable
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    for crd in [TenantCluster::crd(), App::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        retry_with_backoff(
            &RetryConfig::with_max_attempts(10),
            &format!("install CRD {}", name),
            |e: &tenant_common::Error| e.is_retryable(),
            || apply_crd(client, &crd, FIELD_MANAGER),
        )
        .await?;
    }
    tracing::info!("All CRDs installed/updated");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    init_tracing(&TelemetryConfig {
        json: cli.args.log_json,
        ..Default::default()
    })?;

    let config = OperatorConfig::try_from(cli.args)?;
    let client = create_client(config.kubeconfig.as_deref(), config.timeouts).await?;

    ensure_crds_installed(&client).await?;

    let ctx = Arc::new(Context::from_client(client.clone(), &config));
    let clusters: Api<TenantCluster> = Api::all(client);

    tracing::info!(
        registry = %config.policy.registry_domain,
        resync = ?config.resync_interval,
        "Starting TenantCluster controller"
    );

    Controller::new(clusters, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    tracing::debug!(cluster = %object.name, ?action, "Reconciliation completed");
                }
                Err(e) => {
                    tracing::error!(error = ?e, "Reconciliation error");
                }
            }
        })
        .await;

    tracing::info!("Controller stopped");
    Ok(())
}
