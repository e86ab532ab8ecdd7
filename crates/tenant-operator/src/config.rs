//! Operator configuration from flags and environment

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tenant_common::kube_utils::ClientTimeouts;
use tenant_common::labels::DEFAULT_MANAGED_BY;
use tenant_common::retry::BackoffPolicy;
use tenant_common::{Error, OwnerConfig, Result};
use tenant_resources::policy::{
    ChartSettings, ProviderPolicy, DEFAULT_CHART_REPOSITORY, DEFAULT_REGISTRY_DOMAIN,
};

/// Flags shared by every run mode
#[derive(Args, Clone, Debug)]
pub struct OperatorArgs {
    /// Path to a kubeconfig for the management cluster (in-cluster config when unset)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Value of the managed-by label written to and selected from every object
    #[arg(long, env = "TENANT_MANAGED_BY", default_value = DEFAULT_MANAGED_BY)]
    pub managed_by: String,

    /// Registry domain images are pulled from
    #[arg(long, env = "TENANT_REGISTRY_DOMAIN", default_value = DEFAULT_REGISTRY_DOMAIN)]
    pub registry_domain: String,

    /// Repository the chart operator chart is pulled from
    #[arg(long, env = "TENANT_CHART_REPOSITORY", default_value = DEFAULT_CHART_REPOSITORY)]
    pub chart_repository: String,

    /// Chart operator chart version (latest when unset)
    #[arg(long, env = "TENANT_CHART_VERSION")]
    pub chart_version: Option<String>,

    /// Seconds between resyncs of a converged cluster
    #[arg(long, env = "TENANT_RESYNC_INTERVAL_SECS", default_value = "300")]
    pub resync_interval_secs: u64,

    /// Seconds before retrying a canceled reconciliation
    #[arg(long, env = "TENANT_CANCELED_REQUEUE_SECS", default_value = "30")]
    pub canceled_requeue_secs: u64,

    /// Backoff after the first failed reconciliation, in seconds
    #[arg(long, env = "TENANT_BACKOFF_INITIAL_SECS", default_value = "5")]
    pub backoff_initial_secs: u64,

    /// Upper bound of the failure backoff, in seconds
    #[arg(long, env = "TENANT_BACKOFF_MAX_SECS", default_value = "300")]
    pub backoff_max_secs: u64,

    /// Emit logs as JSON
    #[arg(long, env = "TENANT_LOG_JSON", default_value = "false")]
    pub log_json: bool,
}

/// Validated operator configuration
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Management cluster kubeconfig, in-cluster when unset
    pub kubeconfig: Option<PathBuf>,
    /// Policy shared by every resource kind
    pub policy: ProviderPolicy,
    /// Backoff applied to failed reconciliations
    pub backoff: BackoffPolicy,
    /// Requeue delay after a converged reconciliation
    pub resync_interval: Duration,
    /// Requeue delay after a canceled reconciliation
    pub canceled_requeue: Duration,
    /// Timeouts for management and tenant clients
    pub timeouts: ClientTimeouts,
}

impl TryFrom<OperatorArgs> for OperatorConfig {
    type Error = Error;

    fn try_from(args: OperatorArgs) -> Result<Self> {
        if args.managed_by.is_empty() {
            return Err(Error::validation("--managed-by must not be empty"));
        }
        if args.resync_interval_secs == 0 {
            return Err(Error::validation("--resync-interval-secs must be greater than zero"));
        }
        if args.backoff_initial_secs == 0 || args.backoff_initial_secs > args.backoff_max_secs {
            return Err(Error::validation(format!(
                "backoff bounds must satisfy 0 < initial ({}) <= max ({})",
                args.backoff_initial_secs, args.backoff_max_secs
            )));
        }

        let policy = ProviderPolicy {
            registry_domain: args.registry_domain,
            owner: OwnerConfig::new(args.managed_by),
            chart: ChartSettings {
                repository: args.chart_repository,
                version: args.chart_version,
                ..Default::default()
            },
            ..Default::default()
        };

        Ok(Self {
            kubeconfig: args.kubeconfig,
            policy,
            backoff: BackoffPolicy {
                initial_delay: Duration::from_secs(args.backoff_initial_secs),
                max_delay: Duration::from_secs(args.backoff_max_secs),
                ..Default::default()
            },
            resync_interval: Duration::from_secs(args.resync_interval_secs),
            canceled_requeue: Duration::from_secs(args.canceled_requeue_secs),
            timeouts: ClientTimeouts::default(),
        })
    }
}
