//! TenantCluster controller
//!
//! Each reconciliation builds the specification view, fetches tenant access,
//! runs the resource set and records the outcome in the TenantCluster status.
//! Failures are requeued with a bounded exponential backoff tracked per
//! cluster; any success resets it.
//!
//! Live clusters get [`CLUSTER_FINALIZER`] so the API server keeps a deleted
//! TenantCluster around until a deletion pass has torn down its chart values.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, error, info, instrument, warn};

use tenant_common::crd::{ChangeCounts, ReconcileOutcome, TenantCluster, TenantClusterStatus};
use tenant_common::kube_utils::{patch_resource_status, ClientTimeouts};
use tenant_common::metrics::ReconcileTimer;
use tenant_common::retry::BackoffPolicy;
use tenant_common::{Error, Result};
use tenant_reconcile::{ApplyReport, SetReport};
use tenant_resources::{
    resource_set, ClusterSpecification, CredentialSource, ProviderPolicy, SecretCredentialSource,
    Stores, TenantAccess,
};

use crate::config::OperatorConfig;

/// Runs the resource set of one tenant cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterReconciler: Send + Sync {
    /// Reconcile every resource kind for `spec`
    async fn reconcile(&self, spec: &ClusterSpecification, access: TenantAccess) -> Result<SetReport>;
}

/// Finalizer holding a deleted TenantCluster until its teardown pass is done
pub const CLUSTER_FINALIZER: &str = "tenant.dev/teardown";

/// Writes to TenantCluster resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterWriter: Send + Sync {
    /// Merge-patch the status of a TenantCluster
    async fn patch_status(&self, name: &str, namespace: &str, status: &TenantClusterStatus) -> Result<()>;

    /// Add [`CLUSTER_FINALIZER`] unless already present
    async fn add_finalizer(&self, name: &str, namespace: &str) -> Result<()>;

    /// Remove [`CLUSTER_FINALIZER`] if present
    async fn remove_finalizer(&self, name: &str, namespace: &str) -> Result<()>;
}

/// [`ClusterReconciler`] connecting kube and Helm backed stores per run
pub struct KubeClusterReconciler {
    client: Client,
    policy: ProviderPolicy,
    timeouts: ClientTimeouts,
}

impl KubeClusterReconciler {
    /// Reconciler writing management objects through `client`
    pub fn new(client: Client, policy: ProviderPolicy, timeouts: ClientTimeouts) -> Self {
        Self {
            client,
            policy,
            timeouts,
        }
    }
}

#[async_trait]
impl ClusterReconciler for KubeClusterReconciler {
    async fn reconcile(&self, spec: &ClusterSpecification, access: TenantAccess) -> Result<SetReport> {
        let stores =
            Stores::connect(&self.policy, spec, &access, self.client.clone(), self.timeouts).await?;
        resource_set(&self.policy, access, stores).run(spec).await
    }
}

/// [`ClusterWriter`] over the management cluster client
pub struct KubeClusterWriter {
    client: Client,
}

impl KubeClusterWriter {
    /// Writer patching through `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Rewrite the finalizer list of a TenantCluster from its latest copy
    async fn update_finalizers(
        &self,
        name: &str,
        namespace: &str,
        edit: impl FnOnce(&mut Vec<String>) -> bool,
    ) -> std::result::Result<(), kube::Error> {
        let api: Api<TenantCluster> = Api::namespaced(self.client.clone(), namespace);
        let cluster = api.get(name).await?;
        let mut finalizers = cluster.metadata.finalizers.unwrap_or_default();
        if !edit(&mut finalizers) {
            return Ok(());
        }

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ClusterWriter for KubeClusterWriter {
    async fn patch_status(&self, name: &str, namespace: &str, status: &TenantClusterStatus) -> Result<()> {
        patch_resource_status::<TenantCluster>(&self.client, name, namespace, status)
            .await
            .map_err(|e| Error::from(e).with_context(format!("patch status {}/{}", namespace, name)))
    }

    async fn add_finalizer(&self, name: &str, namespace: &str) -> Result<()> {
        self.update_finalizers(name, namespace, |finalizers| {
            if finalizers.iter().any(|f| f == CLUSTER_FINALIZER) {
                return false;
            }
            finalizers.push(CLUSTER_FINALIZER.to_string());
            true
        })
        .await
        .map_err(|e| Error::from(e).with_context(format!("add finalizer {}/{}", namespace, name)))
    }

    async fn remove_finalizer(&self, name: &str, namespace: &str) -> Result<()> {
        self.update_finalizers(name, namespace, |finalizers| {
            let before = finalizers.len();
            finalizers.retain(|f| f != CLUSTER_FINALIZER);
            finalizers.len() != before
        })
        .await
        .map_err(|e| Error::from(e).with_context(format!("remove finalizer {}/{}", namespace, name)))
    }
}

/// Shared controller state
pub struct Context {
    /// Source of tenant access material
    pub credentials: Arc<dyn CredentialSource>,
    /// Resource set runner
    pub reconciler: Arc<dyn ClusterReconciler>,
    /// Status and finalizer writer
    pub writer: Arc<dyn ClusterWriter>,
    /// Backoff applied to failed reconciliations
    pub backoff: BackoffPolicy,
    /// Requeue delay after a converged reconciliation
    pub resync_interval: Duration,
    /// Requeue delay after a canceled reconciliation
    pub canceled_requeue: Duration,
    /// Consecutive failures per cluster, keyed by namespace/name
    failures: DashMap<String, u32>,
}

impl Context {
    /// Context with kube-backed collaborators
    pub fn from_client(client: Client, config: &OperatorConfig) -> Self {
        Self::new(
            Arc::new(SecretCredentialSource::new(client.clone())),
            Arc::new(KubeClusterReconciler::new(
                client.clone(),
                config.policy.clone(),
                config.timeouts,
            )),
            Arc::new(KubeClusterWriter::new(client)),
            config,
        )
    }

    /// Context with explicit collaborators
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        reconciler: Arc<dyn ClusterReconciler>,
        writer: Arc<dyn ClusterWriter>,
        config: &OperatorConfig,
    ) -> Self {
        Self {
            credentials,
            reconciler,
            writer,
            backoff: config.backoff.clone(),
            resync_interval: config.resync_interval,
            canceled_requeue: config.canceled_requeue,
            failures: DashMap::new(),
        }
    }

    /// Record a failure and return the delay before the next attempt
    fn next_backoff(&self, key: &str) -> Duration {
        let mut failures = self.failures.entry(key.to_string()).or_insert(0);
        *failures = failures.saturating_add(1);
        self.backoff.delay_for(*failures)
    }

    fn reset_backoff(&self, key: &str) {
        self.failures.remove(key);
    }

    /// Consecutive failures recorded for a cluster
    pub fn failures(&self, key: &str) -> u32 {
        self.failures.get(key).map(|f| *f).unwrap_or(0)
    }
}

/// Backoff key of a TenantCluster
pub fn cluster_key(cluster: &TenantCluster) -> String {
    format!("{}/{}", cluster.namespace().unwrap_or_default(), cluster.name_any())
}

/// Whether the cluster carries [`CLUSTER_FINALIZER`]
fn has_finalizer(cluster: &TenantCluster) -> bool {
    cluster
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == CLUSTER_FINALIZER))
}

fn counts(report: &ApplyReport) -> ChangeCounts {
    let clamp = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
    ChangeCounts {
        created: clamp(report.created),
        updated: clamp(report.updated),
        deleted: clamp(report.deleted),
    }
}

fn status(
    cluster: &TenantCluster,
    outcome: ReconcileOutcome,
    message: Option<String>,
    changes: ChangeCounts,
) -> TenantClusterStatus {
    TenantClusterStatus {
        observed_generation: cluster.metadata.generation,
        last_outcome: outcome,
        message,
        changes,
        last_reconciled: Some(chrono::Utc::now().to_rfc3339()),
    }
}

/// Patch status, logging instead of failing the reconciliation
async fn record(ctx: &Context, cluster: &TenantCluster, status: TenantClusterStatus) {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();
    if let Err(e) = ctx.writer.patch_status(&name, &namespace, &status).await {
        warn!(error = %e, outcome = %status.last_outcome, "Failed to update status");
    }
}

/// Reconcile a TenantCluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<TenantCluster>, ctx: Arc<Context>) -> Result<Action> {
    let timer = ReconcileTimer::start();
    let key = cluster_key(&cluster);
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    let spec = match ClusterSpecification::from_resource(&cluster) {
        Ok(spec) => spec,
        Err(e) if cluster.metadata.deletion_timestamp.is_some() && has_finalizer(&cluster) => {
            // Nothing can be torn down without a valid specification
            warn!(error = %e, "Invalid specification on a deleted cluster, releasing it");
            if let Err(e) = ctx.writer.remove_finalizer(&name, &namespace).await {
                timer.error(e.is_retryable());
                return Err(e);
            }
            ctx.reset_backoff(&key);
            timer.success();
            return Ok(Action::await_change());
        }
        Err(e) => {
            warn!(error = %e, "Invalid specification");
            record(&ctx, &cluster, status(&cluster, ReconcileOutcome::Failed, Some(e.to_string()), ChangeCounts::default())).await;
            timer.error(false);
            return Err(e);
        }
    };

    if !spec.deleted && !has_finalizer(&cluster) {
        if let Err(e) = ctx.writer.add_finalizer(&name, &namespace).await {
            timer.error(e.is_retryable());
            return Err(e.in_cluster(&spec.cluster_id));
        }
        debug!(finalizer = CLUSTER_FINALIZER, "Added finalizer");
    }

    let access = match ctx.credentials.tenant_access(&spec).await {
        Ok(Some(access)) => access,
        Ok(None) => {
            info!("Tenant access not issued yet, canceling reconciliation");
            ctx.reset_backoff(&key);
            record(
                &ctx,
                &cluster,
                status(
                    &cluster,
                    ReconcileOutcome::Canceled,
                    Some("tenant access not issued yet".to_string()),
                    ChangeCounts::default(),
                ),
            )
            .await;
            timer.canceled();
            return Ok(Action::requeue(ctx.canceled_requeue));
        }
        Err(e) => {
            timer.error(e.is_retryable());
            return Err(e.in_cluster(&spec.cluster_id));
        }
    };

    match ctx.reconciler.reconcile(&spec, access).await {
        Ok(report) if report.reconciliation_canceled() => {
            ctx.reset_backoff(&key);
            record(
                &ctx,
                &cluster,
                status(
                    &cluster,
                    ReconcileOutcome::Canceled,
                    Some("tenant cluster unavailable".to_string()),
                    counts(&report.totals()),
                ),
            )
            .await;
            timer.canceled();
            Ok(Action::requeue(ctx.canceled_requeue))
        }
        Ok(report) => {
            ctx.reset_backoff(&key);
            let totals = report.totals();
            debug!(created = totals.created, updated = totals.updated, deleted = totals.deleted, "Cluster reconciled");
            record(&ctx, &cluster, status(&cluster, ReconcileOutcome::Reconciled, None, counts(&totals))).await;
            if !spec.deleted {
                timer.success();
                return Ok(Action::requeue(ctx.resync_interval));
            }

            if has_finalizer(&cluster) {
                if let Err(e) = ctx.writer.remove_finalizer(&name, &namespace).await {
                    timer.error(e.is_retryable());
                    return Err(e.in_cluster(&spec.cluster_id));
                }
                info!("Teardown complete, finalizer removed");
            }
            timer.success();
            Ok(Action::await_change())
        }
        Err(e) => {
            let e = e.in_cluster(&spec.cluster_id);
            record(&ctx, &cluster, status(&cluster, ReconcileOutcome::Failed, Some(e.to_string()), ChangeCounts::default())).await;
            timer.error(e.is_retryable());
            Err(e)
        }
    }
}

/// Requeue a failed reconciliation with bounded exponential backoff
pub fn error_policy(cluster: Arc<TenantCluster>, error: &Error, ctx: Arc<Context>) -> Action {
    let key = cluster_key(&cluster);
    let delay = ctx.next_backoff(&key);
    if error.is_retryable() {
        warn!(cluster = %key, ?delay, error = %error, "Reconciliation failed, retrying");
    } else {
        error!(cluster = %key, ?delay, error = %error, "Reconciliation failed, specification needs a fix");
    }
    Action::requeue(delay)
}
