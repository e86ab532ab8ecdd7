//! Reconciliation pass orchestration
//!
//! A pass runs one [`ResourceKind`] against one tenant cluster:
//!
//! ```text
//! START -> CHECK_SPEC_DELETED -> RESOLVE_CURRENT -> RESOLVE_DESIRED -> DIFF -> APPLY -> DONE
//! ```
//!
//! A deleted specification with [`DeletionPolicy::Redirect`] ends the pass as
//! resource-canceled before anything is queried. Transient tenant-cluster
//! failures end it as reconciliation-canceled. Hard failures are returned as
//! errors for the outer retry loop. A [`ResourceSet`] runs several kinds for
//! one tenant cluster, each with a fresh cancellation signal.

use async_trait::async_trait;
use tenant_common::metrics::{PassLabel, PassTimer};
use tenant_common::Result;
use tracing::{debug, info, instrument, warn};

use crate::apply::{apply, ApplyReport};
use crate::cancel::{Cancellation, CancellationSignal};
use crate::diff::{diff, ChangeKinds};
use crate::model::{Payload, ResourceState};
use crate::store::ObjectStore;

/// Read-only view of the specification that drives a pass
pub trait Specification: Send + Sync {
    /// Identifier of the tenant cluster
    fn cluster_id(&self) -> &str;

    /// Whether the specification carries a deletion timestamp
    fn is_deleted(&self) -> bool;
}

/// What a kind does when its specification is being deleted
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Another controller cleans up; cancel this kind without querying
    Redirect,
    /// Desired state becomes empty so owned objects are deleted
    Teardown,
}

/// One kind of managed object and how to compute its states
///
/// Variants of a kind (per provider, per capability) are expressed through
/// the strategy's own fields, not through separate implementations.
#[async_trait]
pub trait ResourceKind<S: Specification>: Send + Sync {
    /// Payload carried by this kind's objects
    type Payload: Payload;

    /// Short name used in logs, metrics and error context
    fn name(&self) -> &'static str;

    /// Behaviour when the specification is being deleted
    fn deletion_policy(&self) -> DeletionPolicy;

    /// Change kinds this kind performs
    fn changes(&self) -> ChangeKinds {
        ChangeKinds::ALL
    }

    /// Store the applier writes to
    fn store(&self) -> &dyn ObjectStore<Self::Payload>;

    /// Observe owned objects in the tenant cluster
    ///
    /// Transient unavailability is reported by raising reconciliation
    /// cancellation on `signal` and returning an empty state.
    async fn resolve_current(
        &self,
        spec: &S,
        signal: &mut CancellationSignal,
    ) -> Result<ResourceState<Self::Payload>>;

    /// Compute the objects that should exist; pure and deterministic
    fn resolve_desired(&self, spec: &S) -> Result<ResourceState<Self::Payload>>;
}

/// Result of a pass that did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// The patch was applied
    Done(ApplyReport),
    /// This kind was skipped; the rest of the set continues
    ResourceCanceled,
    /// The whole reconciliation of this tenant cluster was aborted
    ReconciliationCanceled,
}

impl PassOutcome {
    fn from_signal(signal: &CancellationSignal) -> Option<Self> {
        match signal.state() {
            Cancellation::None => None,
            Cancellation::ResourceCanceled => Some(PassOutcome::ResourceCanceled),
            Cancellation::ReconciliationCanceled => Some(PassOutcome::ReconciliationCanceled),
        }
    }

    fn label(result: &Result<PassOutcome>) -> PassLabel {
        match result {
            Ok(PassOutcome::Done(_)) => PassLabel::Done,
            Ok(PassOutcome::ResourceCanceled) => PassLabel::ResourceCanceled,
            Ok(PassOutcome::ReconciliationCanceled) => PassLabel::ReconciliationCanceled,
            Err(_) => PassLabel::Failed,
        }
    }
}

/// Run one reconciliation pass of `kind` for `spec`
///
/// `Err` means the pass FAILED and should be retried with backoff.
#[instrument(skip_all, fields(kind = kind.name(), cluster = spec.cluster_id()))]
pub async fn run_pass<S, K>(kind: &K, spec: &S) -> Result<PassOutcome>
where
    S: Specification,
    K: ResourceKind<S> + ?Sized,
{
    let timer = PassTimer::start(kind.name());
    let result = drive(kind, spec)
        .await
        .map_err(|e| e.with_context(kind.name()));
    timer.finish(PassOutcome::label(&result));

    match &result {
        Ok(PassOutcome::Done(report)) => debug!(applied = report.applied(), "Pass done"),
        Ok(outcome) => info!(outcome = ?outcome, "Pass canceled"),
        Err(e) => warn!(error = %e, "Pass failed"),
    }
    result
}

async fn drive<S, K>(kind: &K, spec: &S) -> Result<PassOutcome>
where
    S: Specification,
    K: ResourceKind<S> + ?Sized,
{
    let mut signal = CancellationSignal::new();
    let deleted = spec.is_deleted();

    if deleted && kind.deletion_policy() == DeletionPolicy::Redirect {
        debug!("Specification is being deleted, leaving cleanup to its owner");
        signal.cancel_resource();
        return Ok(PassOutcome::ResourceCanceled);
    }

    let current = match kind.resolve_current(spec, &mut signal).await {
        Ok(current) => current,
        Err(e) if e.is_transient() => {
            warn!(error = %e, "Tenant cluster unavailable, canceling reconciliation");
            signal.cancel_reconciliation();
            return Ok(PassOutcome::ReconciliationCanceled);
        }
        Err(e) => return Err(e),
    };
    if let Some(outcome) = PassOutcome::from_signal(&signal) {
        return Ok(outcome);
    }

    let desired = if deleted {
        ResourceState::desired()
    } else {
        kind.resolve_desired(spec)?
    };

    let patch = diff(&current, &desired)?.restrict(kind.changes());
    let counts = patch.counts();
    debug!(
        current = current.len(),
        desired = desired.len(),
        create = counts.create,
        update = counts.update,
        delete = counts.delete,
        "Computed patch"
    );

    let report = apply(kind.store(), kind.name(), &patch, &mut signal).await?;

    Ok(PassOutcome::from_signal(&signal).unwrap_or(PassOutcome::Done(report)))
}

/// Type-erased pass runner so kinds with different payloads share a set
#[async_trait]
pub trait Reconcile<S: Specification>: Send + Sync {
    /// Name of the resource kind
    fn kind_name(&self) -> &'static str;

    /// Run one pass
    async fn reconcile(&self, spec: &S) -> Result<PassOutcome>;
}

#[async_trait]
impl<S, K> Reconcile<S> for K
where
    S: Specification,
    K: ResourceKind<S>,
{
    fn kind_name(&self) -> &'static str {
        <K as ResourceKind<S>>::name(self)
    }

    async fn reconcile(&self, spec: &S) -> Result<PassOutcome> {
        run_pass(self, spec).await
    }
}

/// Outcomes of one reconciliation of a tenant cluster, in run order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SetReport {
    /// Kind name and outcome for every kind that ran
    pub outcomes: Vec<(&'static str, PassOutcome)>,
}

impl SetReport {
    /// Whether a kind aborted the reconciliation
    pub fn reconciliation_canceled(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| *o == PassOutcome::ReconciliationCanceled)
    }

    /// Outcome of a kind, if it ran
    pub fn outcome_of(&self, name: &str) -> Option<PassOutcome> {
        self.outcomes
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, o)| *o)
    }

    /// Sum of the apply reports of all finished kinds
    pub fn totals(&self) -> ApplyReport {
        self.outcomes
            .iter()
            .filter_map(|(_, o)| match o {
                PassOutcome::Done(report) => Some(*report),
                _ => None,
            })
            .fold(ApplyReport::default(), ApplyReport::merge)
    }
}

/// Ordered collection of resource kinds for one tenant cluster
pub struct ResourceSet<S> {
    kinds: Vec<Box<dyn Reconcile<S>>>,
}

impl<S: Specification> Default for ResourceSet<S> {
    fn default() -> Self {
        Self { kinds: Vec::new() }
    }
}

impl<S: Specification> ResourceSet<S> {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a kind; kinds run in the order they were added
    pub fn with(mut self, kind: impl Reconcile<S> + 'static) -> Self {
        self.kinds.push(Box::new(kind));
        self
    }

    /// Append an already boxed kind
    pub fn push(&mut self, kind: Box<dyn Reconcile<S>>) {
        self.kinds.push(kind);
    }

    /// Kind names in run order
    pub fn names(&self) -> Vec<&'static str> {
        self.kinds.iter().map(|k| k.kind_name()).collect()
    }

    /// Number of kinds
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// Whether the set has no kinds
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Run every kind in order
    ///
    /// A resource-canceled kind lets the next one run. A reconciliation
    /// cancel stops the set and is reported in the result. A hard failure
    /// stops the set and is returned.
    #[instrument(skip_all, fields(cluster = spec.cluster_id()))]
    pub async fn run(&self, spec: &S) -> Result<SetReport> {
        let mut report = SetReport::default();

        for kind in &self.kinds {
            let outcome = kind.reconcile(spec).await?;
            report.outcomes.push((kind.kind_name(), outcome));
            if outcome == PassOutcome::ReconciliationCanceled {
                info!(kind = kind.kind_name(), "Reconciliation canceled, skipping remaining kinds");
                break;
            }
        }

        let totals = report.totals();
        info!(
            kinds = report.outcomes.len(),
            created = totals.created,
            updated = totals.updated,
            deleted = totals.deleted,
            "Reconciliation finished"
        );
        Ok(report)
    }
}
