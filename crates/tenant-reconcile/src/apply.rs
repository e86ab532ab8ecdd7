//! Applier: executes a patch against an object store
//!
//! Changes are issued one at a time in the order create, update, delete.
//! Before every call the cancellation signal is checked. Results that mean
//! "already applied" (a create hitting an existing object, an update or
//! delete hitting a missing one) count as success. A transient failure
//! cancels the reconciliation and stops all further calls; any other failure
//! is returned with call-site context.

use tenant_common::metrics::{self, ChangeLabel};
use tenant_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::cancel::CancellationSignal;
use crate::diff::{Patch, Update};
use crate::model::{ManagedObject, Payload};
use crate::store::ObjectStore;

/// What an applier invocation did
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Creates that succeeded (including already-existing objects)
    pub created: usize,
    /// Updates that succeeded (including already-removed objects)
    pub updated: usize,
    /// Deletes that succeeded (including already-removed objects)
    pub deleted: usize,
    /// Changes not issued because the pass was canceled
    pub skipped: usize,
}

impl ApplyReport {
    /// Changes that reached the store
    pub fn applied(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Sum two reports
    pub fn merge(self, other: ApplyReport) -> ApplyReport {
        ApplyReport {
            created: self.created + other.created,
            updated: self.updated + other.updated,
            deleted: self.deleted + other.deleted,
            skipped: self.skipped + other.skipped,
        }
    }
}

enum Step<'p, P> {
    Create(&'p ManagedObject<P>),
    Update(&'p Update<P>),
    Delete(&'p ManagedObject<P>),
}

impl<P: Payload> Step<'_, P> {
    fn verb(&self) -> &'static str {
        match self {
            Step::Create(_) => "create",
            Step::Update(_) => "update",
            Step::Delete(_) => "delete",
        }
    }

    fn target(&self) -> &ManagedObject<P> {
        match self {
            Step::Create(obj) | Step::Delete(obj) => obj,
            Step::Update(update) => &update.current,
        }
    }

    async fn issue(&self, store: &dyn ObjectStore<P>) -> Result<()> {
        match self {
            Step::Create(obj) => store.create(obj).await,
            Step::Update(update) => store.update(&update.current, &update.desired).await,
            Step::Delete(obj) => store.delete(obj).await,
        }
    }

    /// Whether the error means the change is already in effect
    fn already_applied(&self, err: &Error) -> bool {
        match self {
            Step::Create(_) => err.is_already_exists(),
            Step::Update(_) | Step::Delete(_) => err.is_not_found(),
        }
    }

    fn count(&self, report: &mut ApplyReport) {
        match self {
            Step::Create(_) => report.created += 1,
            Step::Update(_) => report.updated += 1,
            Step::Delete(_) => report.deleted += 1,
        }
    }
}

/// Apply `patch` to `store` for the resource kind named `kind`
pub async fn apply<P: Payload>(
    store: &dyn ObjectStore<P>,
    kind: &str,
    patch: &Patch<P>,
    signal: &mut CancellationSignal,
) -> Result<ApplyReport> {
    let steps = patch
        .to_create
        .iter()
        .map(Step::Create)
        .chain(patch.to_update.iter().map(Step::Update))
        .chain(patch.to_delete.iter().map(Step::Delete));

    let total = patch.len();
    let mut report = ApplyReport::default();

    for (issued, step) in steps.enumerate() {
        if signal.is_canceled() {
            report.skipped = total - issued;
            debug!(
                kind = %kind,
                skipped = report.skipped,
                cancellation = %signal.state(),
                "Skipping remaining changes"
            );
            break;
        }

        let key = &step.target().key;
        match step.issue(store).await {
            Ok(()) => {
                debug!(kind = %kind, object = %key, "{} succeeded", step.verb());
                step.count(&mut report);
            }
            Err(e) if step.already_applied(&e) => {
                debug!(kind = %kind, object = %key, reason = %e, "{} already in effect", step.verb());
                step.count(&mut report);
            }
            Err(e) if e.is_transient() => {
                warn!(
                    kind = %kind,
                    object = %key,
                    error = %e,
                    "Tenant cluster unavailable during {}, canceling reconciliation",
                    step.verb()
                );
                signal.cancel_reconciliation();
                report.skipped = total - issued;
                break;
            }
            Err(e) => {
                return Err(e.with_context(format!("{} {} {}", kind, step.verb(), key)));
            }
        }
    }

    metrics::record_changes(kind, ChangeLabel::Create, report.created);
    metrics::record_changes(kind, ChangeLabel::Update, report.updated);
    metrics::record_changes(kind, ChangeLabel::Delete, report.deleted);

    if report.applied() > 0 {
        info!(
            kind = %kind,
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            skipped = report.skipped,
            "Applied patch"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::Cancellation;
    use crate::model::ObjectKey;
    use crate::store::MockObjectStore;
    use mockall::Sequence;
    use tenant_common::ApiErrorKind;

    fn obj(name: &str, data: &str) -> ManagedObject<String> {
        ManagedObject::new(ObjectKey::new("kube-system", name), data.to_string())
    }

    fn store_error(kind: ApiErrorKind) -> Error {
        Error::store("test", kind, "injected")
    }

    fn full_patch() -> Patch<String> {
        Patch {
            to_create: vec![obj("b", "v1")],
            to_update: vec![Update {
                current: obj("a", "v1"),
                desired: obj("a", "v2"),
            }],
            to_delete: vec![obj("c", "x")],
        }
    }

    // ==========================================================================
    // Story Tests: ordering and tolerance
    // ==========================================================================

    /// Story: creates land before updates, updates before deletes
    #[tokio::test]
    async fn story_changes_are_issued_create_update_delete() {
        let mut store = MockObjectStore::<String>::new();
        let mut seq = Sequence::new();
        store
            .expect_create()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        store
            .expect_update()
            .withf(|current, desired| current.payload == "v1" && desired.payload == "v2")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        store
            .expect_delete()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut signal = CancellationSignal::new();
        let report = apply(&store, "configmap", &full_patch(), &mut signal)
            .await
            .unwrap();

        assert_eq!(
            report,
            ApplyReport {
                created: 1,
                updated: 1,
                deleted: 1,
                skipped: 0
            }
        );
        assert!(!signal.is_canceled());
    }

    /// Story: deleting an object someone already removed is fine
    #[tokio::test]
    async fn story_delete_of_missing_object_succeeds() {
        let mut store = MockObjectStore::<String>::new();
        store
            .expect_delete()
            .times(1)
            .returning(|_| Err(store_error(ApiErrorKind::NotFound)));

        let patch = Patch {
            to_delete: vec![obj("c", "x")],
            ..Default::default()
        };
        let mut signal = CancellationSignal::new();
        let report = apply(&store, "configmap", &patch, &mut signal).await.unwrap();
        assert_eq!(report.deleted, 1);
    }

    /// Story: a retried create that already landed is fine
    #[tokio::test]
    async fn story_create_of_existing_object_succeeds() {
        let mut store = MockObjectStore::<String>::new();
        store
            .expect_create()
            .times(1)
            .returning(|_| Err(store_error(ApiErrorKind::AlreadyExists)));

        let patch = Patch {
            to_create: vec![obj("b", "v1")],
            ..Default::default()
        };
        let mut signal = CancellationSignal::new();
        let report = apply(&store, "configmap", &patch, &mut signal).await.unwrap();
        assert_eq!(report.created, 1);
    }

    /// Story: updating an object that vanished is terminal success, no create follows
    #[tokio::test]
    async fn story_update_of_missing_object_succeeds_without_create() {
        let mut store = MockObjectStore::<String>::new();
        store
            .expect_update()
            .times(1)
            .returning(|_, _| Err(store_error(ApiErrorKind::NotFound)));
        store.expect_create().never();

        let patch = Patch {
            to_update: vec![Update {
                current: obj("a", "v1"),
                desired: obj("a", "v2"),
            }],
            ..Default::default()
        };
        let mut signal = CancellationSignal::new();
        let report = apply(&store, "configmap", &patch, &mut signal).await.unwrap();
        assert_eq!(report.updated, 1);
    }

    /// Story: the tenant API going away mid-apply cancels the pass cleanly
    #[tokio::test]
    async fn story_transient_failure_stops_all_further_calls() {
        let mut store = MockObjectStore::<String>::new();
        store
            .expect_create()
            .times(1)
            .returning(|_| Err(store_error(ApiErrorKind::Unavailable)));
        store.expect_update().never();
        store.expect_delete().never();

        let mut signal = CancellationSignal::new();
        let report = apply(&store, "configmap", &full_patch(), &mut signal)
            .await
            .unwrap();

        assert_eq!(signal.state(), Cancellation::ReconciliationCanceled);
        assert_eq!(report.applied(), 0);
        assert_eq!(report.skipped, 3);
    }

    #[tokio::test]
    async fn test_timeout_mid_update_skips_deletes() {
        let mut store = MockObjectStore::<String>::new();
        store.expect_create().times(1).returning(|_| Ok(()));
        store
            .expect_update()
            .times(1)
            .returning(|_, _| Err(store_error(ApiErrorKind::Timeout)));
        store.expect_delete().never();

        let mut signal = CancellationSignal::new();
        let report = apply(&store, "configmap", &full_patch(), &mut signal)
            .await
            .unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.skipped, 2);
        assert!(signal.is_canceled());
    }

    #[tokio::test]
    async fn test_already_canceled_signal_issues_nothing() {
        let store = MockObjectStore::<String>::new();
        let mut signal = CancellationSignal::new();
        signal.cancel_resource();

        let report = apply(&store, "configmap", &full_patch(), &mut signal)
            .await
            .unwrap();
        assert_eq!(report.skipped, 3);
        assert_eq!(signal.state(), Cancellation::ResourceCanceled);
    }

    #[tokio::test]
    async fn test_hard_failure_propagates_with_context() {
        let mut store = MockObjectStore::<String>::new();
        store
            .expect_create()
            .times(1)
            .returning(|_| Err(store_error(ApiErrorKind::Other)));
        store.expect_update().never();

        let mut signal = CancellationSignal::new();
        let err = apply(&store, "configmap", &full_patch(), &mut signal)
            .await
            .unwrap_err();

        assert_eq!(err.api_kind(), Some(ApiErrorKind::Other));
        assert_eq!(
            err.context(),
            Some("configmap create kube-system/b: test")
        );
        assert!(!signal.is_canceled());
    }

    #[tokio::test]
    async fn test_not_found_on_create_is_a_hard_failure() {
        // e.g. the target namespace does not exist
        let mut store = MockObjectStore::<String>::new();
        store
            .expect_create()
            .returning(|_| Err(store_error(ApiErrorKind::NotFound)));

        let patch = Patch {
            to_create: vec![obj("b", "v1")],
            ..Default::default()
        };
        let mut signal = CancellationSignal::new();
        assert!(apply(&store, "configmap", &patch, &mut signal).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_patch_makes_no_calls() {
        let store = MockObjectStore::<String>::new();
        let mut signal = CancellationSignal::new();
        let report = apply(&store, "configmap", &Patch::default(), &mut signal)
            .await
            .unwrap();
        assert_eq!(report, ApplyReport::default());
    }
}
