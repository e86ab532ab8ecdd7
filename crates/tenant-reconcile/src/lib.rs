//! Reconciliation engine for tenant cluster sub-resources
//!
//! Every resource kind follows the same cycle: resolve current state,
//! resolve desired state, diff, apply. This crate holds that cycle once:
//!
//! - [`model`]: managed objects and resource states
//! - [`diff`]: the differ and the [`Patch`] it produces
//! - [`apply`]: the applier with idempotent-success tolerance
//! - [`cancel`]: the cooperative cancellation signal
//! - [`resolve`]: owner-scoped listing shared by kinds
//! - [`pass`]: the [`ResourceKind`] strategy, single passes and resource sets

#![deny(missing_docs)]

pub mod apply;
pub mod cancel;
pub mod diff;
pub mod model;
pub mod pass;
pub mod resolve;
pub mod store;

#[cfg(any(test, feature = "test-harness"))]
pub mod testing;

pub use apply::{apply, ApplyReport};
pub use cancel::{Cancellation, CancellationSignal};
pub use diff::{diff, ChangeKinds, Patch, PatchCounts, Update};
pub use model::{ManagedObject, ObjectKey, Payload, ProviderMetadata, ResourceState, StateTag};
pub use pass::{
    run_pass, DeletionPolicy, PassOutcome, Reconcile, ResourceKind, ResourceSet, SetReport,
    Specification,
};
pub use resolve::{get_owned, list_owned};
pub use store::ObjectStore;
