//! Shared current-state resolution
//!
//! Listing is scoped by the owner selector and the result is filtered again
//! in process, so a store that ignores selectors still never leaks objects
//! owned by someone else into a diff. A transient failure on any namespace
//! cancels the reconciliation and yields an empty state; anything else is a
//! hard failure.

use tenant_common::{OwnerConfig, Result};
use tracing::{debug, warn};

use crate::cancel::CancellationSignal;
use crate::model::{ObjectKey, Payload, ResourceState};
use crate::store::ObjectStore;

/// List owned objects across `namespaces`
///
/// Namespaces are queried independently and in order. Use a single empty
/// namespace for cluster-scoped objects.
pub async fn list_owned<P: Payload>(
    store: &dyn ObjectStore<P>,
    owner: &OwnerConfig,
    namespaces: &[String],
    signal: &mut CancellationSignal,
) -> Result<ResourceState<P>> {
    let selector = owner.selector();
    let mut state = ResourceState::current();

    for namespace in namespaces {
        let objects = match store.list(namespace, &selector).await {
            Ok(objects) => objects,
            Err(e) if e.is_transient() => {
                warn!(
                    namespace = %namespace,
                    error = %e,
                    "Tenant cluster unavailable, canceling reconciliation"
                );
                signal.cancel_reconciliation();
                return Ok(ResourceState::current());
            }
            Err(e) => return Err(e.with_context(format!("list in namespace {:?}", namespace))),
        };

        let listed = objects.len();
        for object in objects.into_iter().filter(|o| owner.owns(&o.labels)) {
            state.insert(object)?;
        }
        debug!(
            namespace = %namespace,
            listed = listed,
            owned = state.len(),
            "Listed current objects"
        );
    }

    Ok(state)
}

/// Read a single owned object
///
/// A missing object, or one without the owner labels, gives an empty state.
pub async fn get_owned<P: Payload>(
    store: &dyn ObjectStore<P>,
    owner: &OwnerConfig,
    key: &ObjectKey,
    signal: &mut CancellationSignal,
) -> Result<ResourceState<P>> {
    let mut state = ResourceState::current();

    match store.get(key).await {
        Ok(Some(object)) if owner.owns(&object.labels) => state.insert(object)?,
        Ok(Some(_)) => debug!(object = %key, "Ignoring object not owned by this controller"),
        Ok(None) => debug!(object = %key, "Object not found"),
        Err(e) if e.is_transient() => {
            warn!(object = %key, error = %e, "Tenant cluster unavailable, canceling reconciliation");
            signal.cancel_reconciliation();
        }
        Err(e) => return Err(e.with_context(format!("get {}", key))),
    }

    Ok(state)
}
