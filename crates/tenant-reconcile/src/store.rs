//! Object store abstraction over a tenant cluster
//!
//! Each resource kind talks to exactly one [`ObjectStore`]. Failures are
//! reported as [`tenant_common::Error`] values carrying an
//! [`ApiErrorKind`](tenant_common::ApiErrorKind), which is all the engine
//! branches on.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tenant_common::Result;

use crate::model::{ManagedObject, ObjectKey, Payload};

/// Typed access to one kind of object in a tenant cluster
///
/// Every call is independently atomic; there are no transactions.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore<P: Payload>: Send + Sync {
    /// List objects in a namespace matching a label selector
    ///
    /// An empty namespace lists cluster-scoped objects. Returned objects
    /// carry provider metadata.
    async fn list(&self, namespace: &str, selector: &str) -> Result<Vec<ManagedObject<P>>>;

    /// Read one object; a missing object is `Ok(None)`
    async fn get(&self, key: &ObjectKey) -> Result<Option<ManagedObject<P>>>;

    /// Create an object
    async fn create(&self, object: &ManagedObject<P>) -> Result<()>;

    /// Replace `current` with `desired`
    ///
    /// The identity and concurrency token come from `current`.
    async fn update(&self, current: &ManagedObject<P>, desired: &ManagedObject<P>) -> Result<()>;

    /// Delete an object
    async fn delete(&self, object: &ManagedObject<P>) -> Result<()>;
}
