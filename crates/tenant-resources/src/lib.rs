//! Resource kinds reconciled for every tenant cluster
//!
//! Each kind implements [`tenant_reconcile::ResourceKind`] over a
//! [`ClusterSpecification`] and writes through an object store: kube `Api`
//! backed stores for plain objects, a Helm backed store for chart releases.
//! [`resource_set`] binds them in run order.

#![deny(missing_docs)]

pub mod access;
pub mod chart;
pub mod kinds;
pub mod kube_store;
pub mod policy;
pub mod set;
pub mod spec;

pub use access::{CredentialSource, SecretCredentialSource, TenantAccess};
pub use policy::{Capabilities, ProviderPolicy};
pub use set::{resource_set, Stores};
pub use spec::ClusterSpecification;
