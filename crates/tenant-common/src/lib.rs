//! Common types for the tenant operator: CRDs, errors, ownership labels and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod labels;
pub mod metrics;
pub mod retry;
pub mod telemetry;

pub use error::{ApiErrorKind, Error};
pub use labels::OwnerConfig;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace in the tenant cluster that holds operator-managed system objects
pub const TENANT_SYSTEM_NAMESPACE: &str = "tenant-system";

/// Tenant cluster namespace that receives most chart values
pub const KUBE_SYSTEM_NAMESPACE: &str = "kube-system";
