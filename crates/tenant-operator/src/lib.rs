//! Tenant operator: reconciles tenant cluster sub-resources from TenantCluster resources

#![deny(missing_docs)]

pub mod config;
pub mod controller;

pub use config::{OperatorArgs, OperatorConfig};
pub use controller::{error_policy, reconcile, Context};
