//! Cooperative cancellation of a reconciliation pass
//!
//! Soft failures (the tenant cluster is not reachable yet, the specification
//! is being torn down) are not errors. The step that detects one raises a
//! [`Cancellation`] on the pass's [`CancellationSignal`]; every later step
//! checks the signal and does nothing once it is set.

use std::fmt;

use tracing::debug;

/// State of a cancellation signal
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Cancellation {
    /// Nothing canceled
    #[default]
    None,
    /// Skip the remaining steps of this resource kind; other kinds still run
    ResourceCanceled,
    /// Abort the whole reconciliation of this tenant cluster
    ReconciliationCanceled,
}

impl fmt::Display for Cancellation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cancellation::None => f.write_str("none"),
            Cancellation::ResourceCanceled => f.write_str("resource canceled"),
            Cancellation::ReconciliationCanceled => f.write_str("reconciliation canceled"),
        }
    }
}

/// Set-once cancellation flag owned by one pass
///
/// Passed down as `&mut`, so it can never be shared between passes.
#[derive(Debug, Default)]
pub struct CancellationSignal {
    state: Cancellation,
}

impl CancellationSignal {
    /// Fresh, unset signal
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signal unless it is already set
    ///
    /// Returns whether this call set it. The first raised value wins.
    pub fn raise(&mut self, cancellation: Cancellation) -> bool {
        if cancellation == Cancellation::None || self.is_canceled() {
            return false;
        }
        debug!(cancellation = %cancellation, "Cancellation raised");
        self.state = cancellation;
        true
    }

    /// Skip the rest of this resource kind
    pub fn cancel_resource(&mut self) -> bool {
        self.raise(Cancellation::ResourceCanceled)
    }

    /// Abort the whole reconciliation
    pub fn cancel_reconciliation(&mut self) -> bool {
        self.raise(Cancellation::ReconciliationCanceled)
    }

    /// Current state
    pub fn state(&self) -> Cancellation {
        self.state
    }

    /// Whether any cancellation has been raised
    pub fn is_canceled(&self) -> bool {
        self.state != Cancellation::None
    }
}
