//! Metrics instruments for the tenant operator
//!
//! Provides OpenTelemetry metrics for:
//! - Reconciliation passes per resource kind (outcome, duration)
//! - Objects changed by the applier (create, update, delete)
//! - Whole-cluster reconciliations driven by the control loop
//!
//! Exporter wiring belongs to the host process; without one the global meter
//! is a no-op.

use std::time::Instant;

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for tenant operator metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("tenant-operator"));

// ============================================================================
// Pass Metrics
// ============================================================================

/// Counter of finished reconciliation passes
///
/// Labels:
/// - `kind`: resource kind name
/// - `outcome`: done, resource_canceled, reconciliation_canceled, failed
pub static PASS_OUTCOMES: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("tenant_pass_outcomes_total")
        .with_description("Total number of reconciliation passes by outcome")
        .with_unit("{passes}")
        .build()
});

/// Histogram of reconciliation pass duration
///
/// Labels:
/// - `kind`: resource kind name
/// - `outcome`: see [`PASS_OUTCOMES`]
pub static PASS_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("tenant_pass_duration_seconds")
        .with_description("Duration of reconciliation passes in seconds")
        .with_unit("s")
        .build()
});

/// Counter of objects changed by the applier
///
/// Labels:
/// - `kind`: resource kind name
/// - `change`: create, update, delete
pub static OBJECTS_CHANGED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("tenant_objects_changed_total")
        .with_description("Total number of managed objects created, updated or deleted")
        .with_unit("{objects}")
        .build()
});

// ============================================================================
// Control Loop Metrics
// ============================================================================

/// Histogram of whole-cluster reconciliation duration
///
/// Labels:
/// - `result`: success, canceled, error
pub static CLUSTER_RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("tenant_cluster_reconcile_duration_seconds")
        .with_description("Duration of tenant cluster reconciliation in seconds")
        .with_unit("s")
        .build()
});

/// Counter of failed tenant cluster reconciliations
///
/// Labels:
/// - `error_type`: retryable, permanent
pub static CLUSTER_RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("tenant_cluster_reconcile_errors_total")
        .with_description("Total number of failed tenant cluster reconciliations")
        .with_unit("{errors}")
        .build()
});

// ============================================================================
// Helper Types
// ============================================================================

/// Label values for a finished pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassLabel {
    /// Patch applied
    Done,
    /// Skipped for this resource kind only
    ResourceCanceled,
    /// Whole reconciliation aborted
    ReconciliationCanceled,
    /// Hard failure
    Failed,
}

impl PassLabel {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::ResourceCanceled => "resource_canceled",
            Self::ReconciliationCanceled => "reconciliation_canceled",
            Self::Failed => "failed",
        }
    }
}

/// Label values for an applied change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeLabel {
    /// Object created
    Create,
    /// Object replaced
    Update,
    /// Object deleted
    Delete,
}

impl ChangeLabel {
    /// Convert to label value
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Times a single reconciliation pass for one resource kind
pub struct PassTimer {
    kind: String,
    start: Instant,
}

impl PassTimer {
    /// Start timing a pass
    pub fn start(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            start: Instant::now(),
        }
    }

    /// Record the pass outcome and its duration
    pub fn finish(self, outcome: PassLabel) {
        let duration = self.start.elapsed().as_secs_f64();
        let labels = [
            KeyValue::new("kind", self.kind),
            KeyValue::new("outcome", outcome.as_str()),
        ];
        PASS_DURATION.record(duration, &labels);
        PASS_OUTCOMES.add(1, &labels);
    }
}

/// Record objects changed by the applier; zero counts are skipped
pub fn record_changes(kind: &str, change: ChangeLabel, count: usize) {
    if count == 0 {
        return;
    }
    OBJECTS_CHANGED.add(
        count as u64,
        &[
            KeyValue::new("kind", kind.to_string()),
            KeyValue::new("change", change.as_str()),
        ],
    );
}

/// Times one tenant cluster reconciliation in the control loop
pub struct ReconcileTimer {
    start: Instant,
}

impl ReconcileTimer {
    /// Start timing a reconciliation
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn record(&self, result: &'static str) {
        CLUSTER_RECONCILE_DURATION.record(
            self.start.elapsed().as_secs_f64(),
            &[KeyValue::new("result", result)],
        );
    }

    /// Record a completed reconciliation
    pub fn success(self) {
        self.record("success");
    }

    /// Record a reconciliation that ended in cancellation
    pub fn canceled(self) {
        self.record("canceled");
    }

    /// Record a failed reconciliation
    pub fn error(self, retryable: bool) {
        self.record("error");
        let error_type = if retryable { "retryable" } else { "permanent" };
        CLUSTER_RECONCILE_ERRORS.add(1, &[KeyValue::new("error_type", error_type)]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_label_as_str() {
        assert_eq!(PassLabel::Done.as_str(), "done");
        assert_eq!(
            PassLabel::ReconciliationCanceled.as_str(),
            "reconciliation_canceled"
        );
        assert_eq!(PassLabel::Failed.as_str(), "failed");
    }

    #[test]
    fn test_change_label_as_str() {
        assert_eq!(ChangeLabel::Create.as_str(), "create");
        assert_eq!(ChangeLabel::Delete.as_str(), "delete");
    }

    #[test]
    fn test_pass_timer() {
        let timer = PassTimer::start("configmap");
        assert_eq!(timer.kind, "configmap");
        // No exporter installed; recording must not panic
        timer.finish(PassLabel::Done);
        record_changes("configmap", ChangeLabel::Update, 2);
        record_changes("configmap", ChangeLabel::Delete, 0);
    }

    #[test]
    fn test_reconcile_timer() {
        ReconcileTimer::start().success();
        ReconcileTimer::start().canceled();
        ReconcileTimer::start().error(false);
    }
}
