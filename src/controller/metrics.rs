//! Prometheus metrics for the machine lifecycle controller core.
//!
//! # Exported metrics
//! The `/metrics` endpoint (feature `metrics`, default-on) exports:
//! - `machine_lifecycle_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `machine_lifecycle_reconcile_errors_total` (counter): reconcile errors labeled by controller and error kind.
//! - `machine_lifecycle_mhc_expected_machines` / `_current_healthy` (gauge): last-patched MHC status, per namespace/name.
//! - `machine_lifecycle_mdb_expected_machines` / `_current_healthy` / `_disruptions_allowed` (gauge): last-patched MDB status.
//! - `machine_lifecycle_remediations_total` (counter): remediator outcomes labeled by namespace/name/outcome.

use std::sync::atomic::{AtomicI64, AtomicU64};
use std::time::Duration;

use once_cell::sync::Lazy;
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

use super::remediation::RemediationOutcome;

/// Labels for reconcile-duration/error metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// "mhc" or "mdb".
    pub controller: String,
}

/// Labels for reconcile-error metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// [`crate::error::Error::metric_kind`].
    pub kind: String,
}

/// Labels for the per-policy-object status gauges.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PolicyLabels {
    pub namespace: String,
    pub name: String,
}

/// Labels for the remediation-outcome counter.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RemediationLabels {
    pub namespace: String,
    pub name: String,
    pub outcome: String,
}

/// Histogram tracking reconcile duration (seconds), one bucket set per controller.
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets; reconciles are in-memory plus a
        // handful of object-store round trips, never long-running.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }
    Family::new_with_constructor(reconcile_histogram)
});

/// Counter tracking reconcile errors.
pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Gauge tracking the last-patched `status.expectedMachines` per MHC.
pub static MHC_EXPECTED_MACHINES: Lazy<Family<PolicyLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Gauge tracking the last-patched `status.currentHealthy` per MHC.
pub static MHC_CURRENT_HEALTHY: Lazy<Family<PolicyLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Gauge tracking the last-patched `status.expectedMachines` per MDB.
pub static MDB_EXPECTED_MACHINES: Lazy<Family<PolicyLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Gauge tracking the last-patched `status.currentHealthy` per MDB.
pub static MDB_CURRENT_HEALTHY: Lazy<Family<PolicyLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Gauge tracking the last-patched `status.disruptionsAllowed` per MDB.
pub static MDB_DISRUPTIONS_ALLOWED: Lazy<Family<PolicyLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

/// Counter tracking remediator outcomes (spec.md §4.4): `deleted`, `rebooted`,
/// `skipped_orphan`, `skipped_master`.
pub static REMEDIATIONS_TOTAL: Lazy<Family<RemediationLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

/// Global metrics registry, served at `/metrics` by [`encode_registry`].
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "machine_lifecycle_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "machine_lifecycle_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "machine_lifecycle_mhc_expected_machines",
        "Last-patched MachineHealthCheck status.expectedMachines",
        MHC_EXPECTED_MACHINES.clone(),
    );
    registry.register(
        "machine_lifecycle_mhc_current_healthy",
        "Last-patched MachineHealthCheck status.currentHealthy",
        MHC_CURRENT_HEALTHY.clone(),
    );
    registry.register(
        "machine_lifecycle_mdb_expected_machines",
        "Last-patched MachineDisruptionBudget status.expectedMachines",
        MDB_EXPECTED_MACHINES.clone(),
    );
    registry.register(
        "machine_lifecycle_mdb_current_healthy",
        "Last-patched MachineDisruptionBudget status.currentHealthy",
        MDB_CURRENT_HEALTHY.clone(),
    );
    registry.register(
        "machine_lifecycle_mdb_disruptions_allowed",
        "Last-patched MachineDisruptionBudget status.disruptionsAllowed",
        MDB_DISRUPTIONS_ALLOWED.clone(),
    );
    registry.register(
        "machine_lifecycle_remediations_total",
        "Total number of remediator outcomes, by kind",
        REMEDIATIONS_TOTAL.clone(),
    );

    registry
});

pub fn observe_reconcile_duration(controller: &str, duration: Duration) {
    RECONCILE_DURATION_SECONDS
        .get_or_create(&ReconcileLabels {
            controller: controller.to_string(),
        })
        .observe(duration.as_secs_f64());
}

pub fn inc_reconcile_error(controller: &str, kind: &str) {
    RECONCILE_ERRORS_TOTAL
        .get_or_create(&ErrorLabels {
            controller: controller.to_string(),
            kind: kind.to_string(),
        })
        .inc();
}

pub fn set_mhc_status_gauges(namespace: &str, name: &str, expected: i32, healthy: i32) {
    let labels = PolicyLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    };
    MHC_EXPECTED_MACHINES
        .get_or_create(&labels)
        .set(expected as i64);
    MHC_CURRENT_HEALTHY.get_or_create(&labels).set(healthy as i64);
}

pub fn set_mdb_status_gauges(
    namespace: &str,
    name: &str,
    expected: i32,
    healthy: i32,
    disruptions_allowed: i32,
) {
    let labels = PolicyLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
    };
    MDB_EXPECTED_MACHINES
        .get_or_create(&labels)
        .set(expected as i64);
    MDB_CURRENT_HEALTHY.get_or_create(&labels).set(healthy as i64);
    MDB_DISRUPTIONS_ALLOWED
        .get_or_create(&labels)
        .set(disruptions_allowed as i64);
}

pub fn inc_remediation(namespace: &str, name: &str, outcome: RemediationOutcome) {
    let outcome = match outcome {
        RemediationOutcome::SkippedOrphan => "skipped_orphan",
        RemediationOutcome::Rebooted => "rebooted",
        RemediationOutcome::SkippedMaster => "skipped_master",
        RemediationOutcome::Deleted => "deleted",
    };
    REMEDIATIONS_TOTAL
        .get_or_create(&RemediationLabels {
            namespace: namespace.to_string(),
            name: name.to_string(),
            outcome: outcome.to_string(),
        })
        .inc();
}

/// Render the registry in Prometheus text exposition format for the
/// `/metrics` HTTP handler.
pub fn encode_registry() -> String {
    let mut buffer = String::new();
    encode(&mut buffer, &REGISTRY).expect("prometheus text encoding is infallible for this registry");
    buffer
}
