//! Controller core: indexing, target assembly, health evaluation,
//! remediation, the two reconcilers, and the scheduler shell they run on
//! (spec.md §4).

pub mod conditions;
pub mod events;
pub mod health;
pub mod index;
pub mod mdb_reconciler;
#[cfg(feature = "metrics")]
pub mod metrics;
#[cfg(feature = "metrics")]
pub mod metrics_server;
pub mod mhc_reconciler;
pub mod owners;
pub mod remediation;
pub mod scheduler;
pub mod store;
pub mod targets;

pub use health::{evaluate, Evaluation, Verdict};
pub use index::NodeIndex;
pub use mdb_reconciler::{reconcile_mdb, run_mdb_controller, DEFAULT_DISRUPTION_WINDOW};
pub use mhc_reconciler::{reconcile_mhc, run_mhc_controller};
#[cfg(feature = "metrics")]
pub use metrics_server::run_metrics_server;
pub use remediation::{remediate, RemediationOutcome};
pub use scheduler::{ReconcileOutcome, Scheduler};
pub use store::{FakeObjectStore, KubeObjectStore, ObjectStore};
pub use targets::{assemble_targets, Target};
