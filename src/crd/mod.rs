//! Custom Resource Definitions for the machine lifecycle operator.
//!
//! Four CRDs in the `machine.lifecycle.io/v1alpha1` group: [`Machine`], the
//! two policy objects [`MachineHealthCheck`] and [`MachineDisruptionBudget`],
//! and the thin read-only [`MachineSet`]/[`MachineDeployment`] views the MDB
//! reconciler's owner walk needs (spec.md §3 "Ownership graph").

mod machine;
mod machine_set;
mod mdb;
mod mhc;
pub mod types;

pub use machine::{Machine, MachineSpec, MachineStatus, MASTER_ROLE_LABEL, PHASE_FAILED};
pub use machine_set::{
    MachineDeployment, MachineDeploymentSpec, MachineSet, MachineSetSpec,
    MACHINE_DEPLOYMENT_KIND, MACHINE_SET_KIND,
};
pub use mdb::{MachineDisruptionBudget, MachineDisruptionBudgetSpec, MachineDisruptionBudgetStatus};
pub use mhc::{
    MachineHealthCheck, MachineHealthCheckSpec, MachineHealthCheckStatus, UnhealthyCondition,
    REMEDIATION_STRATEGY_ANNOTATION, REMEDIATION_STRATEGY_REBOOT,
};
pub use types::*;
