//! Ownership-graph walk for the MDB expected-count computation (spec.md §3
//! "Ownership graph", §4.6 step 3) and the remediator's orphan-delete guard
//! (spec.md §4.4 step 1).
//!
//! The walk is bounded to two hops and expressed as a closed sum type rather
//! than runtime type reflection (spec.md §9 REDESIGN FLAGS).

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use crate::crd::{Machine, MachineSet, MACHINE_DEPLOYMENT_KIND, MACHINE_SET_KIND};

/// Which of the recognized controller-owner kinds (if any) a machine has.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OwnerKind {
    /// No controller-owner: the machine counts for exactly itself.
    Bare,
    /// Controller-owned by a replica-set-like object (spec.md §3).
    ReplicaSetOwned { name: String },
}

/// Find the controller-owner reference of the given `kind`, honoring the
/// `controller` flag (spec.md §3: owner references each bear
/// `{kind, uid, controller-flag}`).
pub fn controller_owner_ref<'a>(
    owner_references: &'a [OwnerReference],
    kind: &str,
) -> Option<&'a OwnerReference> {
    owner_references
        .iter()
        .find(|o| o.kind == kind && o.controller.unwrap_or(false))
}

/// Classify a machine's ownership (spec.md §4.4 step 1 / §4.6 step 3, first hop).
pub fn classify_owner(machine: &Machine) -> OwnerKind {
    let refs = machine
        .metadata
        .owner_references
        .as_deref()
        .unwrap_or(&[]);
    match controller_owner_ref(refs, MACHINE_SET_KIND) {
        Some(owner) => OwnerKind::ReplicaSetOwned {
            name: owner.name.clone(),
        },
        None => OwnerKind::Bare,
    }
}

/// The deployment-like grandparent of a replica-set-like object, if any
/// (second hop of the two-hop walk, spec.md §4.6 step 3).
pub fn deployment_owner_name(machine_set: &MachineSet) -> Option<String> {
    let refs = machine_set
        .metadata
        .owner_references
        .as_deref()
        .unwrap_or(&[]);
    controller_owner_ref(refs, MACHINE_DEPLOYMENT_KIND).map(|o| o.name.clone())
}
