//! Remediator (spec.md §4.4): decides delete-vs-reboot-vs-skip for one
//! needs-remediation target and applies the side effect through the store.

use kube::ResourceExt;
use tracing::{info, warn};

use crate::crd::{
    MachineHealthCheck, MASTER_ROLE_LABEL, REMEDIATION_STRATEGY_ANNOTATION,
    REMEDIATION_STRATEGY_REBOOT,
};
use crate::error::Result;

use super::owners::{classify_owner, OwnerKind};
use super::store::ObjectStore;
use super::targets::Target;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemediationOutcome {
    /// No controller-owner of the replica-set-like kind: deleting would
    /// orphan the slot rather than trigger a replacement (spec.md §4.4 step 1).
    SkippedOrphan,
    /// MHC carries `remediation-strategy=reboot`: annotated the node (or
    /// found it already annotated) instead of deleting the machine.
    Rebooted,
    /// Master-role label present on the node or the machine: never
    /// auto-remediate control-plane machines (spec.md §4.4 step 3).
    SkippedMaster,
    /// The machine object was deleted; its owner will replace it.
    Deleted,
}

/// Apply the remediator's decision tree to one target (spec.md §4.4).
pub async fn remediate<S: ObjectStore>(
    store: &S,
    mhc: &MachineHealthCheck,
    target: &Target,
) -> Result<RemediationOutcome> {
    let machine = &target.machine;
    let machine_name = machine.name_any();
    let namespace = machine.namespace().unwrap_or_default();

    if matches!(classify_owner(machine), OwnerKind::Bare) {
        warn!(namespace = %namespace, machine = %machine_name, "machine has no replica-set-like owner, skipping remediation");
        return Ok(RemediationOutcome::SkippedOrphan);
    }

    if mhc
        .annotations()
        .get(REMEDIATION_STRATEGY_ANNOTATION)
        .map(String::as_str)
        == Some(REMEDIATION_STRATEGY_REBOOT)
    {
        let Some(node) = &target.node else {
            // Nothing to annotate; fall through to the ordinary skip/delete
            // path would re-delete an orphan machine with no node, which
            // the reboot strategy exists specifically to avoid. Log and
            // leave the target for the next reconcile once a node appears.
            warn!(namespace = %namespace, machine = %machine_name, "reboot strategy requested but no node observed, deferring");
            return Ok(RemediationOutcome::SkippedOrphan);
        };
        let node_name = node.name_any();
        let already_annotated = store
            .get_node(&node_name)
            .await?
            .map(|n| n.annotations().contains_key(super::store::REBOOT_ANNOTATION))
            .unwrap_or(false);
        if !already_annotated {
            store.apply_reboot_annotation(&node_name).await?;
            info!(node = %node_name, machine = %machine_name, "applied reboot annotation");
        }
        return Ok(RemediationOutcome::Rebooted);
    }

    if is_master(target) {
        warn!(namespace = %namespace, machine = %machine_name, "master-labeled target, skipping remediation");
        return Ok(RemediationOutcome::SkippedMaster);
    }

    store.delete_machine(&namespace, &machine_name).await?;
    info!(namespace = %namespace, machine = %machine_name, "deleted machine for remediation");
    Ok(RemediationOutcome::Deleted)
}

fn is_master(target: &Target) -> bool {
    let node_is_master = target
        .node
        .as_ref()
        .map(|n| n.labels().contains_key(MASTER_ROLE_LABEL))
        .unwrap_or(false);
    let machine_is_master = target.machine.labels().contains_key(MASTER_ROLE_LABEL);
    node_is_master || machine_is_master
}
