//! Target assembler (spec.md §4.2).
//!
//! Expands an MHC's selector into the `(mhc, machine, node)` triples the
//! health evaluator and remediator operate on. Target count always equals
//! selected-machine count — this module never filters.

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::crd::{Machine, MachineHealthCheck, NodeRef};
use crate::error::Result;

use super::store::ObjectStore;

/// A derived `(mhc, machine, node)` triple (spec.md §3 "Target").
///
/// `node` is `None` when the machine has no `status.nodeRef` yet, and a
/// zero-uid placeholder when the referenced node could not be found — the
/// zero-uid sentinel the health evaluator treats as "node deleted"
/// (spec.md §4.3).
#[derive(Clone, Debug)]
pub struct Target {
    pub machine: Machine,
    pub node: Option<Node>,
}

impl Target {
    /// The node-ref recorded on the machine, if any — used by the health
    /// evaluator to distinguish "never observed a node" from "observed a
    /// node that's since vanished" even when `node` itself is `None`.
    pub fn node_ref(&self) -> Option<&NodeRef> {
        self.machine
            .status
            .as_ref()
            .and_then(|s| s.node_ref.as_ref())
    }
}

/// Assemble targets for one MHC (spec.md §4.2).
///
/// Parsing the selector cannot fail here — `LabelSelector` is already a
/// parsed structure by the time it reaches this crate (the `Parse` error
/// kind is reserved for `spec.unhealthyConditions[*].timeout`, evaluated
/// later per target). An empty machine list yields an empty target list,
/// not an error.
pub async fn assemble_targets<S: ObjectStore>(
    store: &S,
    mhc: &MachineHealthCheck,
) -> Result<Vec<Target>> {
    let namespace = mhc.namespace().unwrap_or_default();
    let machines = store.list_machines(&namespace, &mhc.spec.selector).await?;

    let mut targets = Vec::with_capacity(machines.len());
    for machine in machines {
        let node_ref = machine
            .status
            .as_ref()
            .and_then(|s| s.node_ref.as_ref())
            .cloned();

        let node = match node_ref {
            None => None,
            Some(node_ref) => match store.get_node(&node_ref.name).await? {
                Some(node) => Some(node),
                None => Some(placeholder_node(&node_ref.name)),
            },
        };

        targets.push(Target { machine, node });
    }

    Ok(targets)
}

/// A node that was looked up and not found: the zero-uid sentinel
/// (spec.md §4.2 step 3, §4.3).
fn placeholder_node(name: &str) -> Node {
    Node {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            uid: Some(String::new()),
            ..Default::default()
        },
        ..Default::default()
    }
}
