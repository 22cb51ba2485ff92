//! Indexer & event mapper (spec.md §4.1).
//!
//! [`NodeIndex`] maintains the single secondary index the spec calls for:
//! `nodeName -> machine`, built from machine events as they stream in
//! (`status.nodeRef` is the only field that matters). Node events are mapped
//! back to the owning MHC keys by looking up the index and then walking the
//! selector match, exactly as §4.1 describes; no other in-memory state is
//! shared across reconciler workers (spec.md §5 "Shared resource policy").

use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use tokio::sync::RwLock;
use tracing::warn;

use crate::crd::{selector_matches, Machine, NamespacedName};
use crate::error::Result;

use super::store::ObjectStore;

/// Identifies one machine by namespace/name, independent of the `Machine`
/// struct so the index doesn't need to clone entire objects.
pub type MachineKey = NamespacedName;

/// The `nodeName -> machine` secondary index (spec.md §4.1).
///
/// Keyed to at most one machine per node in the steady state; if more than
/// one machine's `status.nodeRef` names the same node (a transient
/// misconfiguration, never supposed to persist) the index records the
/// conflict and `lookup_unique` drops the event rather than guessing.
#[derive(Default)]
pub struct NodeIndex {
    by_node: RwLock<HashMap<String, HashSet<MachineKey>>>,
}

impl NodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `machine` currently points at `node_name` (or stop
    /// indexing it anywhere, if `node_name` is `None`) — called whenever the
    /// watch stream delivers a machine add/update/delete.
    pub async fn reindex_machine(&self, machine_key: &MachineKey, node_name: Option<&str>) {
        let mut guard = self.by_node.write().await;
        for entries in guard.values_mut() {
            entries.remove(machine_key);
        }
        guard.retain(|_, entries| !entries.is_empty());
        if let Some(node_name) = node_name {
            guard
                .entry(node_name.to_string())
                .or_default()
                .insert(machine_key.clone());
        }
    }

    pub async fn remove_machine(&self, machine_key: &MachineKey) {
        self.reindex_machine(machine_key, None).await;
    }

    /// Reindex directly from a `Machine` object's `status.nodeRef`.
    pub async fn reindex(&self, machine: &Machine) {
        let key = MachineKey::new(
            machine.namespace().unwrap_or_default(),
            machine.name_any(),
        );
        let node_name = machine
            .status
            .as_ref()
            .and_then(|s| s.node_ref.as_ref())
            .map(|r| r.name.as_str());
        self.reindex_machine(&key, node_name).await;
    }

    /// Look up the unique machine indexed at `node_name`. Zero or multiple
    /// hits log a warning and return `None` (spec.md §4.1 "if zero or
    /// multiple, log and drop the event").
    pub async fn lookup_unique(&self, node_name: &str) -> Option<MachineKey> {
        let guard = self.by_node.read().await;
        match guard.get(node_name).map(|s| s.len()) {
            None | Some(0) => None,
            Some(1) => guard
                .get(node_name)
                .and_then(|s| s.iter().next())
                .cloned(),
            Some(n) => {
                warn!(node = node_name, count = n, "node indexed by multiple machines, dropping event");
                None
            }
        }
    }
}

/// Map an incoming machine event into the MHC keys whose selector matches
/// its labels (spec.md §4.1). A selector that is nil or empty after parsing
/// never matches (spec.md §3).
pub async fn map_machine_event<S: ObjectStore>(
    store: &S,
    machine: &Machine,
) -> Result<Vec<NamespacedName>> {
    let namespace = machine.namespace().unwrap_or_default();
    let labels = machine.labels().clone();
    let mhcs = store.list_mhcs(Some(&namespace)).await?;
    Ok(mhcs
        .into_iter()
        .filter(|mhc| selector_matches(&mhc.spec.selector, &labels))
        .map(|mhc| NamespacedName::new(mhc.namespace().unwrap_or_default(), mhc.name_any()))
        .collect())
}

/// Map an incoming node event into MHC keys via the node-name index + the
/// same selector match (spec.md §4.1).
pub async fn map_node_event<S: ObjectStore>(
    store: &S,
    index: &NodeIndex,
    node: &Node,
) -> Result<Vec<NamespacedName>> {
    let node_name = node.name_any();
    let Some(machine_key) = index.lookup_unique(&node_name).await else {
        return Ok(Vec::new());
    };
    match store
        .get_machine(&machine_key.namespace, &machine_key.name)
        .await?
    {
        Some(machine) => map_machine_event(store, &machine).await,
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_index_returns_none() {
        let index = NodeIndex::new();
        assert_eq!(index.lookup_unique("node-a").await, None);
    }

    #[tokio::test]
    async fn single_machine_is_found() {
        let index = NodeIndex::new();
        let key = MachineKey::new("default", "m1");
        index.reindex_machine(&key, Some("node-a")).await;
        assert_eq!(index.lookup_unique("node-a").await, Some(key));
    }

    #[tokio::test]
    async fn duplicate_claim_drops_the_event() {
        let index = NodeIndex::new();
        index
            .reindex_machine(&MachineKey::new("default", "m1"), Some("node-a"))
            .await;
        index
            .reindex_machine(&MachineKey::new("default", "m2"), Some("node-a"))
            .await;
        assert_eq!(index.lookup_unique("node-a").await, None);
    }

    #[tokio::test]
    async fn reindexing_to_a_new_node_clears_the_old_entry() {
        let index = NodeIndex::new();
        let key = MachineKey::new("default", "m1");
        index.reindex_machine(&key, Some("node-a")).await;
        index.reindex_machine(&key, Some("node-b")).await;
        assert_eq!(index.lookup_unique("node-a").await, None);
        assert_eq!(index.lookup_unique("node-b").await, Some(key));
    }

    #[tokio::test]
    async fn removing_a_machine_clears_its_entry() {
        let index = NodeIndex::new();
        let key = MachineKey::new("default", "m1");
        index.reindex_machine(&key, Some("node-a")).await;
        index.remove_machine(&key).await;
        assert_eq!(index.lookup_unique("node-a").await, None);
    }
}
