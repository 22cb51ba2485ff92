//! MachineSet / MachineDeployment — the "replica-set-like" and
//! "deployment-like" owners the MDB reconciler's expected-count walk reads
//! (spec.md §3 "Ownership graph", §4.6 step 3).
//!
//! Neither is mutated by this core: they are created and scaled by the
//! owning operator surface that is out of scope per spec.md §1. Only the
//! fields the two-hop owner walk needs are modeled — a deliberately thin
//! read-only view, not a full reimplementation of that surface.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Owner-reference kind string for a replica-set-like object (spec.md §3,
/// §4.4 step 1, §4.6 step 3).
pub const MACHINE_SET_KIND: &str = "MachineSet";

/// Owner-reference kind string for a deployment-like object (spec.md §3,
/// §4.6 step 3).
pub const MACHINE_DEPLOYMENT_KIND: &str = "MachineDeployment";

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machine.lifecycle.io",
    version = "v1alpha1",
    kind = "MachineSet",
    namespaced,
    shortname = "ms",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    #[serde(default)]
    pub replicas: i32,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machine.lifecycle.io",
    version = "v1alpha1",
    kind = "MachineDeployment",
    namespaced,
    shortname = "md",
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDeploymentSpec {
    #[serde(default)]
    pub replicas: i32,
}
