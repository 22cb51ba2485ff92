//! MachineDisruptionBudget custom resource definition.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machine.lifecycle.io",
    version = "v1alpha1",
    kind = "MachineDisruptionBudget",
    namespaced,
    status = "MachineDisruptionBudgetStatus",
    shortname = "mdb",
    printcolumn = r#"{"name":"Expected","type":"integer","jsonPath":".status.expectedMachines"}"#,
    printcolumn = r#"{"name":"Healthy","type":"integer","jsonPath":".status.currentHealthy"}"#,
    printcolumn = r#"{"name":"Allowed","type":"integer","jsonPath":".status.disruptionsAllowed"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineDisruptionBudgetSpec {
    pub selector: LabelSelector,

    /// Exactly one of `min_available`/`max_unavailable` is set (spec.md §3).
    /// Webhook-level enforcement of that invariant is out of scope (spec.md
    /// §1); the reconciler falls back to treating neither-set as "no budget
    /// computed" rather than panicking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_available: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineDisruptionBudgetStatus {
    #[serde(default)]
    pub expected_machines: i32,

    #[serde(default)]
    pub current_healthy: i32,

    #[serde(default)]
    pub desired_healthy: i32,

    #[serde(default)]
    pub disruptions_allowed: i32,

    /// Machine name -> timestamp the controller first observed the
    /// disruption (spec.md §3 "MDB" invariant: each entry's timestamp must be
    /// within the disruption-observation window).
    #[serde(default)]
    pub disrupted_machines: BTreeMap<String, DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
