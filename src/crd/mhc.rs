//! MachineHealthCheck custom resource definition.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{IntOrString, LabelSelector};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// One clause of `spec.unhealthyConditions` (spec.md §3 "MHC").
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UnhealthyCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    /// Free-form human duration string (e.g. `"300s"`, `"5m"`); parsed once
    /// per clause per reconcile (spec.md §9).
    pub timeout: String,
}

/// Value of the `remediation-strategy` annotation that switches the
/// remediator from deletion to node-reboot (spec.md §4.4 step 2).
pub const REMEDIATION_STRATEGY_ANNOTATION: &str = "machine.lifecycle.io/remediation-strategy";
pub const REMEDIATION_STRATEGY_REBOOT: &str = "reboot";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "machine.lifecycle.io",
    version = "v1alpha1",
    kind = "MachineHealthCheck",
    namespaced,
    status = "MachineHealthCheckStatus",
    shortname = "mhc",
    printcolumn = r#"{"name":"Expected","type":"integer","jsonPath":".status.expectedMachines"}"#,
    printcolumn = r#"{"name":"Healthy","type":"integer","jsonPath":".status.currentHealthy"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MachineHealthCheckSpec {
    pub selector: LabelSelector,

    #[serde(default)]
    pub unhealthy_conditions: Vec<UnhealthyCondition>,

    /// Integer or percentage-string budget of simultaneously-unhealthy
    /// machines (spec.md §3). `None` means the budget gate is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<serde_json::Value>")]
    pub max_unhealthy: Option<IntOrString>,

    /// Override of the default node-appear timeout (spec.md §6
    /// `nodeAppearTimeout`), as a free-form human duration string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_startup_timeout: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineHealthCheckStatus {
    #[serde(default)]
    pub expected_machines: i32,

    #[serde(default)]
    pub current_healthy: i32,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}
