//! Shared types used across the Machine/MHC/MDB CRDs and the controller logic.
//!
//! - [`Condition`] — standard Kubernetes-style status condition, shared by all
//!   four CRDs.
//! - [`NodeRef`] / [`OwnerApiRef`] — lightweight cross-references into other
//!   API objects, mirroring `corev1.ObjectReference` without pulling in its
//!   full (mostly unused) field set.
//! - [`selector_matches`] / [`selector_is_empty`] / [`to_list_params`] — the
//!   label-selector semantics shared by the index mapper and the target
//!   assembler.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ListParams;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Standard condition types used on MHC/MDB/Machine status.
pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_REMEDIATION_ALLOWED: &str = "RemediationAllowed";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";
pub const CONDITION_STATUS_UNKNOWN: &str = "Unknown";

/// A Kubernetes-style status condition.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    pub last_transition_time: String,
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(type_: &str, status: &str, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }
}

/// Reference to the Node backing a Machine (spec.md §3 "Node").
///
/// `uid` is the empty string for the zero-uid sentinel: the machine's
/// `nodeRef` points at a node that no longer exists (spec.md §4.3).
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    pub name: String,
    #[serde(default)]
    pub uid: String,
}

impl NodeRef {
    /// A placeholder reference for a node that was looked up and not found.
    pub fn placeholder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: String::new(),
        }
    }

    /// True for the zero-uid sentinel: the node the machine refers to is gone.
    pub fn is_zero_uid(&self) -> bool {
        self.uid.is_empty()
    }
}

/// A namespace/name pair identifying one API object — the unit the
/// scheduler shell's work queue dedupes and retries on (spec.md §4.7).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// True when a selector, once parsed, matches nothing: nil, or present but with
/// no match-labels and no match-expressions (spec.md §3 "MHC" invariants).
pub fn selector_is_empty(selector: &LabelSelector) -> bool {
    let no_labels = selector
        .match_labels
        .as_ref()
        .map(|m| m.is_empty())
        .unwrap_or(true);
    let no_expressions = selector
        .match_expressions
        .as_ref()
        .map(|e| e.is_empty())
        .unwrap_or(true);
    no_labels && no_expressions
}

/// Evaluate a `LabelSelector` against a label map, honoring the "empty selector
/// matches nothing" rule from spec.md §3.
pub fn selector_matches(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    if selector_is_empty(selector) {
        return false;
    }

    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let matches = match expr.operator.as_str() {
                "In" => expr
                    .values
                    .as_ref()
                    .map(|vs| labels.get(&expr.key).is_some_and(|v| vs.contains(v)))
                    .unwrap_or(false),
                "NotIn" => expr
                    .values
                    .as_ref()
                    .map(|vs| !labels.get(&expr.key).is_some_and(|v| vs.contains(v)))
                    .unwrap_or(true),
                "Exists" => labels.contains_key(&expr.key),
                "DoesNotExist" => !labels.contains_key(&expr.key),
                _ => false,
            };
            if !matches {
                return false;
            }
        }
    }

    true
}

/// Translate a `LabelSelector` into `kube::api::ListParams` for a server-side
/// list, so common selectors (match-labels, `In`/`NotIn`/`Exists`/`DoesNotExist`)
/// are filtered by the API server instead of client-side. Callers still apply
/// [`selector_matches`] afterward since some selector shapes (empty-matches-nothing)
/// can't be expressed as a label-selector query string.
pub fn to_list_params(selector: &LabelSelector) -> ListParams {
    if selector_is_empty(selector) {
        // An empty selector matches nothing; a selector string that can never
        // match avoids an accidental full-namespace list.
        return ListParams::default().labels("machine.lifecycle.io/never-matches=true");
    }

    let mut clauses: Vec<String> = Vec::new();

    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            clauses.push(format!("{k}={v}"));
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            match expr.operator.as_str() {
                "In" => {
                    if let Some(values) = &expr.values {
                        clauses.push(format!("{} in ({})", expr.key, values.join(",")));
                    }
                }
                "NotIn" => {
                    if let Some(values) = &expr.values {
                        clauses.push(format!("{} notin ({})", expr.key, values.join(",")));
                    }
                }
                "Exists" => clauses.push(expr.key.clone()),
                "DoesNotExist" => clauses.push(format!("!{}", expr.key)),
                _ => {}
            }
        }
    }

    ListParams::default().labels(&clauses.join(","))
}
