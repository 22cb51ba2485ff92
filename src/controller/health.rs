//! Health evaluator (spec.md §4.3): a pure function from a [`Target`] plus
//! the current time to a verdict and an optional next-check delay.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use crate::crd::{UnhealthyCondition, PHASE_FAILED};
use crate::error::{Error, Result};

use super::targets::Target;

/// Default `nodeAppearTimeout` (spec.md §6): how long a machine may exist
/// without a node before being declared unhealthy.
pub const DEFAULT_NODE_APPEAR_TIMEOUT: StdDuration = StdDuration::from_secs(600);

/// One second of slack added to every "wait" requeue so the reconcile fires
/// just *after* the anticipated transition, never exactly on it (spec.md
/// §4.3, every "+1s" in the clause list).
const REQUEUE_SLACK: StdDuration = StdDuration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// No unhealthy-condition fired and the node/machine state is settled;
    /// counts toward `currentHealthy` iff the machine isn't being deleted
    /// (spec.md §4.3 "A target with verdict healthy-or-pending...").
    HealthyOrPending,
    /// A clause fired, the node appear timeout elapsed, the node vanished,
    /// or the machine reports `phase == "Failed"`.
    NeedsRemediation,
    /// Not yet decidable; recheck after `next_check`.
    Wait,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    /// When to recheck this target, if at all. `None` when the verdict is
    /// final for this reconcile (`NeedsRemediation`, or `HealthyOrPending`
    /// with no unhealthy clause pending).
    pub next_check: Option<StdDuration>,
}

/// Parse every distinct `timeout` string in `conditions` once, memoized by
/// value for the lifetime of one reconcile (spec.md §9 "Duration parsing").
pub fn parse_unhealthy_condition_timeouts(
    conditions: &[UnhealthyCondition],
) -> Result<HashMap<String, StdDuration>> {
    let mut cache = HashMap::new();
    for clause in conditions {
        if cache.contains_key(&clause.timeout) {
            continue;
        }
        let parsed = humantime::parse_duration(&clause.timeout)
            .map_err(|e| Error::Parse(format!("invalid unhealthyConditions timeout {:?}: {e}", clause.timeout)))?;
        cache.insert(clause.timeout.clone(), parsed);
    }
    Ok(cache)
}

/// Evaluate one target (spec.md §4.3). `condition_timeouts` must already
/// contain every `timeout` string appearing in `unhealthy_conditions`
/// (build it once per reconcile with [`parse_unhealthy_condition_timeouts`]).
pub fn evaluate(
    target: &Target,
    unhealthy_conditions: &[UnhealthyCondition],
    condition_timeouts: &HashMap<String, StdDuration>,
    node_appear_timeout: StdDuration,
    now: DateTime<Utc>,
) -> Result<Evaluation> {
    let machine = &target.machine;

    if machine.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(PHASE_FAILED) {
        return Ok(Evaluation {
            verdict: Verdict::NeedsRemediation,
            next_check: None,
        });
    }

    let Some(node) = &target.node else {
        return evaluate_node_not_yet_observed(target, node_appear_timeout, now);
    };

    if node.metadata.uid.as_deref() == Some("") {
        // The zero-uid sentinel: the machine had a nodeRef but the node is gone.
        return Ok(Evaluation {
            verdict: Verdict::NeedsRemediation,
            next_check: None,
        });
    }

    let conditions = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut wait_candidates: Vec<StdDuration> = Vec::new();

    for clause in unhealthy_conditions {
        let Some(condition) = conditions.iter().find(|c| c.type_ == clause.type_) else {
            continue;
        };
        if condition.status != clause.status {
            continue;
        }
        let timeout = *condition_timeouts
            .get(&clause.timeout)
            .ok_or_else(|| Error::Parse(format!("unparsed timeout {:?}", clause.timeout)))?;

        let transition = condition.last_transition_time.0;
        let elapsed = (now - transition).max(chrono::Duration::zero());
        let timeout_chrono =
            chrono::Duration::from_std(timeout).map_err(|e| Error::Parse(e.to_string()))?;

        if elapsed >= timeout_chrono {
            return Ok(Evaluation {
                verdict: Verdict::NeedsRemediation,
                next_check: None,
            });
        }

        let remaining = (timeout_chrono - elapsed)
            .to_std()
            .unwrap_or(StdDuration::ZERO)
            + REQUEUE_SLACK;
        wait_candidates.push(remaining);
    }

    Ok(Evaluation {
        verdict: Verdict::HealthyOrPending,
        next_check: wait_candidates.into_iter().min(),
    })
}

fn evaluate_node_not_yet_observed(
    target: &Target,
    node_appear_timeout: StdDuration,
    now: DateTime<Utc>,
) -> Result<Evaluation> {
    let last_updated = target
        .machine
        .status
        .as_ref()
        .and_then(|s| s.last_updated.as_ref());

    let Some(last_updated) = last_updated else {
        return Ok(Evaluation {
            verdict: Verdict::Wait,
            next_check: Some(node_appear_timeout),
        });
    };

    let elapsed = (now - last_updated.0).max(chrono::Duration::zero());
    let timeout_chrono = chrono::Duration::from_std(node_appear_timeout)
        .map_err(|e| Error::Parse(e.to_string()))?;

    if elapsed >= timeout_chrono {
        Ok(Evaluation {
            verdict: Verdict::NeedsRemediation,
            next_check: None,
        })
    } else {
        let remaining = (timeout_chrono - elapsed)
            .to_std()
            .unwrap_or(StdDuration::ZERO)
            + REQUEUE_SLACK;
        Ok(Evaluation {
            verdict: Verdict::Wait,
            next_check: Some(remaining),
        })
    }
}

/// A target counts toward `currentHealthy` iff it isn't being deleted and
/// its verdict is `HealthyOrPending` (spec.md §4.3, §8 invariant).
pub fn counts_healthy(target: &Target, evaluation: &Evaluation) -> bool {
    target.machine.metadata.deletion_timestamp.is_none()
        && evaluation.verdict == Verdict::HealthyOrPending
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::api::ObjectMeta;

    use crate::crd::{Machine, MachineStatus, NodeRef};

    use super::*;

    fn machine(phase: Option<&str>, node_ref: Option<NodeRef>, last_updated: Option<DateTime<Utc>>) -> Machine {
        Machine {
            metadata: ObjectMeta {
                name: Some("m1".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec: Default::default(),
            status: Some(MachineStatus {
                node_ref,
                phase: phase.map(str::to_string),
                last_updated: last_updated.map(Time),
            }),
        }
    }

    fn node_with_condition(uid: &str, cond_type: &str, status: &str, transition: DateTime<Utc>) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some("node-a".into()),
                uid: Some(uid.into()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: cond_type.to_string(),
                    status: status.to_string(),
                    last_transition_time: Some(Time(transition)),
                    last_heartbeat_time: None,
                    message: None,
                    reason: None,
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn clause(type_: &str, status: &str, timeout: &str) -> UnhealthyCondition {
        UnhealthyCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            timeout: timeout.to_string(),
        }
    }

    #[test]
    fn failed_phase_is_immediate_remediation() {
        let m = machine(Some(PHASE_FAILED), None, None);
        let target = Target { machine: m, node: None };
        let timeouts = HashMap::new();
        let eval = evaluate(&target, &[], &timeouts, DEFAULT_NODE_APPEAR_TIMEOUT, Utc::now()).unwrap();
        assert_eq!(eval.verdict, Verdict::NeedsRemediation);
        assert_eq!(eval.next_check, None);
    }

    #[test]
    fn no_node_no_last_updated_waits_full_timeout() {
        let m = machine(None, None, None);
        let target = Target { machine: m, node: None };
        let timeouts = HashMap::new();
        let eval = evaluate(&target, &[], &timeouts, DEFAULT_NODE_APPEAR_TIMEOUT, Utc::now()).unwrap();
        assert_eq!(eval.verdict, Verdict::Wait);
        assert_eq!(eval.next_check, Some(DEFAULT_NODE_APPEAR_TIMEOUT));
    }

    #[test]
    fn no_node_timeout_expired_needs_remediation() {
        let now = Utc::now();
        let m = machine(None, None, Some(now - Duration::minutes(11)));
        let target = Target { machine: m, node: None };
        let timeouts = HashMap::new();
        let eval = evaluate(&target, &[], &timeouts, DEFAULT_NODE_APPEAR_TIMEOUT, now).unwrap();
        assert_eq!(eval.verdict, Verdict::NeedsRemediation);
    }

    #[test]
    fn no_node_timeout_not_yet_expired_waits_remaining() {
        let now = Utc::now();
        let m = machine(None, None, Some(now - Duration::minutes(7)));
        let target = Target { machine: m, node: None };
        let timeouts = HashMap::new();
        let eval = evaluate(&target, &[], &timeouts, DEFAULT_NODE_APPEAR_TIMEOUT, now).unwrap();
        assert_eq!(eval.verdict, Verdict::Wait);
        // 10 min default - 7 min elapsed = 3 min, + 1s slack
        assert_eq!(eval.next_check, Some(StdDuration::from_secs(181)));
    }

    #[test]
    fn zero_uid_node_needs_remediation() {
        let node_ref = NodeRef::placeholder("node-a");
        let m = machine(None, Some(node_ref), None);
        let node = Node {
            metadata: ObjectMeta {
                name: Some("node-a".into()),
                uid: Some(String::new()),
                ..Default::default()
            },
            ..Default::default()
        };
        let target = Target { machine: m, node: Some(node) };
        let timeouts = HashMap::new();
        let eval = evaluate(&target, &[], &timeouts, DEFAULT_NODE_APPEAR_TIMEOUT, Utc::now()).unwrap();
        assert_eq!(eval.verdict, Verdict::NeedsRemediation);
        assert_eq!(eval.next_check, None);
    }

    #[test]
    fn scenario_1_recently_unhealthy_waits() {
        let now = Utc::now();
        let node_ref = NodeRef { name: "node-a".into(), uid: "real".into() };
        let m = machine(None, Some(node_ref), None);
        let node = node_with_condition("real", "Ready", "False", now - Duration::seconds(30));
        let target = Target { machine: m, node: Some(node) };
        let clauses = vec![clause("Ready", "False", "300s")];
        let timeouts = parse_unhealthy_condition_timeouts(&clauses).unwrap();
        let eval = evaluate(&target, &clauses, &timeouts, DEFAULT_NODE_APPEAR_TIMEOUT, now).unwrap();
        assert_eq!(eval.verdict, Verdict::HealthyOrPending);
        assert_eq!(eval.next_check, Some(StdDuration::from_secs(271)));
    }

    #[test]
    fn scenario_2_expired_condition_needs_remediation() {
        let now = Utc::now();
        let node_ref = NodeRef { name: "node-a".into(), uid: "real".into() };
        let m = machine(None, Some(node_ref), None);
        let node = node_with_condition("real", "Ready", "False", now - Duration::seconds(400));
        let target = Target { machine: m, node: Some(node) };
        let clauses = vec![clause("Ready", "False", "300s")];
        let timeouts = parse_unhealthy_condition_timeouts(&clauses).unwrap();
        let eval = evaluate(&target, &clauses, &timeouts, DEFAULT_NODE_APPEAR_TIMEOUT, now).unwrap();
        assert_eq!(eval.verdict, Verdict::NeedsRemediation);
        assert_eq!(eval.next_check, None);
    }

    #[test]
    fn first_matching_clause_wins() {
        let now = Utc::now();
        let node_ref = NodeRef { name: "node-a".into(), uid: "real".into() };
        let m = machine(None, Some(node_ref), None);
        let mut node = node_with_condition("real", "Ready", "False", now - Duration::seconds(400));
        node.status.as_mut().unwrap().conditions.as_mut().unwrap().push(NodeCondition {
            type_: "MemoryPressure".to_string(),
            status: "True".to_string(),
            last_transition_time: Some(Time(now - Duration::seconds(5))),
            last_heartbeat_time: None,
            message: None,
            reason: None,
        });
        let target = Target { machine: m, node: Some(node) };
        let clauses = vec![
            clause("Ready", "False", "300s"),
            clause("MemoryPressure", "True", "60s"),
        ];
        let timeouts = parse_unhealthy_condition_timeouts(&clauses).unwrap();
        let eval = evaluate(&target, &clauses, &timeouts, DEFAULT_NODE_APPEAR_TIMEOUT, now).unwrap();
        assert_eq!(eval.verdict, Verdict::NeedsRemediation);
    }

    #[test]
    fn non_matching_status_is_skipped() {
        let now = Utc::now();
        let node_ref = NodeRef { name: "node-a".into(), uid: "real".into() };
        let m = machine(None, Some(node_ref), None);
        let node = node_with_condition("real", "Ready", "True", now - Duration::seconds(400));
        let target = Target { machine: m, node: Some(node) };
        let clauses = vec![clause("Ready", "False", "300s")];
        let timeouts = parse_unhealthy_condition_timeouts(&clauses).unwrap();
        let eval = evaluate(&target, &clauses, &timeouts, DEFAULT_NODE_APPEAR_TIMEOUT, now).unwrap();
        assert_eq!(eval.verdict, Verdict::HealthyOrPending);
        assert_eq!(eval.next_check, None);
    }

    #[test]
    fn counts_healthy_respects_deletion_timestamp() {
        let mut target = Target {
            machine: machine(None, None, None),
            node: None,
        };
        let eval = Evaluation { verdict: Verdict::HealthyOrPending, next_check: None };
        assert!(counts_healthy(&target, &eval));
        target.machine.metadata.deletion_timestamp = Some(Time(Utc::now()));
        assert!(!counts_healthy(&target, &eval));
    }

    #[test]
    fn malformed_timeout_is_a_parse_error() {
        let clauses = vec![clause("Ready", "False", "not-a-duration")];
        assert!(parse_unhealthy_condition_timeouts(&clauses).is_err());
    }
}
