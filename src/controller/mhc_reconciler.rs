//! MHC reconciler (spec.md §4.5): orchestrates the target assembler, health
//! evaluator, and remediator for one `MachineHealthCheck` key; patches
//! status; enforces the max-unhealthy short-circuit.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::IntOrString;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tracing::{info, instrument, warn};

use crate::crd::{
    Machine, MachineHealthCheck, MachineHealthCheckStatus, NamespacedName,
    CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_REMEDIATION_ALLOWED,
};
use crate::error::{AggregateError, Error, Result};

use super::conditions::set_condition;
use super::health::{counts_healthy, evaluate, parse_unhealthy_condition_timeouts, Verdict};
use super::index::{map_machine_event, map_node_event, NodeIndex};
use super::remediation::remediate;
use super::scheduler::{apply_outcome, ReconcileOutcome, Scheduler};
use super::store::{EventType, ObjectStore};
use super::targets::assemble_targets;
use super::events::{emit_event, REASON_NO_MACHINES, REASON_REMEDIATION_SHORT_CIRCUITED};

/// Parse `spec.maxUnhealthy` as an absolute count or a percentage of
/// `total` (spec.md §4.5 step 5). Percentages round down; this is a
/// deliberate, simple rule — not a port of any other implementation's
/// integer/percentage parsing.
pub fn parse_int_or_percent(value: &IntOrString, total: i32) -> Result<i32> {
    match value {
        IntOrString::Int(n) => Ok(*n),
        IntOrString::String(s) => {
            let trimmed = s.trim();
            let digits = trimmed
                .strip_suffix('%')
                .ok_or_else(|| Error::Parse(format!("maxUnhealthy {s:?} is neither an int nor a percentage")))?;
            let pct: i64 = digits
                .parse()
                .map_err(|_| Error::Parse(format!("maxUnhealthy {s:?} has a non-numeric percentage")))?;
            Ok(((pct * total as i64) / 100) as i32)
        }
    }
}

/// Reconcile one MHC key (spec.md §4.5).
#[instrument(skip(store, scheduler), fields(namespace = %key.namespace, name = %key.name))]
pub async fn reconcile_mhc<S: ObjectStore>(
    store: &S,
    scheduler: &Scheduler<NamespacedName>,
    default_node_appear_timeout: Duration,
    key: &NamespacedName,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let outcome = reconcile_mhc_once(store, default_node_appear_timeout, key).await;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration("mhc", started.elapsed());

    match outcome {
        Ok(action) => {
            apply_outcome(scheduler, key.clone(), action).await;
            Ok(())
        }
        Err(err) => {
            #[cfg(feature = "metrics")]
            super::metrics::inc_reconcile_error("mhc", err.metric_kind());
            apply_outcome(scheduler, key.clone(), ReconcileOutcome::Error).await;
            Err(err)
        }
    }
}

async fn reconcile_mhc_once<S: ObjectStore>(
    store: &S,
    default_node_appear_timeout: Duration,
    key: &NamespacedName,
) -> Result<ReconcileOutcome> {
    let Some(mhc) = store.get_mhc(&key.namespace, &key.name).await? else {
        return Ok(ReconcileOutcome::Done);
    };

    let targets = assemble_targets(store, &mhc).await?;
    let total = targets.len() as i32;

    if targets.is_empty() {
        emit_event(store, &mhc, EventType::Normal, REASON_NO_MACHINES, "selector matched no machines").await;
    }

    let node_appear_timeout = match &mhc.spec.node_startup_timeout {
        Some(raw) => humantime::parse_duration(raw)
            .map_err(|e| Error::Parse(format!("invalid nodeStartupTimeout {raw:?}: {e}")))?,
        None => default_node_appear_timeout,
    };
    let condition_timeouts = parse_unhealthy_condition_timeouts(&mhc.spec.unhealthy_conditions)?;

    let now = Utc::now();
    let mut current_healthy = 0i32;
    let mut needs_remediation = Vec::new();
    let mut waits: Vec<Duration> = Vec::new();

    for target in &targets {
        let evaluation = evaluate(
            target,
            &mhc.spec.unhealthy_conditions,
            &condition_timeouts,
            node_appear_timeout,
            now,
        )?;
        if counts_healthy(target, &evaluation) {
            current_healthy += 1;
        }
        if evaluation.verdict == Verdict::NeedsRemediation {
            needs_remediation.push(target);
        }
        if let Some(next_check) = evaluation.next_check {
            waits.push(next_check);
        }
    }

    let unhealthy_count = total - current_healthy;
    let budget_slack = match &mhc.spec.max_unhealthy {
        Some(max_unhealthy) => Some(parse_int_or_percent(max_unhealthy, total)? - unhealthy_count),
        None => None,
    };

    let mut conditions = mhc
        .status
        .as_ref()
        .map(|s| s.conditions.clone())
        .unwrap_or_default();
    match budget_slack {
        Some(slack) if slack < 0 => set_condition(
            &mut conditions,
            CONDITION_TYPE_REMEDIATION_ALLOWED,
            CONDITION_STATUS_FALSE,
            "BudgetExceeded",
            &format!("{unhealthy_count} unhealthy exceeds max-unhealthy budget"),
        ),
        _ => set_condition(
            &mut conditions,
            CONDITION_TYPE_REMEDIATION_ALLOWED,
            CONDITION_STATUS_TRUE,
            "WithinBudget",
            "unhealthy count is within the max-unhealthy budget",
        ),
    }

    store
        .patch_mhc_status(
            &mhc,
            MachineHealthCheckStatus {
                expected_machines: total,
                current_healthy,
                conditions,
            },
        )
        .await?;
    #[cfg(feature = "metrics")]
    super::metrics::set_mhc_status_gauges(&key.namespace, &key.name, total, current_healthy);

    if let Some(slack) = budget_slack {
        if slack < 0 {
            let budget = unhealthy_count + slack;
            warn!(namespace = %key.namespace, name = %key.name, unhealthy_count, budget, "max-unhealthy budget exceeded, short-circuiting remediation");
            emit_event(
                store,
                &mhc,
                EventType::Warning,
                REASON_REMEDIATION_SHORT_CIRCUITED,
                &format!("{unhealthy_count} unhealthy exceeds budget of {budget}"),
            )
            .await;
            return Ok(ReconcileOutcome::Requeue);
        }
    }

    let mut aggregate = AggregateError::default();
    for target in &needs_remediation {
        match remediate(store, &mhc, target).await {
            Ok(_outcome) => {
                #[cfg(feature = "metrics")]
                super::metrics::inc_remediation(&key.namespace, &key.name, _outcome);
            }
            Err(err) => aggregate.push(err),
        }
    }
    if !aggregate.is_empty() {
        return Err(aggregate.into());
    }

    match waits.into_iter().min() {
        Some(delay) => Ok(ReconcileOutcome::RequeueAfter(delay)),
        None => Ok(ReconcileOutcome::Done),
    }
}

/// Wire the MHC controller: watch streams feed the scheduler shell's queue
/// (spec.md §4.1 mapping, §4.7 queue), worker tasks drain it and reconcile
/// (spec.md §4.5). Runs until `client`'s connection is lost or the process
/// is signalled to stop.
pub async fn run_mhc_controller<S>(
    client: Client,
    store: Arc<S>,
    index: Arc<NodeIndex>,
    default_node_appear_timeout: Duration,
    namespace: Option<String>,
    worker_count: usize,
) where
    S: ObjectStore + 'static,
{
    let scheduler: Scheduler<NamespacedName> = Scheduler::new();

    spawn_mhc_watch(client.clone(), namespace.clone(), scheduler.clone());
    spawn_machine_watch(client.clone(), namespace.clone(), store.clone(), index.clone(), scheduler.clone());
    spawn_node_watch(client, store.clone(), index, scheduler.clone());

    let mut workers = Vec::with_capacity(worker_count.max(1));
    for _ in 0..worker_count.max(1) {
        let store = store.clone();
        let scheduler = scheduler.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let key = scheduler.get().await;
                let result = reconcile_mhc(&*store, &scheduler, default_node_appear_timeout, &key).await;
                if let Err(err) = result {
                    warn!(namespace = %key.namespace, name = %key.name, error = %err, "mhc reconcile failed");
                }
                scheduler.done(key).await;
            }
        }));
    }

    for worker in workers {
        let _ = worker.await;
    }
}

fn spawn_mhc_watch(client: Client, namespace: Option<String>, scheduler: Scheduler<NamespacedName>) {
    let api: Api<MachineHealthCheck> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    tokio::spawn(async move {
        let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(mhc)) | Ok(watcher::Event::InitApply(mhc)) => {
                    scheduler
                        .add(NamespacedName::new(mhc.namespace().unwrap_or_default(), mhc.name_any()))
                        .await;
                }
                Ok(watcher::Event::Delete(mhc)) => {
                    scheduler
                        .add(NamespacedName::new(mhc.namespace().unwrap_or_default(), mhc.name_any()))
                        .await;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "mhc watch stream error"),
            }
        }
    });
}

fn spawn_machine_watch<S>(
    client: Client,
    namespace: Option<String>,
    store: Arc<S>,
    index: Arc<NodeIndex>,
    scheduler: Scheduler<NamespacedName>,
) where
    S: ObjectStore + 'static,
{
    let api: Api<Machine> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    tokio::spawn(async move {
        let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(machine)) | Ok(watcher::Event::InitApply(machine)) => {
                    index.reindex(&machine).await;
                    enqueue_matching_mhcs(&*store, &scheduler, &machine).await;
                }
                Ok(watcher::Event::Delete(machine)) => {
                    let key = NamespacedName::new(
                        machine.namespace().unwrap_or_default(),
                        machine.name_any(),
                    );
                    index.remove_machine(&key).await;
                    enqueue_matching_mhcs(&*store, &scheduler, &machine).await;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "machine watch stream error"),
            }
        }
    });
}

fn spawn_node_watch<S>(
    client: Client,
    store: Arc<S>,
    index: Arc<NodeIndex>,
    scheduler: Scheduler<NamespacedName>,
) where
    S: ObjectStore + 'static,
{
    let api: Api<Node> = Api::all(client);
    tokio::spawn(async move {
        let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());
        while let Some(event) = stream.next().await {
            let node = match event {
                Ok(watcher::Event::Apply(node)) | Ok(watcher::Event::InitApply(node)) => node,
                Ok(watcher::Event::Delete(node)) => node,
                Ok(_) => continue,
                Err(err) => {
                    warn!(error = %err, "node watch stream error");
                    continue;
                }
            };
            match map_node_event(&*store, &index, &node).await {
                Ok(keys) => {
                    for key in keys {
                        scheduler.add(key).await;
                    }
                }
                Err(err) => warn!(node = %node.name_any(), error = %err, "failed to map node event"),
            }
        }
    });
}

async fn enqueue_matching_mhcs<S: ObjectStore>(
    store: &S,
    scheduler: &Scheduler<NamespacedName>,
    machine: &Machine,
) {
    match map_machine_event(store, machine).await {
        Ok(keys) => {
            let keys: HashSet<_> = keys.into_iter().collect();
            for key in keys {
                scheduler.add(key).await;
            }
        }
        Err(err) => warn!(machine = %machine.name_any(), error = %err, "failed to map machine event"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
    use kube::api::ObjectMeta;

    use crate::controller::store::FakeObjectStore;
    use crate::crd::{MachineHealthCheckSpec, MachineStatus, NodeRef, UnhealthyCondition};

    use super::*;

    fn mhc_with(spec: MachineHealthCheckSpec) -> MachineHealthCheck {
        MachineHealthCheck {
            metadata: ObjectMeta {
                name: Some("mhc-1".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec,
            status: None,
        }
    }

    fn worker_selector() -> LabelSelector {
        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "worker".to_string());
        LabelSelector {
            match_labels: Some(labels),
            match_expressions: None,
        }
    }

    fn worker_machine(name: &str, phase: Option<&str>) -> Machine {
        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), "worker".to_string());
        Machine {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("default".into()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Default::default(),
            status: Some(MachineStatus {
                node_ref: Some(NodeRef { name: format!("{name}-node"), uid: "real".into() }),
                phase: phase.map(str::to_string),
                last_updated: Some(Time(Utc::now())),
            }),
        }
    }

    fn ready_node(name: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.into()),
                uid: Some("real".into()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn parses_integer_budget() {
        let v = IntOrString::Int(3);
        assert_eq!(parse_int_or_percent(&v, 10).unwrap(), 3);
    }

    #[test]
    fn parses_percentage_budget_rounding_down() {
        let v = IntOrString::String("25%".to_string());
        assert_eq!(parse_int_or_percent(&v, 10).unwrap(), 2);
    }

    #[test]
    fn rejects_malformed_budget() {
        let v = IntOrString::String("not-a-percent".to_string());
        assert!(parse_int_or_percent(&v, 10).is_err());
    }

    #[tokio::test]
    async fn missing_mhc_is_a_no_op() {
        let store = FakeObjectStore::new();
        let key = NamespacedName::new("default", "missing");
        let outcome = reconcile_mhc_once(&*store, Duration::from_secs(600), &key).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Done));
    }

    #[tokio::test]
    async fn healthy_fleet_updates_status_and_settles() {
        let store = FakeObjectStore::new();
        store.put_mhc(mhc_with(MachineHealthCheckSpec {
            selector: worker_selector(),
            unhealthy_conditions: vec![],
            max_unhealthy: None,
            node_startup_timeout: None,
        })).await;
        store.put_machine(worker_machine("m1", None)).await;
        store.put_node(ready_node("m1-node")).await;

        let key = NamespacedName::new("default", "mhc-1");
        let outcome = reconcile_mhc_once(&*store, Duration::from_secs(600), &key).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Done));

        let status = store.get_mhc_status("default", "mhc-1").await.unwrap();
        assert_eq!(status.expected_machines, 1);
        assert_eq!(status.current_healthy, 1);
    }

    #[tokio::test]
    async fn failed_machine_gets_remediated_and_deleted() {
        let store = FakeObjectStore::new();
        store.put_mhc(mhc_with(MachineHealthCheckSpec {
            selector: worker_selector(),
            unhealthy_conditions: vec![],
            max_unhealthy: None,
            node_startup_timeout: None,
        })).await;
        let machine = worker_machine("m1", Some(crate::crd::PHASE_FAILED));
        store.put_machine(machine.clone()).await;
        // give it a replica-set-like owner so the orphan guard doesn't block deletion
        let mut owned = machine;
        owned.metadata.owner_references = Some(vec![
            k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                api_version: "machine.lifecycle.io/v1alpha1".into(),
                kind: "MachineSet".into(),
                name: "ms-a".into(),
                uid: "ms-a-uid".into(),
                controller: Some(true),
                block_owner_deletion: None,
            },
        ]);
        store.put_machine(owned).await;

        let key = NamespacedName::new("default", "mhc-1");
        reconcile_mhc_once(&*store, Duration::from_secs(600), &key).await.unwrap();

        assert!(store.get_machine("default", "m1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn budget_exceeded_short_circuits_remediation() {
        let store = FakeObjectStore::new();
        store.put_mhc(mhc_with(MachineHealthCheckSpec {
            selector: worker_selector(),
            unhealthy_conditions: vec![UnhealthyCondition {
                type_: "Ready".into(),
                status: "False".into(),
                timeout: "0s".into(),
            }],
            max_unhealthy: Some(IntOrString::Int(0)),
            node_startup_timeout: None,
        })).await;
        let mut machine = worker_machine("m1", None);
        let mut owners = BTreeMap::new();
        owners.insert("x".to_string(), "y".to_string());
        machine.metadata.labels = Some({
            let mut l = BTreeMap::new();
            l.insert("tier".to_string(), "worker".to_string());
            l
        });
        store.put_machine(machine).await;
        let mut node = ready_node("m1-node");
        node.status = Some(k8s_openapi::api::core::v1::NodeStatus {
            conditions: Some(vec![k8s_openapi::api::core::v1::NodeCondition {
                type_: "Ready".into(),
                status: "False".into(),
                last_transition_time: Some(Time(Utc::now() - chrono::Duration::seconds(5))),
                last_heartbeat_time: None,
                message: None,
                reason: None,
            }]),
            ..Default::default()
        });
        store.put_node(node).await;

        let key = NamespacedName::new("default", "mhc-1");
        let outcome = reconcile_mhc_once(&*store, Duration::from_secs(600), &key).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Requeue));
        // the machine must still exist: remediation was short-circuited.
        assert!(store.get_machine("default", "m1").await.unwrap().is_some());
        let status = store.get_mhc_status("default", "mhc-1").await.unwrap();
        assert!(!super::super::conditions::is_condition_true(
            &status.conditions,
            CONDITION_TYPE_REMEDIATION_ALLOWED,
        ));
        let _ = owners;
    }

    #[tokio::test]
    async fn master_node_is_skipped_but_status_still_reflects_unhealthy_count() {
        let store = FakeObjectStore::new();
        store.put_mhc(mhc_with(MachineHealthCheckSpec {
            selector: worker_selector(),
            unhealthy_conditions: vec![UnhealthyCondition {
                type_: "Ready".into(),
                status: "False".into(),
                timeout: "300s".into(),
            }],
            max_unhealthy: None,
            node_startup_timeout: None,
        })).await;
        let mut machine = worker_machine("m1", None);
        machine.metadata.labels = Some({
            let mut l = BTreeMap::new();
            l.insert("tier".to_string(), "worker".to_string());
            l.insert(crate::crd::MASTER_ROLE_LABEL.to_string(), "".to_string());
            l
        });
        store.put_machine(machine).await;
        let mut node = ready_node("m1-node");
        node.status = Some(k8s_openapi::api::core::v1::NodeStatus {
            conditions: Some(vec![k8s_openapi::api::core::v1::NodeCondition {
                type_: "Ready".into(),
                status: "False".into(),
                last_transition_time: Some(Time(Utc::now() - chrono::Duration::seconds(400))),
                last_heartbeat_time: None,
                message: None,
                reason: None,
            }]),
            ..Default::default()
        });
        store.put_node(node).await;

        let key = NamespacedName::new("default", "mhc-1");
        reconcile_mhc_once(&*store, Duration::from_secs(600), &key).await.unwrap();

        // the master machine is left alone...
        assert!(store.get_machine("default", "m1").await.unwrap().is_some());
        assert!(!store.node_has_reboot_annotation("m1-node").await);
        // ...but the status still reports it as unhealthy.
        let status = store.get_mhc_status("default", "mhc-1").await.unwrap();
        assert_eq!(status.expected_machines, 1);
        assert_eq!(status.current_healthy, 0);
    }
}
