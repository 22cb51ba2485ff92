//! MDB reconciler (spec.md §4.6): computes expected/healthy counts by
//! walking owner references and maintains the disrupted-machine map with
//! its observation-window timeouts.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use tracing::{instrument, warn};

use crate::crd::{
    selector_is_empty, selector_matches, Machine, MachineDisruptionBudget,
    MachineDisruptionBudgetStatus, NamespacedName,
};
use crate::error::Result;

use super::events::{emit_event, REASON_NOT_DELETED, REASON_NO_MACHINES};
use super::owners::{classify_owner, deployment_owner_name, OwnerKind};
use super::scheduler::{apply_outcome, ReconcileOutcome, Scheduler};
use super::store::{EventType, ObjectStore};

/// Default disruption-observation window (spec.md §3 "MDB").
pub const DEFAULT_DISRUPTION_WINDOW: ChronoDuration = ChronoDuration::minutes(2);

/// Reconcile one MDB key (spec.md §4.6), driving the scheduler from the
/// outcome the way [`super::mhc_reconciler::reconcile_mhc`] does.
#[instrument(skip(store, scheduler), fields(namespace = %key.namespace, name = %key.name))]
pub async fn reconcile_mdb<S: ObjectStore>(
    store: &S,
    scheduler: &Scheduler<NamespacedName>,
    disruption_window: ChronoDuration,
    key: &NamespacedName,
) -> Result<()> {
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let outcome = reconcile_mdb_once(store, disruption_window, key).await;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration("mdb", started.elapsed());

    match outcome {
        Ok(action) => {
            apply_outcome(scheduler, key.clone(), action).await;
            Ok(())
        }
        Err(err) => {
            #[cfg(feature = "metrics")]
            super::metrics::inc_reconcile_error("mdb", err.metric_kind());
            apply_outcome(scheduler, key.clone(), ReconcileOutcome::Error).await;
            Err(err)
        }
    }
}

async fn reconcile_mdb_once<S: ObjectStore>(
    store: &S,
    disruption_window: ChronoDuration,
    key: &NamespacedName,
) -> Result<ReconcileOutcome> {
    let Some(mdb) = store.get_mdb(&key.namespace, &key.name).await? else {
        return Ok(ReconcileOutcome::Done);
    };

    if selector_is_empty(&mdb.spec.selector) {
        emit_event(store, &mdb, EventType::Normal, REASON_NO_MACHINES, "selector matches nothing").await;
        return Ok(ReconcileOutcome::Done);
    }

    let machines = store.list_machines(&key.namespace, &mdb.spec.selector).await?;
    let expected_machines = compute_expected_count(store, &key.namespace, &machines).await?;

    let desired_healthy = if let Some(min_available) = mdb.spec.min_available {
        min_available
    } else if let Some(max_unavailable) = mdb.spec.max_unavailable {
        (expected_machines - max_unavailable).max(0)
    } else {
        0
    };

    let now = Utc::now();
    let machine_names: HashSet<String> = machines.iter().map(|m| m.name_any()).collect();
    let mut disrupted = mdb
        .status
        .as_ref()
        .map(|s| s.disrupted_machines.clone())
        .unwrap_or_default();

    let mut recheck_at: Option<DateTime<Utc>> = None;
    let mut any_surviving = false;
    disrupted.retain(|name, observed| {
        let age = now - *observed;
        if age >= disruption_window {
            return false;
        }
        if !machine_names.contains(name) {
            return false;
        }
        let still_present_and_not_deleting = machines
            .iter()
            .find(|m| &m.name_any() == name)
            .map(|m| m.metadata.deletion_timestamp.is_none())
            .unwrap_or(false);
        if !still_present_and_not_deleting {
            return false;
        }
        let this_recheck = *observed + disruption_window;
        recheck_at = Some(recheck_at.map_or(this_recheck, |r| r.min(this_recheck)));
        any_surviving = true;
        true
    });

    if any_surviving {
        emit_event(
            store,
            &mdb,
            EventType::Normal,
            REASON_NOT_DELETED,
            "disrupted machines still within the observation window",
        )
        .await;
    }

    let mut current_healthy = 0i32;
    for machine in &machines {
        if machine.metadata.deletion_timestamp.is_some() {
            continue;
        }
        if disrupted.contains_key(&machine.name_any()) {
            continue;
        }
        let node_ready = match machine.status.as_ref().and_then(|s| s.node_ref.as_ref()) {
            Some(node_ref) => store
                .get_node(&node_ref.name)
                .await?
                .map(|node| node_ready_condition_true(&node))
                .unwrap_or(false),
            None => false,
        };
        if node_ready {
            current_healthy += 1;
        }
    }

    let disruptions_allowed = (current_healthy - desired_healthy).max(0);

    store
        .patch_mdb_status(
            &mdb,
            MachineDisruptionBudgetStatus {
                expected_machines,
                current_healthy,
                desired_healthy,
                disruptions_allowed,
                disrupted_machines: disrupted,
                observed_generation: mdb.metadata.generation,
            },
        )
        .await?;
    #[cfg(feature = "metrics")]
    super::metrics::set_mdb_status_gauges(
        &key.namespace,
        &key.name,
        expected_machines,
        current_healthy,
        disruptions_allowed,
    );

    match recheck_at {
        Some(at) => {
            let delay = (at - now).to_std().unwrap_or(StdDuration::ZERO);
            Ok(ReconcileOutcome::RequeueAfter(delay))
        }
        None => Ok(ReconcileOutcome::Done),
    }
}

/// Walk each machine's owners at most two hops, deduplicating by
/// replica-set-like / deployment-like name so a controller is counted once
/// regardless of how many of its machines are in the selection (spec.md
/// §4.6 step 3).
async fn compute_expected_count<S: ObjectStore>(
    store: &S,
    namespace: &str,
    machines: &[Machine],
) -> Result<i32> {
    let mut expected = 0i32;
    let mut seen_replica_sets: HashSet<String> = HashSet::new();
    let mut seen_deployments: HashSet<String> = HashSet::new();

    for machine in machines {
        let replica_set_name = match classify_owner(machine) {
            OwnerKind::Bare => {
                expected += 1;
                continue;
            }
            OwnerKind::ReplicaSetOwned { name } => name,
        };

        if !seen_replica_sets.insert(replica_set_name.clone()) {
            continue;
        }

        let Some(machine_set) = store.get_machine_set(namespace, &replica_set_name).await? else {
            // Owner vanished between the list and this lookup; count the
            // machine itself rather than silently dropping it from the budget.
            expected += 1;
            continue;
        };

        match deployment_owner_name(&machine_set) {
            Some(deployment_name) => {
                if !seen_deployments.insert(deployment_name.clone()) {
                    continue;
                }
                let replicas = store
                    .get_machine_deployment(namespace, &deployment_name)
                    .await?
                    .map(|d| d.spec.replicas)
                    .unwrap_or(machine_set.spec.replicas);
                expected += replicas;
            }
            None => expected += machine_set.spec.replicas,
        }
    }

    Ok(expected)
}

fn node_ready_condition_true(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

/// Wire the MDB controller: MDB object changes and Machine/Node changes
/// (matched against every MDB's selector) feed the scheduler shell's queue;
/// worker tasks drain it and reconcile (spec.md §4.6, §4.7).
pub async fn run_mdb_controller<S>(
    client: Client,
    store: Arc<S>,
    disruption_window: ChronoDuration,
    namespace: Option<String>,
    worker_count: usize,
) where
    S: ObjectStore + 'static,
{
    let scheduler: Scheduler<NamespacedName> = Scheduler::new();

    spawn_mdb_watch(client.clone(), namespace.clone(), scheduler.clone());
    spawn_machine_watch(client.clone(), namespace, store.clone(), scheduler.clone());
    spawn_node_watch(client, store.clone(), scheduler.clone());

    let mut workers = Vec::with_capacity(worker_count.max(1));
    for _ in 0..worker_count.max(1) {
        let store = store.clone();
        let scheduler = scheduler.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let key = scheduler.get().await;
                if let Err(err) = reconcile_mdb(&*store, &scheduler, disruption_window, &key).await {
                    warn!(namespace = %key.namespace, name = %key.name, error = %err, "mdb reconcile failed");
                }
                scheduler.done(key).await;
            }
        }));
    }

    for worker in workers {
        let _ = worker.await;
    }
}

fn spawn_mdb_watch(client: Client, namespace: Option<String>, scheduler: Scheduler<NamespacedName>) {
    let api: Api<MachineDisruptionBudget> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    tokio::spawn(async move {
        let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(mdb)) | Ok(watcher::Event::InitApply(mdb)) => {
                    scheduler
                        .add(NamespacedName::new(mdb.namespace().unwrap_or_default(), mdb.name_any()))
                        .await;
                }
                Ok(watcher::Event::Delete(mdb)) => {
                    scheduler
                        .add(NamespacedName::new(mdb.namespace().unwrap_or_default(), mdb.name_any()))
                        .await;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "mdb watch stream error"),
            }
        }
    });
}

fn spawn_machine_watch<S>(
    client: Client,
    namespace: Option<String>,
    store: Arc<S>,
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
            let machine = match event {
                Ok(watcher::Event::Apply(m)) | Ok(watcher::Event::InitApply(m)) => m,
                Ok(watcher::Event::Delete(m)) => m,
                Ok(_) => continue,
                Err(err) => {
                    warn!(error = %err, "machine watch stream error");
                    continue;
                }
            };
            enqueue_matching_mdbs(&*store, &scheduler, &machine).await;
        }
    });
}

fn spawn_node_watch<S>(client: Client, store: Arc<S>, scheduler: Scheduler<NamespacedName>)
where
    S: ObjectStore + 'static,
{
    let api: Api<Node> = Api::all(client);
    tokio::spawn(async move {
        let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());
        while let Some(event) = stream.next().await {
            if let Err(err) = &event {
                warn!(error = %err, "node watch stream error");
                continue;
            }
            // Node events don't carry machine labels; re-derive matching MDBs
            // by listing all MDBs and re-enqueuing every key. Correctness
            // over precision: an extra reconcile is cheap and idempotent.
            match store.list_mdbs(None).await {
                Ok(mdbs) => {
                    for mdb in mdbs {
                        scheduler
                            .add(NamespacedName::new(mdb.namespace().unwrap_or_default(), mdb.name_any()))
                            .await;
                    }
                }
                Err(err) => warn!(error = %err, "failed to list MDBs for node event"),
            }
        }
    });
}

async fn enqueue_matching_mdbs<S: ObjectStore>(
    store: &S,
    scheduler: &Scheduler<NamespacedName>,
    machine: &Machine,
) {
    let namespace = machine.namespace().unwrap_or_default();
    match store.list_mdbs(Some(&namespace)).await {
        Ok(mdbs) => {
            for mdb in mdbs {
                if selector_matches(&mdb.spec.selector, machine.labels()) {
                    scheduler
                        .add(NamespacedName::new(mdb.namespace().unwrap_or_default(), mdb.name_any()))
                        .await;
                }
            }
        }
        Err(err) => warn!(machine = %machine.name_any(), error = %err, "failed to map machine event to MDBs"),
    }
}
