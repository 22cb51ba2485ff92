//! Integration-style tests driving the public reconcile entry points against
//! `FakeObjectStore`, adapted from the teacher's `tests/e2e_kind.rs` pattern
//! (apply manifests, wait for status) — here there is no live cluster, so
//! "wait for status" becomes "reconcile once, then read the fake store's
//! status directly" (DESIGN.md notes this as the one deliberate deviation).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, Time};
use kube::api::ObjectMeta;

use machine_lifecycle_operator::controller::{reconcile_mdb, reconcile_mhc, Scheduler};
use machine_lifecycle_operator::controller::FakeObjectStore;
use machine_lifecycle_operator::crd::{
    Machine, MachineDisruptionBudget, MachineDisruptionBudgetSpec, MachineHealthCheck,
    MachineHealthCheckSpec, MachineStatus, NamespacedName, NodeRef,
};

fn worker_selector() -> LabelSelector {
    let mut labels = BTreeMap::new();
    labels.insert("tier".to_string(), "worker".to_string());
    LabelSelector {
        match_labels: Some(labels),
        match_expressions: None,
    }
}

fn worker_machine(name: &str) -> Machine {
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
            node_ref: Some(NodeRef {
                name: format!("{name}-node"),
                uid: "real".into(),
            }),
            phase: None,
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
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".into(),
                status: "True".into(),
                last_transition_time: None,
                last_heartbeat_time: None,
                message: None,
                reason: None,
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn mhc_reconcile_end_to_end_settles_on_a_healthy_fleet() {
    let store = FakeObjectStore::new();
    store
        .put_mhc(MachineHealthCheck {
            metadata: ObjectMeta {
                name: Some("mhc-1".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec: MachineHealthCheckSpec {
                selector: worker_selector(),
                unhealthy_conditions: vec![],
                max_unhealthy: None,
                node_startup_timeout: None,
            },
            status: None,
        })
        .await;
    store.put_machine(worker_machine("m1")).await;
    store.put_node(ready_node("m1-node")).await;

    let scheduler: Scheduler<NamespacedName> = Scheduler::new();
    let key = NamespacedName::new("default", "mhc-1");

    reconcile_mhc(&*store, &scheduler, Duration::from_secs(600), &key)
        .await
        .expect("reconcile should succeed");

    let status = store
        .get_mhc_status("default", "mhc-1")
        .await
        .expect("status should have been patched");
    assert_eq!(status.expected_machines, 1);
    assert_eq!(status.current_healthy, 1);
}

#[tokio::test]
async fn mdb_reconcile_end_to_end_computes_disruptions_allowed() {
    let store = FakeObjectStore::new();
    store
        .put_mdb(MachineDisruptionBudget {
            metadata: ObjectMeta {
                name: Some("mdb-1".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec: MachineDisruptionBudgetSpec {
                selector: worker_selector(),
                min_available: Some(1),
                max_unavailable: None,
            },
            status: None,
        })
        .await;
    store.put_machine(worker_machine("m1")).await;
    store.put_machine(worker_machine("m2")).await;
    store.put_node(ready_node("m1-node")).await;
    store.put_node(ready_node("m2-node")).await;

    let scheduler: Scheduler<NamespacedName> = Scheduler::new();
    let key = NamespacedName::new("default", "mdb-1");

    reconcile_mdb(&*store, &scheduler, chrono::Duration::minutes(2), &key)
        .await
        .expect("reconcile should succeed");

    let status = store
        .get_mdb_status("default", "mdb-1")
        .await
        .expect("status should have been patched");
    assert_eq!(status.expected_machines, 2);
    assert_eq!(status.current_healthy, 2);
    assert_eq!(status.desired_healthy, 1);
    assert_eq!(status.disruptions_allowed, 1);
}

#[tokio::test]
async fn mhc_reconcile_on_missing_object_is_a_quiet_no_op() {
    let store = FakeObjectStore::new();
    let scheduler: Scheduler<NamespacedName> = Scheduler::new();
    let key = NamespacedName::new("default", "does-not-exist");

    reconcile_mhc(&*store, &scheduler, Duration::from_secs(600), &key)
        .await
        .expect("a missing MHC is not an error");
}
