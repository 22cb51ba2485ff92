//! Named event reasons emitted by the reconcilers (SPEC_FULL.md §6 "Emitted
//! events") and a thin logging wrapper around [`ObjectStore::emit_event`].

use kube::{Resource, ResourceExt};
use tracing::warn;

use super::store::{EventType, InvolvedObject, ObjectStore};

/// MHC reconciler: an MDB or MHC selector matched no machines.
pub const REASON_NO_MACHINES: &str = "NoMachines";
/// MDB reconciler: one or more disrupted machines are still within the
/// disruption-observation window (spec.md §4.6 step 5).
pub const REASON_NOT_DELETED: &str = "NotDeleted";
/// MHC reconciler: the max-unhealthy budget gate blocked remediation this
/// reconcile (spec.md §4.5 step 5).
pub const REASON_REMEDIATION_SHORT_CIRCUITED: &str = "RemediationShortCircuited";

/// Emit an event about `obj`, logging (rather than failing the reconcile)
/// if the store couldn't record it — events are best-effort (SPEC_FULL.md
/// §6).
pub async fn emit_event<S, K>(
    store: &S,
    obj: &K,
    event_type: EventType,
    reason: &str,
    message: &str,
) where
    S: ObjectStore,
    K: Resource<DynamicType = ()> + ResourceExt,
{
    let involved = InvolvedObject::from_resource(obj);
    if let Err(err) = store
        .emit_event(&involved, event_type, reason, message)
        .await
    {
        warn!(name = %involved.name, reason, error = %err, "failed to emit event");
    }
}

#[cfg(test)]
mod tests {
    use kube::api::ObjectMeta;

    use crate::controller::store::FakeObjectStore;
    use crate::crd::{Machine, MachineHealthCheck, MachineHealthCheckSpec};

    use super::*;

    fn mhc() -> MachineHealthCheck {
        MachineHealthCheck {
            metadata: ObjectMeta {
                name: Some("mhc-1".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec: MachineHealthCheckSpec {
                selector: Default::default(),
                unhealthy_conditions: vec![],
                max_unhealthy: None,
                node_startup_timeout: None,
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn emits_to_the_store() {
        let store = FakeObjectStore::new();
        emit_event(
            &*store,
            &mhc(),
            EventType::Warning,
            REASON_NO_MACHINES,
            "selector matched no machines",
        )
        .await;

        let events = store.events.lock().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].2, REASON_NO_MACHINES);
    }

    #[tokio::test]
    async fn machine_events_carry_the_right_kind() {
        let store = FakeObjectStore::new();
        let machine = Machine {
            metadata: ObjectMeta {
                name: Some("m1".into()),
                namespace: Some("default".into()),
                ..Default::default()
            },
            spec: Default::default(),
            status: None,
        };
        emit_event(&*store, &machine, EventType::Normal, REASON_NOT_DELETED, "still cordoned").await;
        let events = store.events.lock().await;
        assert_eq!(events[0].0.kind, "Machine");
    }
}
