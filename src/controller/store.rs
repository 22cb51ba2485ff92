//! Object store client (spec.md §4's "Object store client" component, §6's
//! abstract consumed interface).
//!
//! [`ObjectStore`] is the typed get/list/patch/delete boundary every
//! reconciler-facing module is generic over (SPEC_FULL.md §4.8): one real
//! implementation wired to `kube::Api<K>`, one in-memory fake for tests that
//! never touch a live API server — the same split the teacher draws between
//! its `wiremock`-backed archive-health tests and production HTTP calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event as CoreEvent, EventSource, Node, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, MicroTime, Time};
use kube::api::{DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource, ResourceExt};
use tokio::sync::Mutex;
use tracing::instrument;

use crate::crd::{
    selector_matches, to_list_params, Machine, MachineDeployment, MachineDisruptionBudget,
    MachineDisruptionBudgetStatus, MachineHealthCheck, MachineHealthCheckStatus, MachineSet,
};
use crate::error::{Error, Result};

const FIELD_MANAGER: &str = "machine-lifecycle-controller";

/// The reboot annotation the reboot-strategy remediation path sets on a
/// Node (spec.md §4.4 step 2).
pub const REBOOT_ANNOTATION: &str = "machine.lifecycle.io/reboot";

/// A plain description of the object an [`Event`] is about, built from any
/// `Resource + ResourceExt` without pulling the generic type into the
/// `ObjectStore` trait itself (SPEC_FULL.md §6 "Emitted events").
#[derive(Clone, Debug)]
pub struct InvolvedObject {
    pub api_version: String,
    pub kind: String,
    pub namespace: Option<String>,
    pub name: String,
    pub uid: Option<String>,
}

impl InvolvedObject {
    pub fn from_resource<K>(obj: &K) -> Self
    where
        K: Resource<DynamicType = ()> + ResourceExt,
    {
        let dt = Default::default();
        Self {
            api_version: K::api_version(&dt).to_string(),
            kind: K::kind(&dt).to_string(),
            namespace: obj.namespace(),
            name: obj.name_any(),
            uid: obj.uid(),
        }
    }
}

/// `{Normal, Warning}` (spec.md §6 "Emitted events").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::Normal => "Normal",
            EventType::Warning => "Warning",
        }
    }
}

/// Typed get/list/patch/delete over the four CRDs and Node, abstracting
/// away whether the backing store is a live cluster or an in-memory fake.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_machines(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Machine>>;
    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>>;
    async fn delete_machine(&self, namespace: &str, name: &str) -> Result<()>;

    async fn get_node(&self, name: &str) -> Result<Option<Node>>;
    /// Server-side-apply the reboot annotation onto a node (spec.md §9 open
    /// question: CAS patch preferred over a full `update`).
    async fn apply_reboot_annotation(&self, name: &str) -> Result<()>;

    async fn get_mhc(&self, namespace: &str, name: &str) -> Result<Option<MachineHealthCheck>>;
    /// `namespace: None` lists across all namespaces (spec.md §4.1 "list all
    /// MHCs in the cluster").
    async fn list_mhcs(&self, namespace: Option<&str>) -> Result<Vec<MachineHealthCheck>>;
    async fn patch_mhc_status(
        &self,
        mhc: &MachineHealthCheck,
        status: MachineHealthCheckStatus,
    ) -> Result<()>;

    async fn get_mdb(&self, namespace: &str, name: &str) -> Result<Option<MachineDisruptionBudget>>;
    /// `namespace: None` lists across all namespaces, mirroring `list_mhcs`
    /// (the Machine/Node event mapper needs every MDB's selector to decide
    /// which keys a given machine or node change touches).
    async fn list_mdbs(&self, namespace: Option<&str>) -> Result<Vec<MachineDisruptionBudget>>;
    async fn patch_mdb_status(
        &self,
        mdb: &MachineDisruptionBudget,
        status: MachineDisruptionBudgetStatus,
    ) -> Result<()>;

    async fn get_machine_set(&self, namespace: &str, name: &str) -> Result<Option<MachineSet>>;
    async fn get_machine_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MachineDeployment>>;

    async fn emit_event(
        &self,
        involved: &InvolvedObject,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<()>;
}

/// List + client-side filter via [`selector_matches`], matching the
/// "empty selector matches nothing" rule a pure label-selector query string
/// can't express (spec.md §3).
async fn list_and_filter<K>(api: &Api<K>, selector: &LabelSelector) -> Result<Vec<K>>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug + ResourceExt,
{
    let items = api
        .list(&to_list_params(selector))
        .await
        .map_err(Error::from_kube)?
        .items;
    Ok(items
        .into_iter()
        .filter(|item| selector_matches(selector, item.labels()))
        .collect())
}

/// Production [`ObjectStore`] backed by real `kube::Api<K>` calls.
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    #[instrument(skip(self))]
    async fn list_machines(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Machine>> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        list_and_filter(&api, selector).await
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(m) => Ok(Some(m)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn delete_machine(&self, namespace: &str, name: &str) -> Result<()> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(Error::from_kube)?;
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(n) => Ok(Some(n)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn apply_reboot_annotation(&self, name: &str) -> Result<()> {
        let api: Api<Node> = Api::all(self.client.clone());
        let patch = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {
                "name": name,
                "annotations": { REBOOT_ANNOTATION: "true" },
            },
        });
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Apply(&patch),
        )
        .await
        .map_err(Error::from_kube)?;
        Ok(())
    }

    async fn get_mhc(&self, namespace: &str, name: &str) -> Result<Option<MachineHealthCheck>> {
        let api: Api<MachineHealthCheck> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(m) => Ok(Some(m)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn list_mhcs(&self, namespace: Option<&str>) -> Result<Vec<MachineHealthCheck>> {
        let api: Api<MachineHealthCheck> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api
            .list(&Default::default())
            .await
            .map_err(Error::from_kube)?
            .items)
    }

    async fn patch_mhc_status(
        &self,
        mhc: &MachineHealthCheck,
        status: MachineHealthCheckStatus,
    ) -> Result<()> {
        let namespace = mhc.namespace().unwrap_or_default();
        let api: Api<MachineHealthCheck> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &mhc.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(Error::from_kube)?;
        Ok(())
    }

    async fn get_mdb(&self, namespace: &str, name: &str) -> Result<Option<MachineDisruptionBudget>> {
        let api: Api<MachineDisruptionBudget> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(m) => Ok(Some(m)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn list_mdbs(&self, namespace: Option<&str>) -> Result<Vec<MachineDisruptionBudget>> {
        let api: Api<MachineDisruptionBudget> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api
            .list(&Default::default())
            .await
            .map_err(Error::from_kube)?
            .items)
    }

    async fn patch_mdb_status(
        &self,
        mdb: &MachineDisruptionBudget,
        status: MachineDisruptionBudgetStatus,
    ) -> Result<()> {
        let namespace = mdb.namespace().unwrap_or_default();
        let api: Api<MachineDisruptionBudget> = Api::namespaced(self.client.clone(), &namespace);
        let patch = serde_json::json!({ "status": status });
        api.patch_status(
            &mdb.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(Error::from_kube)?;
        Ok(())
    }

    async fn get_machine_set(&self, namespace: &str, name: &str) -> Result<Option<MachineSet>> {
        let api: Api<MachineSet> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(m) => Ok(Some(m)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn get_machine_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MachineDeployment>> {
        let api: Api<MachineDeployment> = Api::namespaced(self.client.clone(), namespace);
        match api.get(name).await {
            Ok(m) => Ok(Some(m)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::from_kube(e)),
        }
    }

    async fn emit_event(
        &self,
        involved: &InvolvedObject,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        let namespace = involved.namespace.clone().unwrap_or_else(|| "default".to_string());
        let api: Api<CoreEvent> = Api::namespaced(self.client.clone(), &namespace);
        let now = Time(chrono::Utc::now());
        let event = CoreEvent {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", involved.name)),
                namespace: Some(namespace),
                ..Default::default()
            },
            involved_object: ObjectReference {
                api_version: Some(involved.api_version.clone()),
                kind: Some(involved.kind.clone()),
                namespace: involved.namespace.clone(),
                name: Some(involved.name.clone()),
                uid: involved.uid.clone(),
                ..Default::default()
            },
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            type_: Some(event_type.as_str().to_string()),
            source: Some(EventSource {
                component: Some(FIELD_MANAGER.to_string()),
                ..Default::default()
            }),
            first_timestamp: Some(now.clone()),
            last_timestamp: Some(now),
            event_time: Some(MicroTime(chrono::Utc::now())),
            count: Some(1),
            ..Default::default()
        };
        api.create(&PostParams::default(), &event)
            .await
            .map_err(Error::from_kube)?;
        Ok(())
    }
}

/// In-memory [`ObjectStore`] for reconciler unit/integration tests — no
/// live API server required (SPEC_FULL.md §4.8).
#[derive(Default)]
pub struct FakeObjectStore {
    machines: Mutex<HashMap<(String, String), Machine>>,
    nodes: Mutex<HashMap<String, Node>>,
    mhcs: Mutex<HashMap<(String, String), MachineHealthCheck>>,
    mdbs: Mutex<HashMap<(String, String), MachineDisruptionBudget>>,
    machine_sets: Mutex<HashMap<(String, String), MachineSet>>,
    machine_deployments: Mutex<HashMap<(String, String), MachineDeployment>>,
    pub events: Mutex<Vec<(InvolvedObject, EventType, String, String)>>,
    pub deleted_machines: Mutex<Vec<(String, String)>>,
}

impl FakeObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn put_machine(&self, machine: Machine) {
        let key = (
            machine.namespace().unwrap_or_default(),
            machine.name_any(),
        );
        self.machines.lock().await.insert(key, machine);
    }

    pub async fn put_node(&self, node: Node) {
        self.nodes.lock().await.insert(node.name_any(), node);
    }

    pub async fn put_mhc(&self, mhc: MachineHealthCheck) {
        let key = (mhc.namespace().unwrap_or_default(), mhc.name_any());
        self.mhcs.lock().await.insert(key, mhc);
    }

    pub async fn put_mdb(&self, mdb: MachineDisruptionBudget) {
        let key = (mdb.namespace().unwrap_or_default(), mdb.name_any());
        self.mdbs.lock().await.insert(key, mdb);
    }

    pub async fn put_machine_set(&self, ms: MachineSet) {
        let key = (ms.namespace().unwrap_or_default(), ms.name_any());
        self.machine_sets.lock().await.insert(key, ms);
    }

    pub async fn put_machine_deployment(&self, md: MachineDeployment) {
        let key = (md.namespace().unwrap_or_default(), md.name_any());
        self.machine_deployments.lock().await.insert(key, md);
    }

    pub async fn get_mhc_status(&self, namespace: &str, name: &str) -> Option<MachineHealthCheckStatus> {
        self.mhcs
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|m| m.status.clone())
    }

    pub async fn get_mdb_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<MachineDisruptionBudgetStatus> {
        self.mdbs
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .map(|m| m.status.clone().unwrap_or_default())
    }

    pub async fn node_has_reboot_annotation(&self, name: &str) -> bool {
        self.nodes
            .lock()
            .await
            .get(name)
            .and_then(|n| n.metadata.annotations.as_ref())
            .map(|a| a.contains_key(REBOOT_ANNOTATION))
            .unwrap_or(false)
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn list_machines(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Machine>> {
        Ok(self
            .machines
            .lock()
            .await
            .values()
            .filter(|m| m.namespace().as_deref() == Some(namespace))
            .filter(|m| selector_matches(selector, m.labels()))
            .cloned()
            .collect())
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>> {
        Ok(self
            .machines
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn delete_machine(&self, namespace: &str, name: &str) -> Result<()> {
        self.machines
            .lock()
            .await
            .remove(&(namespace.to_string(), name.to_string()));
        self.deleted_machines
            .lock()
            .await
            .push((namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn get_node(&self, name: &str) -> Result<Option<Node>> {
        Ok(self.nodes.lock().await.get(name).cloned())
    }

    async fn apply_reboot_annotation(&self, name: &str) -> Result<()> {
        let mut nodes = self.nodes.lock().await;
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| Error::NotFound {
                kind: "Node",
                name: name.to_string(),
            })?;
        node.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .insert(REBOOT_ANNOTATION.to_string(), "true".to_string());
        Ok(())
    }

    async fn get_mhc(&self, namespace: &str, name: &str) -> Result<Option<MachineHealthCheck>> {
        Ok(self
            .mhcs
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_mhcs(&self, namespace: Option<&str>) -> Result<Vec<MachineHealthCheck>> {
        Ok(self
            .mhcs
            .lock()
            .await
            .values()
            .filter(|m| match namespace {
                Some(ns) => m.namespace().as_deref() == Some(ns),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn patch_mhc_status(
        &self,
        mhc: &MachineHealthCheck,
        status: MachineHealthCheckStatus,
    ) -> Result<()> {
        let key = (mhc.namespace().unwrap_or_default(), mhc.name_any());
        let mut guard = self.mhcs.lock().await;
        let stored = guard
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound {
                kind: "MachineHealthCheck",
                name: mhc.name_any(),
            })?;
        stored.status = Some(status);
        Ok(())
    }

    async fn get_mdb(&self, namespace: &str, name: &str) -> Result<Option<MachineDisruptionBudget>> {
        Ok(self
            .mdbs
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn list_mdbs(&self, namespace: Option<&str>) -> Result<Vec<MachineDisruptionBudget>> {
        Ok(self
            .mdbs
            .lock()
            .await
            .values()
            .filter(|m| match namespace {
                Some(ns) => m.namespace().as_deref() == Some(ns),
                None => true,
            })
            .cloned()
            .collect())
    }

    async fn patch_mdb_status(
        &self,
        mdb: &MachineDisruptionBudget,
        status: MachineDisruptionBudgetStatus,
    ) -> Result<()> {
        let key = (mdb.namespace().unwrap_or_default(), mdb.name_any());
        let mut guard = self.mdbs.lock().await;
        let stored = guard
            .get_mut(&key)
            .ok_or_else(|| Error::NotFound {
                kind: "MachineDisruptionBudget",
                name: mdb.name_any(),
            })?;
        stored.status = Some(status);
        Ok(())
    }

    async fn get_machine_set(&self, namespace: &str, name: &str) -> Result<Option<MachineSet>> {
        Ok(self
            .machine_sets
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_machine_deployment(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MachineDeployment>> {
        Ok(self
            .machine_deployments
            .lock()
            .await
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn emit_event(
        &self,
        involved: &InvolvedObject,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) -> Result<()> {
        self.events.lock().await.push((
            involved.clone(),
            event_type,
            reason.to_string(),
            message.to_string(),
        ));
        Ok(())
    }
}
