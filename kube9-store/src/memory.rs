//! In-memory [`Store`] used by control-loop and scheduler unit tests
//! (spec.md §8): same trait as [`crate::postgres::PostgresStore`], no IO.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use kube9_types::{
    HeartbeatReport, MasterComponents, Node, NodeComponents, NodeHealth, NodeId, NodeKind, Pod,
    PodHealth, PodId,
};

use crate::error::{Result, StoreError};
use crate::store::{NewNode, NewPod, Store};

#[derive(Default)]
struct Inner {
    nodes: HashMap<NodeId, Node>,
    pods: HashMap<PodId, Pod>,
    next_node_id: NodeId,
    next_pod_id: PodId,
}

pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                nodes: HashMap::new(),
                pods: HashMap::new(),
                next_node_id: 1,
                next_pod_id: 1,
            }),
        }
    }

    fn pod_ids_for_node(inner: &Inner, node_id: NodeId) -> Vec<PodId> {
        let mut ids: Vec<PodId> = inner
            .pods
            .values()
            .filter(|p| p.node_id == Some(node_id))
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    fn node_with_pod_ids(inner: &Inner, id: NodeId) -> Option<Node> {
        let node = inner.nodes.get(&id)?.clone();
        let pod_ids = Self::pod_ids_for_node(inner, id);
        Some(Node { pod_ids, ..node })
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }

    async fn create_node(&self, new_node: NewNode) -> Result<Node> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_node_id;
        inner.next_node_id += 1;

        let node = Node {
            id,
            name: new_node.name,
            kind: new_node.kind,
            cpu_cores_total: new_node.cpu_cores_total,
            cpu_cores_avail: new_node.cpu_cores_total,
            health: NodeHealth::Initializing,
            components: NodeComponents {
                worker: Default::default(),
                master: matches!(new_node.kind, NodeKind::Master).then(MasterComponents::default),
            },
            last_heartbeat: None,
            heartbeat_interval_secs: new_node.heartbeat_interval_secs,
            max_heartbeat_interval_secs: new_node.max_heartbeat_interval_secs,
            recovery_attempts: 0,
            max_recovery_attempts: new_node.max_recovery_attempts,
            sandbox: None,
            pod_ids: Vec::new(),
        };
        inner.nodes.insert(id, node.clone());
        Ok(node)
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        let inner = self.inner.lock().unwrap();
        Ok(Self::node_with_pod_ids(&inner, id))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<NodeId> = inner.nodes.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids
            .into_iter()
            .filter_map(|id| Self::node_with_pod_ids(&inner, id))
            .collect())
    }

    async fn delete_node(&self, id: NodeId) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.nodes.remove(&id).is_some())
    }

    async fn set_node_sandbox(&self, id: NodeId, sandbox: Option<kube9_types::SandboxHandle>) -> Result<Option<Node>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(node) = inner.nodes.get_mut(&id) {
            node.sandbox = sandbox;
        }
        Ok(Self::node_with_pod_ids(&inner, id))
    }

    async fn set_node_health(&self, id: NodeId, health: NodeHealth) -> Result<Option<Node>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(node) = inner.nodes.get_mut(&id) {
            node.health = health;
        }
        Ok(Self::node_with_pod_ids(&inner, id))
    }

    async fn set_node_components(&self, id: NodeId, components: NodeComponents) -> Result<Option<Node>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(node) = inner.nodes.get_mut(&id) {
            node.components = components;
        }
        Ok(Self::node_with_pod_ids(&inner, id))
    }

    async fn apply_heartbeat(&self, id: NodeId, report: &HeartbeatReport) -> Result<Option<Node>> {
        let mut inner = self.inner.lock().unwrap();
        let reset_recovery = inner
            .nodes
            .get(&id)
            .map(|n| matches!(n.health, NodeHealth::Recovering | NodeHealth::Failed))
            .unwrap_or(false);
        if let Some(node) = inner.nodes.get_mut(&id) {
            node.last_heartbeat = Some(chrono::Utc::now());
            node.cpu_cores_avail = report.cpu_cores_avail;
            node.health = report.health_status;
            node.components = report.components;
            if reset_recovery {
                node.recovery_attempts = 0;
            }
        }
        Ok(Self::node_with_pod_ids(&inner, id))
    }

    async fn increment_node_recovery_attempts(&self, id: NodeId) -> Result<Option<Node>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(node) = inner.nodes.get_mut(&id) {
            node.recovery_attempts += 1;
        }
        Ok(Self::node_with_pod_ids(&inner, id))
    }

    async fn reset_node_recovery_attempts(&self, id: NodeId) -> Result<Option<Node>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(node) = inner.nodes.get_mut(&id) {
            node.recovery_attempts = 0;
        }
        Ok(Self::node_with_pod_ids(&inner, id))
    }

    async fn create_pod(&self, new_pod: NewPod) -> Result<Pod> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_pod_id;
        inner.next_pod_id += 1;

        let pod = Pod {
            id,
            name: new_pod.name,
            cpu_cores_req: new_pod.cpu_cores_req,
            kind: new_pod.kind,
            address: None,
            network_handle: None,
            health: PodHealth::Pending,
            node_id: None,
            containers: new_pod.containers,
            volumes: new_pod.volumes,
            config_items: new_pod.config_items,
        };
        inner.pods.insert(id, pod.clone());
        Ok(pod)
    }

    async fn get_pod(&self, id: PodId) -> Result<Option<Pod>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.pods.get(&id).cloned())
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let inner = self.inner.lock().unwrap();
        let mut pods: Vec<Pod> = inner.pods.values().cloned().collect();
        pods.sort_by_key(|p| p.id);
        Ok(pods)
    }

    async fn list_pods_for_node(&self, node_id: NodeId) -> Result<Vec<Pod>> {
        let inner = self.inner.lock().unwrap();
        let mut pods: Vec<Pod> = inner
            .pods
            .values()
            .filter(|p| p.node_id == Some(node_id))
            .cloned()
            .collect();
        pods.sort_by_key(|p| p.id);
        Ok(pods)
    }

    async fn delete_pod(&self, id: PodId) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.pods.remove(&id).is_some())
    }

    async fn set_pod_health(&self, id: PodId, health: PodHealth) -> Result<Option<Pod>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pod) = inner.pods.get_mut(&id) {
            pod.health = health;
        }
        Ok(inner.pods.get(&id).cloned())
    }

    async fn set_pod_network(
        &self,
        id: PodId,
        address: Option<String>,
        network_handle: Option<String>,
    ) -> Result<Option<Pod>> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(pod) = inner.pods.get_mut(&id) {
            pod.address = address;
            pod.network_handle = network_handle;
        }
        Ok(inner.pods.get(&id).cloned())
    }

    async fn schedule_pod(&self, pod_id: PodId, node_id: NodeId) -> Result<Pod> {
        let mut inner = self.inner.lock().unwrap();
        let required = inner
            .pods
            .get(&pod_id)
            .ok_or(StoreError::PodNotFound(pod_id))?
            .cpu_cores_req;
        let avail = inner
            .nodes
            .get(&node_id)
            .ok_or(StoreError::NodeNotFound(node_id))?
            .cpu_cores_avail;

        if avail < required {
            return Err(StoreError::InsufficientCpu {
                node_id,
                requested: required,
                available: avail,
            });
        }

        inner.nodes.get_mut(&node_id).unwrap().cpu_cores_avail -= required;
        let pod = inner.pods.get_mut(&pod_id).unwrap();
        pod.node_id = Some(node_id);
        pod.health = PodHealth::Running;
        Ok(pod.clone())
    }

    async fn release_pod(&self, pod_id: PodId, health_after: PodHealth) -> Result<Pod> {
        let mut inner = self.inner.lock().unwrap();
        let (prior_node_id, required) = {
            let pod = inner.pods.get(&pod_id).ok_or(StoreError::PodNotFound(pod_id))?;
            (pod.node_id, pod.cpu_cores_req)
        };

        if let Some(node_id) = prior_node_id
            && let Some(node) = inner.nodes.get_mut(&node_id)
        {
            node.cpu_cores_avail += required;
        }

        let pod = inner.pods.get_mut(&pod_id).unwrap();
        pod.node_id = None;
        pod.health = health_after;
        Ok(pod.clone())
    }

    async fn reschedule_pod(&self, pod_id: PodId, target_node_id: NodeId) -> Result<Pod> {
        let mut inner = self.inner.lock().unwrap();
        let (prior_node_id, required) = {
            let pod = inner.pods.get(&pod_id).ok_or(StoreError::PodNotFound(pod_id))?;
            (pod.node_id, pod.cpu_cores_req)
        };
        let avail = inner
            .nodes
            .get(&target_node_id)
            .ok_or(StoreError::NodeNotFound(target_node_id))?
            .cpu_cores_avail;

        if avail < required {
            return Err(StoreError::InsufficientCpu {
                node_id: target_node_id,
                requested: required,
                available: avail,
            });
        }

        if let Some(node_id) = prior_node_id
            && let Some(node) = inner.nodes.get_mut(&node_id)
        {
            node.cpu_cores_avail += required;
        }

        inner.nodes.get_mut(&target_node_id).unwrap().cpu_cores_avail -= required;
        let pod = inner.pods.get_mut(&pod_id).unwrap();
        pod.node_id = Some(target_node_id);
        pod.health = PodHealth::Running;
        Ok(pod.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube9_types::{ComponentStatus, PodKind};

    fn worker(total: i32) -> NewNode {
        NewNode {
            name: "worker-1".into(),
            kind: NodeKind::Worker,
            cpu_cores_total: total,
            heartbeat_interval_secs: 60,
            max_heartbeat_interval_secs: 120,
            max_recovery_attempts: 3,
        }
    }

    fn pod(cpu: i32) -> NewPod {
        NewPod {
            name: "pod-1".into(),
            cpu_cores_req: cpu,
            kind: PodKind::SingleContainer,
            containers: Vec::new(),
            volumes: Vec::new(),
            config_items: Vec::new(),
        }
    }

    #[tokio::test]
    async fn scheduling_decrements_and_releasing_restores_available_cpu() {
        let store = InMemoryStore::new();
        let node = store.create_node(worker(4)).await.unwrap();
        let pod = store.create_pod(pod(2)).await.unwrap();

        store.schedule_pod(pod.id, node.id).await.unwrap();
        let after_schedule = store.get_node(node.id).await.unwrap().unwrap();
        assert_eq!(after_schedule.cpu_cores_avail, 2);
        assert_eq!(after_schedule.pod_ids, vec![pod.id]);

        store.release_pod(pod.id, PodHealth::Terminated).await.unwrap();
        let after_release = store.get_node(node.id).await.unwrap().unwrap();
        assert_eq!(after_release.cpu_cores_avail, 4);
        assert!(after_release.pod_ids.is_empty());
    }

    #[tokio::test]
    async fn scheduling_onto_an_overcommitted_node_is_rejected() {
        let store = InMemoryStore::new();
        let node = store.create_node(worker(1)).await.unwrap();
        let pod = store.create_pod(pod(2)).await.unwrap();

        let err = store.schedule_pod(pod.id, node.id).await.unwrap_err();
        assert!(matches!(err, StoreError::InsufficientCpu { .. }));
    }

    #[tokio::test]
    async fn heartbeat_resets_recovery_attempts_after_a_failed_node_recovers() {
        let store = InMemoryStore::new();
        let node = store.create_node(worker(4)).await.unwrap();
        store.set_node_health(node.id, NodeHealth::Failed).await.unwrap();
        store.increment_node_recovery_attempts(node.id).await.unwrap();
        store.increment_node_recovery_attempts(node.id).await.unwrap();

        let report = HeartbeatReport {
            pod_ids: Vec::new(),
            cpu_cores_avail: 4,
            health_status: NodeHealth::Healthy,
            components: NodeComponents {
                worker: kube9_types::WorkerComponents {
                    kubelet: ComponentStatus::Running,
                    container_runtime: ComponentStatus::Running,
                    kube_proxy: ComponentStatus::Running,
                    node_agent: ComponentStatus::Running,
                },
                master: None,
            },
        };
        let updated = store.apply_heartbeat(node.id, &report).await.unwrap().unwrap();
        assert_eq!(updated.health, NodeHealth::Healthy);
        assert_eq!(updated.recovery_attempts, 0);
    }
}
