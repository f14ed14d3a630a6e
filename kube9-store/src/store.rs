use async_trait::async_trait;
use kube9_types::{
    HeartbeatReport, Node, NodeComponents, NodeHealth, NodeId, NodeKind, Pod, PodHealth, PodId,
    PodKind, SandboxHandle,
};

use crate::error::Result;

/// Fields required to register a new node (spec.md §4.A, §6 `POST /nodes`).
#[derive(Debug, Clone)]
pub struct NewNode {
    pub name: String,
    pub kind: NodeKind,
    pub cpu_cores_total: i32,
    pub heartbeat_interval_secs: i64,
    pub max_heartbeat_interval_secs: i64,
    pub max_recovery_attempts: i32,
}

/// Fields required to admit a new pod (spec.md §4.A, §6 `POST /pods`).
#[derive(Debug, Clone)]
pub struct NewPod {
    pub name: String,
    pub cpu_cores_req: i32,
    pub kind: PodKind,
    pub containers: Vec<kube9_types::Container>,
    pub volumes: Vec<kube9_types::Volume>,
    pub config_items: Vec<kube9_types::ConfigItem>,
}

/// The durable state backing the control plane. Every mutation that
/// touches both a node's cpu accounting and a pod's placement happens
/// inside a single transaction in the Postgres implementation, so the
/// invariant `sum(running pod cpu) + cpu_cores_avail == cpu_cores_total`
/// (spec.md §3 invariant 2) never observes a torn intermediate state.
#[async_trait]
pub trait Store: Send + Sync {
    async fn init_schema(&self) -> Result<()>;

    // --- nodes ---

    async fn create_node(&self, new_node: NewNode) -> Result<Node>;
    async fn get_node(&self, id: NodeId) -> Result<Option<Node>>;
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    async fn delete_node(&self, id: NodeId) -> Result<bool>;

    async fn set_node_sandbox(&self, id: NodeId, sandbox: Option<SandboxHandle>) -> Result<Option<Node>>;
    async fn set_node_health(&self, id: NodeId, health: NodeHealth) -> Result<Option<Node>>;
    async fn set_node_components(&self, id: NodeId, components: NodeComponents) -> Result<Option<Node>>;

    /// Applies an incoming heartbeat (spec.md §4.D): refreshes
    /// `last_heartbeat`, `cpu_cores_avail`, `health`, and `components`
    /// in one write, and resets `recovery_attempts` to 0 if the node
    /// was previously `Recovering` or `Failed`.
    async fn apply_heartbeat(&self, id: NodeId, report: &HeartbeatReport) -> Result<Option<Node>>;

    async fn increment_node_recovery_attempts(&self, id: NodeId) -> Result<Option<Node>>;
    async fn reset_node_recovery_attempts(&self, id: NodeId) -> Result<Option<Node>>;

    // --- pods ---

    async fn create_pod(&self, new_pod: NewPod) -> Result<Pod>;
    async fn get_pod(&self, id: PodId) -> Result<Option<Pod>>;
    async fn list_pods(&self) -> Result<Vec<Pod>>;
    async fn list_pods_for_node(&self, node_id: NodeId) -> Result<Vec<Pod>>;
    async fn delete_pod(&self, id: PodId) -> Result<bool>;

    async fn set_pod_health(&self, id: PodId, health: PodHealth) -> Result<Option<Pod>>;
    async fn set_pod_network(
        &self,
        id: PodId,
        address: Option<String>,
        network_handle: Option<String>,
    ) -> Result<Option<Pod>>;

    /// Places a pending/unassigned pod onto `node_id`, decrementing the
    /// node's available cpu and setting the pod's health to `Running` —
    /// atomic with respect to concurrent scheduling decisions.
    async fn schedule_pod(&self, pod_id: PodId, node_id: NodeId) -> Result<Pod>;

    /// Detaches a pod from its current node (if any), crediting the
    /// node's available cpu back, and sets the pod's health to
    /// `health_after` (spec.md §4.F).
    async fn release_pod(&self, pod_id: PodId, health_after: PodHealth) -> Result<Pod>;

    /// Moves a pod from whatever node it's currently on (if any) onto
    /// `target_node_id` in one step: credits the source, debits the
    /// target, sets `node_id`/`health = Running` — the rescheduler's
    /// relocation is never allowed to observe a pod detached from its
    /// old node but not yet attached to a new one (spec.md §8 invariant
    /// "no pod has health in {running, rescheduled} with node_id null").
    async fn reschedule_pod(&self, pod_id: PodId, target_node_id: NodeId) -> Result<Pod>;
}
