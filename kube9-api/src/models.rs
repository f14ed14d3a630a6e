//! Request/response DTOs for the control plane's HTTP ingress (spec.md
//! §6). Kept separate from the domain types in `kube9-types` so the
//! wire shape can drift from the storage shape (client-assigned
//! container/volume/config ids get renumbered here, for instance).

use kube9_types::{
    ComponentStatus, ConfigKind, Node, NodeHealth, NodeKind, Pod, PodHealth, PodKind, SandboxHandle,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateNodeRequest {
    pub name: String,
    pub cpu_cores_total: i32,
    #[serde(default = "default_node_kind")]
    pub node_type: NodeKind,
    pub heartbeat_interval_secs: Option<i64>,
    pub max_heartbeat_interval_secs: Option<i64>,
    pub max_recovery_attempts: Option<i32>,
}

fn default_node_kind() -> NodeKind {
    NodeKind::Worker
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeResponse {
    pub id: i64,
    pub name: String,
    pub node_type: NodeKind,
    pub cpu_cores_total: i32,
    pub cpu_cores_avail: i32,
    pub health: NodeHealth,
    pub components: kube9_types::NodeComponents,
    pub last_heartbeat: Option<chrono::DateTime<chrono::Utc>>,
    pub heartbeat_interval_secs: i64,
    pub max_heartbeat_interval_secs: i64,
    pub recovery_attempts: i32,
    pub max_recovery_attempts: i32,
    pub sandbox: Option<SandboxHandle>,
    pub pod_count: usize,
    pub pod_ids: Vec<i64>,
}

impl From<Node> for NodeResponse {
    fn from(n: Node) -> Self {
        Self {
            id: n.id,
            name: n.name,
            node_type: n.kind,
            cpu_cores_total: n.cpu_cores_total,
            cpu_cores_avail: n.cpu_cores_avail,
            health: n.health,
            components: n.components,
            last_heartbeat: n.last_heartbeat,
            heartbeat_interval_secs: n.heartbeat_interval_secs,
            max_heartbeat_interval_secs: n.max_heartbeat_interval_secs,
            recovery_attempts: n.recovery_attempts,
            max_recovery_attempts: n.max_recovery_attempts,
            pod_count: n.pod_ids.len(),
            pod_ids: n.pod_ids,
            sandbox: n.sandbox,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerRequest {
    pub name: String,
    pub image: String,
    #[serde(default = "default_container_cpu")]
    pub cpu_cores_req: f64,
    #[serde(default = "default_container_memory_mb")]
    pub memory_mb: i32,
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_container_cpu() -> f64 {
    0.5
}

fn default_container_memory_mb() -> i32 {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct VolumeRequest {
    pub name: String,
    pub kind: kube9_types::VolumeKind,
    #[serde(default)]
    pub size_gb: i32,
    pub mount_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigItemRequest {
    pub name: String,
    pub kind: ConfigKind,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePodRequest {
    pub name: String,
    pub cpu_cores_req: i32,
    #[serde(default = "default_pod_kind")]
    pub kind: PodKind,
    #[serde(default)]
    pub containers: Vec<ContainerRequest>,
    #[serde(default)]
    pub volumes: Vec<VolumeRequest>,
    #[serde(default)]
    pub config: Vec<ConfigItemRequest>,
}

fn default_pod_kind() -> PodKind {
    PodKind::SingleContainer
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerResponse {
    pub id: i64,
    pub name: String,
    pub image: String,
    pub status: kube9_types::ContainerStatus,
}

impl From<kube9_types::Container> for ContainerResponse {
    fn from(c: kube9_types::Container) -> Self {
        Self {
            id: c.id,
            name: c.name,
            image: c.image,
            status: c.status,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PodResponse {
    pub id: i64,
    pub name: String,
    pub cpu_cores_req: i32,
    pub kind: PodKind,
    pub address: Option<String>,
    pub health: PodHealth,
    pub node_id: Option<i64>,
    pub containers: Vec<ContainerResponse>,
}

impl From<Pod> for PodResponse {
    fn from(p: Pod) -> Self {
        Self {
            id: p.id,
            name: p.name,
            cpu_cores_req: p.cpu_cores_req,
            kind: p.kind,
            address: p.address,
            health: p.health,
            node_id: p.node_id,
            containers: p.containers.into_iter().map(ContainerResponse::from).collect(),
        }
    }
}

/// Body of `POST /nodes/{id}/heartbeat` (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(default)]
    pub pod_ids: Vec<i64>,
    pub cpu_cores_avail: i32,
    #[serde(default = "default_health")]
    pub health_status: NodeHealth,
    #[serde(default)]
    pub components: kube9_types::NodeComponents,
}

fn default_health() -> NodeHealth {
    NodeHealth::Healthy
}

/// Body of `GET /pods/{id}/health`, proxied from the hosting node's
/// sandbox (spec.md §6 egress `GET /status`).
#[derive(Debug, Clone, Serialize)]
pub struct PodHealthResponse {
    pub pod_id: i64,
    pub health: PodHealth,
    pub node_reachable: bool,
}

/// A single component in a components-availability report, used to
/// render `ComponentStatus` from either the worker or master bundle.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentReport {
    pub name: &'static str,
    pub status: ComponentStatus,
}
