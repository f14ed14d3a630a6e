//! Domain model for the Kube-9 control plane: nodes, pods, containers,
//! volumes, and config items (spec.md §3). Plain data + serde only — no
//! owning pointers between entities, id-based references throughout.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type NodeId = i64;
pub type PodId = i64;
pub type ContainerId = i64;
pub type VolumeId = i64;
pub type ConfigItemId = i64;

/// Base host port a node sandbox is published on; the actual port is
/// `NODE_SANDBOX_BASE_PORT + node_id`, per spec.md §4.B.
pub const NODE_SANDBOX_BASE_PORT: u16 = 5000;

pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: i64 = 60;
pub const DEFAULT_MAX_HEARTBEAT_INTERVAL_SECS: i64 = 120;
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: i32 = 3;

/// CIDR pod internal addresses are drawn from (spec.md §6).
pub const POD_CIDR: &str = "10.244.0.0/16";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Worker,
    Master,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Worker => write!(f, "worker"),
            NodeKind::Master => write!(f, "master"),
        }
    }
}

impl FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "worker" => Ok(NodeKind::Worker),
            "master" => Ok(NodeKind::Master),
            other => Err(format!("unknown node kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeHealth {
    Initializing,
    Healthy,
    Recovering,
    Failed,
    PermanentlyFailed,
}

impl NodeHealth {
    pub fn is_permanently_failed(self) -> bool {
        matches!(self, NodeHealth::PermanentlyFailed)
    }
}

impl fmt::Display for NodeHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeHealth::Initializing => "initializing",
            NodeHealth::Healthy => "healthy",
            NodeHealth::Recovering => "recovering",
            NodeHealth::Failed => "failed",
            NodeHealth::PermanentlyFailed => "permanently_failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for NodeHealth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initializing" => Ok(NodeHealth::Initializing),
            "healthy" => Ok(NodeHealth::Healthy),
            "recovering" => Ok(NodeHealth::Recovering),
            "failed" => Ok(NodeHealth::Failed),
            "permanently_failed" => Ok(NodeHealth::PermanentlyFailed),
            other => Err(format!("unknown node health: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    Running,
    Stopped,
    Failed,
    Unknown,
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentStatus::Running => "running",
            ComponentStatus::Stopped => "stopped",
            ComponentStatus::Failed => "failed",
            ComponentStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ComponentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ComponentStatus::Running),
            "stopped" => Ok(ComponentStatus::Stopped),
            "failed" => Ok(ComponentStatus::Failed),
            "unknown" => Ok(ComponentStatus::Unknown),
            other => Err(format!("unknown component status: {other}")),
        }
    }
}

/// Components every node tracks (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerComponents {
    pub kubelet: ComponentStatus,
    pub container_runtime: ComponentStatus,
    pub kube_proxy: ComponentStatus,
    pub node_agent: ComponentStatus,
}

impl Default for WorkerComponents {
    fn default() -> Self {
        Self {
            kubelet: ComponentStatus::Running,
            container_runtime: ComponentStatus::Running,
            kube_proxy: ComponentStatus::Running,
            node_agent: ComponentStatus::Running,
        }
    }
}

/// Additional components master nodes track (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterComponents {
    pub api_server: ComponentStatus,
    pub scheduler: ComponentStatus,
    pub controller: ComponentStatus,
    pub etcd: ComponentStatus,
}

impl Default for MasterComponents {
    fn default() -> Self {
        Self {
            api_server: ComponentStatus::Running,
            scheduler: ComponentStatus::Running,
            controller: ComponentStatus::Running,
            etcd: ComponentStatus::Running,
        }
    }
}

/// Kind-tag polymorphism across node kinds (design note §9): a tag plus
/// an optional sub-record, not inheritance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct NodeComponents {
    pub worker: WorkerComponents,
    pub master: Option<MasterComponents>,
}

/// Runtime-container id, reachable address and port for a node's sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxHandle {
    pub sandbox_id: String,
    pub host: String,
    pub port: u16,
}

impl SandboxHandle {
    pub fn port_for(node_id: NodeId) -> u16 {
        NODE_SANDBOX_BASE_PORT + (node_id as u16)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: NodeKind,
    pub cpu_cores_total: i32,
    pub cpu_cores_avail: i32,
    pub health: NodeHealth,
    pub components: NodeComponents,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub heartbeat_interval_secs: i64,
    pub max_heartbeat_interval_secs: i64,
    pub recovery_attempts: i32,
    pub max_recovery_attempts: i32,
    pub sandbox: Option<SandboxHandle>,
    pub pod_ids: Vec<PodId>,
}

impl Node {
    /// Invariant 2 (spec.md §3): cpu accounting must always balance.
    pub fn cpu_balanced(&self, running_pod_cpu_sum: i32) -> bool {
        running_pod_cpu_sum + self.cpu_cores_avail == self.cpu_cores_total
    }

    pub fn is_eligible_worker(&self, required_cores: i32) -> bool {
        self.kind == NodeKind::Worker
            && self.health == NodeHealth::Healthy
            && self.components.worker.kubelet == ComponentStatus::Running
            && self.components.worker.container_runtime == ComponentStatus::Running
            && self.cpu_cores_avail >= required_cores
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PodKind {
    SingleContainer,
    MultiContainer,
}

impl fmt::Display for PodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodKind::SingleContainer => write!(f, "single-container"),
            PodKind::MultiContainer => write!(f, "multi-container"),
        }
    }
}

impl FromStr for PodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single-container" => Ok(PodKind::SingleContainer),
            "multi-container" => Ok(PodKind::MultiContainer),
            other => Err(format!("unknown pod kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodHealth {
    Pending,
    Running,
    Rescheduled,
    Failed,
    Terminated,
}

impl PodHealth {
    /// Invariant 1 (spec.md §3): a node_id is required exactly when running/rescheduled.
    pub fn requires_node(self) -> bool {
        matches!(self, PodHealth::Running | PodHealth::Rescheduled)
    }
}

impl fmt::Display for PodHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PodHealth::Pending => "pending",
            PodHealth::Running => "running",
            PodHealth::Rescheduled => "rescheduled",
            PodHealth::Failed => "failed",
            PodHealth::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PodHealth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PodHealth::Pending),
            "running" => Ok(PodHealth::Running),
            "rescheduled" => Ok(PodHealth::Rescheduled),
            "failed" => Ok(PodHealth::Failed),
            "terminated" => Ok(PodHealth::Terminated),
            other => Err(format!("unknown pod health: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pod {
    pub id: PodId,
    pub name: String,
    pub cpu_cores_req: i32,
    pub kind: PodKind,
    pub address: Option<String>,
    pub network_handle: Option<String>,
    pub health: PodHealth,
    pub node_id: Option<NodeId>,
    pub containers: Vec<Container>,
    pub volumes: Vec<Volume>,
    pub config_items: Vec<ConfigItem>,
}

impl Pod {
    pub fn invariant_node_ref_ok(&self) -> bool {
        self.health.requires_node() == self.node_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Pending,
    Running,
    Failed,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerStatus::Pending => "pending",
            ContainerStatus::Running => "running",
            ContainerStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ContainerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ContainerStatus::Pending),
            "running" => Ok(ContainerStatus::Running),
            "failed" => Ok(ContainerStatus::Failed),
            other => Err(format!("unknown container status: {other}")),
        }
    }
}

/// Runtime status a sandbox reports for a single container (spec.md §4.B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeContainerStatus {
    Created,
    Running,
    Exited,
    Dead,
    Unknown,
}

impl fmt::Display for RuntimeContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeContainerStatus::Created => "created",
            RuntimeContainerStatus::Running => "running",
            RuntimeContainerStatus::Exited => "exited",
            RuntimeContainerStatus::Dead => "dead",
            RuntimeContainerStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRuntimeHandle {
    pub sandbox_id: String,
    pub status: RuntimeContainerStatus,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    pub id: ContainerId,
    pub name: String,
    pub image: String,
    pub cpu_cores_req: f64,
    pub memory_mb: i32,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub runtime: Option<ContainerRuntimeHandle>,
    pub status: ContainerStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VolumeKind {
    EmptyDir,
    HostPath,
    ConfigMap,
    Secret,
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeKind::EmptyDir => "emptyDir",
            VolumeKind::HostPath => "hostPath",
            VolumeKind::ConfigMap => "configMap",
            VolumeKind::Secret => "secret",
        };
        write!(f, "{s}")
    }
}

impl FromStr for VolumeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "emptyDir" => Ok(VolumeKind::EmptyDir),
            "hostPath" => Ok(VolumeKind::HostPath),
            "configMap" => Ok(VolumeKind::ConfigMap),
            "secret" => Ok(VolumeKind::Secret),
            other => Err(format!("unknown volume kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub name: String,
    pub kind: VolumeKind,
    pub size_gb: i32,
    pub mount_path: String,
    pub runtime_volume_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKind {
    Env,
    Secret,
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigKind::Env => write!(f, "env"),
            ConfigKind::Secret => write!(f, "secret"),
        }
    }
}

impl FromStr for ConfigKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "env" => Ok(ConfigKind::Env),
            "secret" => Ok(ConfigKind::Secret),
            other => Err(format!("unknown config kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigItem {
    pub id: ConfigItemId,
    pub name: String,
    pub kind: ConfigKind,
    pub key: String,
    pub value: String,
}

/// A heartbeat report from a node sandbox (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub pod_ids: Vec<PodId>,
    pub cpu_cores_avail: i32,
    pub health_status: NodeHealth,
    pub components: NodeComponents,
}

/// Reply sent back to a heartbeating sandbox (spec.md §4.D, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub node_status: Option<NodeHealth>,
    pub should_stop_heartbeat: bool,
    pub should_terminate: bool,
}

impl HeartbeatResponse {
    pub fn ok(node_status: NodeHealth) -> Self {
        Self {
            node_status: Some(node_status),
            should_stop_heartbeat: false,
            should_terminate: false,
        }
    }

    pub fn stop() -> Self {
        Self {
            node_status: None,
            should_stop_heartbeat: true,
            should_terminate: false,
        }
    }

    pub fn terminate() -> Self {
        Self {
            node_status: None,
            should_stop_heartbeat: true,
            should_terminate: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_health_round_trips_through_its_string_form() {
        for h in [
            NodeHealth::Initializing,
            NodeHealth::Healthy,
            NodeHealth::Recovering,
            NodeHealth::Failed,
            NodeHealth::PermanentlyFailed,
        ] {
            assert_eq!(h.to_string().parse::<NodeHealth>().unwrap(), h);
        }
    }

    #[test]
    fn pod_health_requires_node_exactly_when_running_or_rescheduled() {
        assert!(PodHealth::Running.requires_node());
        assert!(PodHealth::Rescheduled.requires_node());
        assert!(!PodHealth::Pending.requires_node());
        assert!(!PodHealth::Failed.requires_node());
        assert!(!PodHealth::Terminated.requires_node());
    }

    #[test]
    fn sandbox_port_is_base_plus_node_id() {
        assert_eq!(SandboxHandle::port_for(7), NODE_SANDBOX_BASE_PORT + 7);
    }
}
