use async_trait::async_trait;
use kube9_types::{NodeId, NodeKind, SandboxHandle};

use crate::error::Result;

/// Everything the sandbox driver needs to start a node's simulator
/// container (spec.md §4.B; grounded in `docker_service.py`'s
/// `create_node_container`).
#[derive(Debug, Clone)]
pub struct NodeSandboxSpec {
    pub node_id: NodeId,
    pub node_name: String,
    pub cpu_cores: i32,
    pub kind: NodeKind,
    pub api_server: String,
}

/// A single container's desired runtime shape within a pod sandbox.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cpu_cores: f64,
    pub memory_mb: i32,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub network: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeStatus {
    Created,
    Running,
    Exited,
    Dead,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub status: RuntimeStatus,
    pub ip_address: Option<String>,
    pub exit_code: Option<i32>,
}

/// The Sandbox Driver (spec.md §4.B): the only component that talks to
/// the container runtime. Node reconciliation and pod placement go
/// through this trait so the control loops stay runtime-agnostic.
#[async_trait]
pub trait SandboxDriver: Send + Sync {
    /// Ensures the shared node bridge network exists; idempotent.
    async fn ensure_node_network(&self) -> Result<()>;

    /// Builds the node simulator image if absent, then creates and
    /// starts a node's sandbox container, publishing its control port
    /// at `NODE_SANDBOX_BASE_PORT + node_id`.
    async fn provision_node_sandbox(&self, spec: &NodeSandboxSpec) -> Result<SandboxHandle>;

    async fn start_sandbox(&self, sandbox_id: &str) -> Result<()>;
    async fn stop_sandbox(&self, sandbox_id: &str) -> Result<()>;
    async fn remove_sandbox(&self, sandbox_id: &str) -> Result<()>;

    async fn get_sandbox_info(&self, sandbox_id: &str) -> Result<ContainerInfo>;

    /// Creates a dedicated bridge network for a pod, retrying past
    /// races where a concurrent create already claimed the name.
    async fn create_pod_network(&self, name: &str) -> Result<String>;
    async fn remove_network(&self, name: &str) -> Result<()>;

    /// Lists existing bridge networks whose name starts with `prefix`,
    /// for the stale-network reaper (spec.md §6 CLI surface).
    async fn list_networks_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    async fn create_volume(&self, name: &str) -> Result<String>;
    async fn remove_volume(&self, name: &str) -> Result<()>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;
    async fn start_container(&self, container_id: &str) -> Result<()>;
    async fn stop_container(&self, container_id: &str) -> Result<()>;
    async fn remove_container(&self, container_id: &str) -> Result<()>;
    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo>;

    /// Best-effort HTTP probe against a sandbox's `/status` endpoint
    /// (spec.md §4.B `check_container_responsiveness`).
    async fn check_responsiveness(&self, host: &str, port: u16) -> bool;
}
