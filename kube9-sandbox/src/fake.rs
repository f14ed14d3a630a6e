//! In-memory [`SandboxDriver`] used by control-loop unit tests (spec.md
//! §8): same trait as [`crate::bollard_driver::BollardSandboxDriver`],
//! no Docker daemon required.

use std::collections::HashMap;
use std::sync::Mutex;

use kube9_types::SandboxHandle;

use crate::driver::{ContainerInfo, ContainerSpec, NodeSandboxSpec, RuntimeStatus, SandboxDriver};
use crate::error::Result;

#[derive(Default)]
struct Inner {
    sandboxes: HashMap<String, ContainerInfo>,
    networks: Vec<String>,
    next_id: u64,
}

#[derive(Default)]
pub struct FakeSandboxDriver {
    inner: Mutex<Inner>,
}

impl FakeSandboxDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a sandbox with a given runtime status, as if a previous
    /// `provision_node_sandbox` call had created it.
    pub fn seed_sandbox(&self, sandbox_id: &str, status: RuntimeStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.sandboxes.insert(
            sandbox_id.to_string(),
            ContainerInfo {
                status,
                ip_address: None,
                exit_code: None,
            },
        );
    }

    pub fn has_sandbox(&self, sandbox_id: &str) -> bool {
        self.inner.lock().unwrap().sandboxes.contains_key(sandbox_id)
    }
}

#[async_trait::async_trait]
impl SandboxDriver for FakeSandboxDriver {
    async fn ensure_node_network(&self) -> Result<()> {
        Ok(())
    }

    async fn provision_node_sandbox(&self, spec: &NodeSandboxSpec) -> Result<SandboxHandle> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let sandbox_id = format!("fake-sandbox-{}", inner.next_id);
        inner.sandboxes.insert(
            sandbox_id.clone(),
            ContainerInfo {
                status: RuntimeStatus::Running,
                ip_address: None,
                exit_code: None,
            },
        );
        Ok(SandboxHandle {
            sandbox_id,
            host: "127.0.0.1".to_string(),
            port: SandboxHandle::port_for(spec.node_id),
        })
    }

    async fn start_sandbox(&self, sandbox_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(info) = inner.sandboxes.get_mut(sandbox_id) {
            info.status = RuntimeStatus::Running;
        }
        Ok(())
    }

    async fn stop_sandbox(&self, sandbox_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(info) = inner.sandboxes.get_mut(sandbox_id) {
            info.status = RuntimeStatus::Exited;
        }
        Ok(())
    }

    async fn remove_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.inner.lock().unwrap().sandboxes.remove(sandbox_id);
        Ok(())
    }

    async fn get_sandbox_info(&self, sandbox_id: &str) -> Result<ContainerInfo> {
        self.get_container_info(sandbox_id).await
    }

    async fn create_pod_network(&self, name: &str) -> Result<String> {
        self.inner.lock().unwrap().networks.push(name.to_string());
        Ok(name.to_string())
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.inner.lock().unwrap().networks.retain(|n| n != name);
        Ok(())
    }

    async fn create_volume(&self, name: &str) -> Result<String> {
        Ok(name.to_string())
    }

    async fn remove_volume(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("fake-container-{}", inner.next_id);
        inner.sandboxes.insert(
            id.clone(),
            ContainerInfo {
                status: RuntimeStatus::Running,
                ip_address: None,
                exit_code: None,
            },
        );
        let _ = spec;
        Ok(id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.start_sandbox(container_id).await
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.stop_sandbox(container_id).await
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.remove_sandbox(container_id).await
    }

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .sandboxes
            .get(container_id)
            .cloned()
            .unwrap_or(ContainerInfo {
                status: RuntimeStatus::Unknown,
                ip_address: None,
                exit_code: None,
            }))
    }

    async fn check_responsiveness(&self, _host: &str, _port: u16) -> bool {
        true
    }
}
