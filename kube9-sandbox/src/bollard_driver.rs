use std::collections::HashMap;
use std::time::Duration;

use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::BuildImageOptions;
use bollard::models::{HostConfig, PortBinding};
use bollard::network::{CreateNetworkOptions, InspectNetworkOptions};
use bollard::volume::CreateVolumeOptions;
use futures_util::StreamExt;
use kube9_types::{NodeKind, SandboxHandle};

use crate::driver::{ContainerInfo, ContainerSpec, NodeSandboxSpec, RuntimeStatus, SandboxDriver};
use crate::error::{Result, SandboxError};

const NODE_NETWORK_CREATE_RETRIES: u32 = 3;

/// Talks to the Docker Engine API directly (grounded in
/// `docker_service.py`'s `DockerService`), used in place of a real
/// kubelet/containerd stack.
pub struct BollardSandboxDriver {
    docker: Docker,
    node_network_name: String,
    node_sandbox_image: String,
}

impl BollardSandboxDriver {
    pub fn connect(docker_host: Option<&str>, node_network_name: String, node_sandbox_image: String) -> Result<Self> {
        let docker = match docker_host {
            Some(host) => Docker::connect_with_http(host, 120, bollard::API_DEFAULT_VERSION)?,
            None => Docker::connect_with_local_defaults()?,
        };
        Ok(Self {
            docker,
            node_network_name,
            node_sandbox_image,
        })
    }

    async fn network_exists(&self, name: &str) -> Result<bool> {
        match self
            .docker
            .inspect_network(name, Some(InspectNetworkOptions::<String>::default()))
            .await
        {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn build_sandbox_image_if_absent(&self) -> Result<()> {
        if self
            .docker
            .inspect_image(&self.node_sandbox_image)
            .await
            .is_ok()
        {
            return Ok(());
        }

        tracing::info!(image = %self.node_sandbox_image, "building node sandbox image");
        let options = BuildImageOptions {
            dockerfile: "Dockerfile",
            t: self.node_sandbox_image.as_str(),
            rm: true,
            ..Default::default()
        };
        let mut stream = self.docker.build_image(options, None, None);
        while let Some(chunk) = stream.next().await {
            if let Err(e) = chunk {
                return Err(SandboxError::ImageBuild(e.to_string()));
            }
        }
        Ok(())
    }

    fn runtime_status_from_state(state: Option<&str>) -> RuntimeStatus {
        match state {
            Some("created") => RuntimeStatus::Created,
            Some("running") => RuntimeStatus::Running,
            Some("exited") => RuntimeStatus::Exited,
            Some("dead") => RuntimeStatus::Dead,
            _ => RuntimeStatus::Unknown,
        }
    }
}

#[async_trait::async_trait]
impl SandboxDriver for BollardSandboxDriver {
    async fn ensure_node_network(&self) -> Result<()> {
        if self.network_exists(&self.node_network_name).await? {
            return Ok(());
        }
        self.docker
            .create_network(CreateNetworkOptions {
                name: self.node_network_name.clone(),
                driver: "bridge".to_string(),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    async fn provision_node_sandbox(&self, spec: &NodeSandboxSpec) -> Result<SandboxHandle> {
        self.ensure_node_network().await?;
        self.build_sandbox_image_if_absent().await?;

        let container_name = format!("kube9-node-{}", spec.node_name);

        // Remove any stale container left over from a previous run under
        // the same name (docker_service.py does this before every create).
        let _ = self
            .docker
            .remove_container(
                &container_name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        let host_port = SandboxHandle::port_for(spec.node_id);
        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            "8080/tcp".to_string(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(host_port.to_string()),
            }]),
        );

        let cpu_quota = (spec.cpu_cores as i64) * 100_000;
        let memory_bytes = (spec.cpu_cores as i64) * 512 * 1024 * 1024;

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            cpu_quota: Some(cpu_quota),
            cpu_period: Some(100_000),
            memory: Some(memory_bytes),
            network_mode: Some(self.node_network_name.clone()),
            extra_hosts: Some(vec!["host.docker.internal:host-gateway".to_string()]),
            ..Default::default()
        };

        let env = vec![
            format!("NODE_ID={}", spec.node_id),
            format!("NODE_NAME={}", spec.node_name),
            format!("CPU_CORES={}", spec.cpu_cores),
            format!(
                "NODE_TYPE={}",
                if spec.kind == NodeKind::Master { "master" } else { "worker" }
            ),
            format!("API_SERVER={}", spec.api_server),
        ];

        let config = ContainerConfig {
            image: Some(self.node_sandbox_image.clone()),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;

        self.docker.start_container::<String>(&created.id, None).await?;

        Ok(SandboxHandle {
            sandbox_id: created.id,
            host: "127.0.0.1".to_string(),
            port: host_port,
        })
    }

    async fn start_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.docker.start_container::<String>(sandbox_id, None).await?;
        Ok(())
    }

    async fn stop_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.docker
            .stop_container(sandbox_id, Some(StopContainerOptions { t: 10 }))
            .await?;
        Ok(())
    }

    async fn remove_sandbox(&self, sandbox_id: &str) -> Result<()> {
        self.docker
            .remove_container(
                sandbox_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn get_sandbox_info(&self, sandbox_id: &str) -> Result<ContainerInfo> {
        self.get_container_info(sandbox_id).await
    }

    async fn create_pod_network(&self, name: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .docker
                .create_network(CreateNetworkOptions {
                    name: name.to_string(),
                    driver: "bridge".to_string(),
                    ..Default::default()
                })
                .await
            {
                Ok(resp) => return Ok(resp.id),
                Err(BollardError::DockerResponseServerError { status_code: 409, .. })
                    if attempt < NODE_NETWORK_CREATE_RETRIES =>
                {
                    // Another scheduling pass created it first; reuse it.
                    if self.network_exists(name).await? {
                        return Ok(name.to_string());
                    }
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        match self.docker.remove_network(name).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_networks_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let networks = self.docker.list_networks::<String>(None).await?;
        Ok(networks
            .into_iter()
            .filter_map(|n| n.name)
            .filter(|name| name.starts_with(prefix))
            .collect())
    }

    async fn create_volume(&self, name: &str) -> Result<String> {
        let resp = self
            .docker
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                ..Default::default()
            })
            .await?;
        Ok(resp.name)
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        match self.docker.remove_volume(name, None).await {
            Ok(()) => Ok(()),
            Err(BollardError::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let host_config = HostConfig {
            network_mode: Some(spec.network.clone()),
            cpu_quota: Some((spec.cpu_cores * 100_000.0) as i64),
            cpu_period: Some(100_000),
            memory: Some((spec.memory_mb as i64) * 1024 * 1024),
            ..Default::default()
        };

        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

        let config = ContainerConfig {
            image: Some(spec.image.clone()),
            cmd: spec.command.clone().map(|c| {
                let mut full = vec![c];
                full.extend(spec.args.clone());
                full
            }),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: spec.name.clone(),
                    platform: None,
                }),
                config,
            )
            .await?;
        Ok(created.id)
    }

    async fn start_container(&self, container_id: &str) -> Result<()> {
        self.docker.start_container::<String>(container_id, None).await?;
        Ok(())
    }

    async fn stop_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .stop_container(container_id, Some(StopContainerOptions { t: 5 }))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str) -> Result<()> {
        self.docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo> {
        let inspect = self
            .docker
            .inspect_container(container_id, None)
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError { status_code: 404, .. } => {
                    SandboxError::NotFound(container_id.to_string())
                }
                other => other.into(),
            })?;

        let state = inspect.state.as_ref();
        let status = Self::runtime_status_from_state(
            state.and_then(|s| s.status.as_ref()).map(|s| s.as_ref()),
        );
        let exit_code = state.and_then(|s| s.exit_code).map(|c| c as i32);
        let ip_address = inspect
            .network_settings
            .and_then(|ns| ns.networks)
            .and_then(|nets| nets.values().next().cloned())
            .and_then(|n| n.ip_address)
            .filter(|ip| !ip.is_empty());

        Ok(ContainerInfo {
            status,
            ip_address,
            exit_code,
        })
    }

    async fn check_responsiveness(&self, host: &str, port: u16) -> bool {
        let url = format!("http://{host}:{port}/status");
        reqwest::Client::new()
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}
