//! HTTP handlers for the control plane's ingress (spec.md §6). Each
//! handler talks only to the `Store`/`SandboxDriver` trait objects in
//! `AppState` — no SQL or Docker calls happen here directly.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kube9_control::heartbeat;
use kube9_sandbox::NodeSandboxSpec;
use kube9_scheduler::NodeCandidate;
use kube9_store::{NewNode, NewPod};
use kube9_types::{Container, ContainerStatus, HeartbeatReport, HeartbeatResponse, NodeHealth, NodeId, PodHealth, PodId, Volume};

use kube9_common::response::{bad_request, conflict, internal_server_error, not_found};

use crate::models::{
    ConfigItemRequest, ContainerRequest, CreateNodeRequest, CreatePodRequest, NodeResponse,
    PodHealthResponse, PodResponse, VolumeRequest,
};
use crate::server::AppState;

pub async fn health() -> impl IntoResponse {
    "OK"
}

fn store_err(e: impl std::fmt::Display + std::fmt::Debug + Into<anyhow::Error>) -> Response {
    internal_server_error(e)
}

// --- nodes ---

pub async fn create_node(
    State(state): State<AppState>,
    Json(req): Json<CreateNodeRequest>,
) -> Result<Response, Response> {
    if req.name.trim().is_empty() {
        return Err(bad_request(anyhow::anyhow!("node name must not be empty")));
    }
    if req.cpu_cores_total <= 0 {
        return Err(bad_request(anyhow::anyhow!("cpu_cores_total must be positive")));
    }

    let new_node = NewNode {
        name: req.name.clone(),
        kind: req.node_type,
        cpu_cores_total: req.cpu_cores_total,
        heartbeat_interval_secs: req
            .heartbeat_interval_secs
            .unwrap_or(kube9_types::DEFAULT_HEARTBEAT_INTERVAL_SECS),
        max_heartbeat_interval_secs: req
            .max_heartbeat_interval_secs
            .unwrap_or(kube9_types::DEFAULT_MAX_HEARTBEAT_INTERVAL_SECS),
        max_recovery_attempts: req
            .max_recovery_attempts
            .unwrap_or(kube9_types::DEFAULT_MAX_RECOVERY_ATTEMPTS),
    };

    let node = state.store.create_node(new_node).await.map_err(|e| {
        if e.to_string().contains("duplicate key") {
            conflict(anyhow::anyhow!("node name {:?} already taken", req.name))
        } else {
            store_err(e)
        }
    })?;

    if let Err(e) = state.sandbox.ensure_node_network().await {
        let _ = state.store.delete_node(node.id).await;
        return Err(bad_request(anyhow::anyhow!("sandbox network unavailable: {e}")));
    }

    let spec = NodeSandboxSpec {
        node_id: node.id,
        node_name: node.name.clone(),
        cpu_cores: node.cpu_cores_total,
        kind: node.kind,
        api_server: state.api_server.clone(),
    };

    let handle = match state.sandbox.provision_node_sandbox(&spec).await {
        Ok(handle) => handle,
        Err(e) => {
            tracing::warn!(node_id = node.id, error = %e, "create_node: sandbox provisioning failed, rolling back");
            let _ = state.store.delete_node(node.id).await;
            return Err(bad_request(anyhow::anyhow!("failed to provision node sandbox: {e}")));
        }
    };

    let node = state
        .store
        .set_node_sandbox(node.id, Some(handle))
        .await
        .map_err(store_err)?
        .ok_or_else(|| not_found(anyhow::anyhow!("node {} vanished mid-create", node.id)))?;

    Ok((StatusCode::CREATED, Json(NodeResponse::from(node))).into_response())
}

pub async fn list_nodes(State(state): State<AppState>) -> Result<Response, Response> {
    let nodes = state.store.list_nodes().await.map_err(store_err)?;
    let out: Vec<NodeResponse> = nodes.into_iter().map(NodeResponse::from).collect();
    Ok(Json(out).into_response())
}

pub async fn get_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
) -> Result<Response, Response> {
    let node = state
        .store
        .get_node(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| not_found(anyhow::anyhow!("node {id} not found")))?;
    Ok(Json(NodeResponse::from(node)).into_response())
}

pub async fn delete_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
) -> Result<Response, Response> {
    let node = state
        .store
        .get_node(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| not_found(anyhow::anyhow!("node {id} not found")))?;

    if !node.pod_ids.is_empty() && node.health != NodeHealth::PermanentlyFailed {
        return Err(bad_request(anyhow::anyhow!(
            "node {id} still hosts {} pod(s)",
            node.pod_ids.len()
        )));
    }

    if let Some(handle) = &node.sandbox
        && let Err(e) = state.sandbox.remove_sandbox(&handle.sandbox_id).await
    {
        tracing::warn!(node_id = id, error = %e, "delete_node: failed to remove sandbox, deleting row anyway");
    }

    state.store.delete_node(id).await.map_err(store_err)?;
    Ok(StatusCode::OK.into_response())
}

/// `POST /nodes/{id}/heartbeat` (spec.md §6, §4.D).
pub async fn node_heartbeat(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
    Json(req): Json<crate::models::HeartbeatRequest>,
) -> Response {
    match state.store.get_node(id).await {
        Ok(None) => {
            return (StatusCode::NOT_FOUND, Json(HeartbeatResponse::stop())).into_response();
        }
        Ok(Some(_)) => {}
        Err(e) => return store_err(e),
    }

    let report = HeartbeatReport {
        pod_ids: req.pod_ids,
        cpu_cores_avail: req.cpu_cores_avail,
        health_status: req.health_status,
        components: req.components,
    };

    match heartbeat::ingest_heartbeat(state.store.as_ref(), id, report).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => store_err(e),
    }
}

/// `POST /nodes/{id}/simulate/failure` — flips the node to `failed` so
/// the Node Reconciler picks it up on its next tick (spec.md §6).
pub async fn simulate_node_failure(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
) -> Result<Response, Response> {
    let node = state
        .store
        .set_node_health(id, NodeHealth::Failed)
        .await
        .map_err(store_err)?
        .ok_or_else(|| not_found(anyhow::anyhow!("node {id} not found")))?;
    Ok(Json(NodeResponse::from(node)).into_response())
}

/// `POST /nodes/{id}/deregister` — a node announcing its own shutdown.
/// Treated the same as a detected permanent failure so the Pod
/// Rescheduler relocates its pods on its next pass; a graceful exit and
/// a crash converge on the same recovery path.
pub async fn deregister_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
) -> Result<Response, Response> {
    let node = state
        .store
        .set_node_health(id, NodeHealth::PermanentlyFailed)
        .await
        .map_err(store_err)?
        .ok_or_else(|| not_found(anyhow::anyhow!("node {id} not found")))?;
    state.reschedule_signal.mark();
    Ok(Json(NodeResponse::from(node)).into_response())
}

/// `POST /nodes/{id}/force_cleanup` — reaper on demand (spec.md §6, §8
/// invariant I3): only valid once a node is `permanently_failed`.
pub async fn force_cleanup_node(
    State(state): State<AppState>,
    Path(id): Path<NodeId>,
) -> Result<Response, Response> {
    let node = state
        .store
        .get_node(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| not_found(anyhow::anyhow!("node {id} not found")))?;

    if node.health != NodeHealth::PermanentlyFailed {
        return Err(bad_request(anyhow::anyhow!(
            "node {id} is not permanently_failed, nothing to clean up"
        )));
    }

    if let Some(handle) = &node.sandbox
        && let Err(e) = state.sandbox.remove_sandbox(&handle.sandbox_id).await
    {
        tracing::warn!(node_id = id, error = %e, "force_cleanup: sandbox removal failed");
    }

    let node = state
        .store
        .set_node_sandbox(id, None)
        .await
        .map_err(store_err)?
        .ok_or_else(|| not_found(anyhow::anyhow!("node {id} vanished mid-cleanup")))?;

    Ok(Json(NodeResponse::from(node)).into_response())
}

// --- pods ---

fn container_specs(reqs: Vec<ContainerRequest>) -> Vec<Container> {
    reqs.into_iter()
        .enumerate()
        .map(|(i, c)| Container {
            id: (i + 1) as i64,
            name: c.name,
            image: c.image,
            cpu_cores_req: c.cpu_cores_req,
            memory_mb: c.memory_mb,
            command: c.command,
            args: c.args,
            runtime: None,
            status: ContainerStatus::Pending,
        })
        .collect()
}

fn volume_specs(reqs: Vec<VolumeRequest>) -> Vec<Volume> {
    reqs.into_iter()
        .enumerate()
        .map(|(i, v)| Volume {
            id: (i + 1) as i64,
            name: v.name,
            kind: v.kind,
            size_gb: v.size_gb,
            mount_path: v.mount_path,
            runtime_volume_name: None,
        })
        .collect()
}

fn config_item_specs(reqs: Vec<ConfigItemRequest>) -> Vec<kube9_types::ConfigItem> {
    reqs.into_iter()
        .enumerate()
        .map(|(i, c)| kube9_types::ConfigItem {
            id: (i + 1) as i64,
            name: c.name,
            kind: c.kind,
            key: c.key,
            value: c.value,
        })
        .collect()
}

pub async fn create_pod(
    State(state): State<AppState>,
    Json(req): Json<CreatePodRequest>,
) -> Result<Response, Response> {
    if req.name.trim().is_empty() {
        return Err(bad_request(anyhow::anyhow!("pod name must not be empty")));
    }
    if req.cpu_cores_req <= 0 {
        return Err(bad_request(anyhow::anyhow!("cpu_cores_req must be positive")));
    }

    let new_pod = NewPod {
        name: req.name.clone(),
        cpu_cores_req: req.cpu_cores_req,
        kind: req.kind,
        containers: container_specs(req.containers),
        volumes: volume_specs(req.volumes),
        config_items: config_item_specs(req.config),
    };

    let pod = state.store.create_pod(new_pod).await.map_err(|e| {
        if e.to_string().contains("duplicate key") {
            conflict(anyhow::anyhow!("pod name {:?} already taken", req.name))
        } else {
            store_err(e)
        }
    })?;

    let nodes = state.store.list_nodes().await.map_err(store_err)?;
    let candidates: Vec<NodeCandidate> = nodes
        .iter()
        .map(|n| NodeCandidate {
            id: n.id,
            kind: n.kind,
            health: n.health,
            cpu_cores_avail: n.cpu_cores_avail,
            kubelet: n.components.worker.kubelet,
            container_runtime: n.components.worker.container_runtime,
        })
        .collect();

    let Some(target) = kube9_scheduler::select_best_fit_node(&candidates, pod.cpu_cores_req)
    else {
        let _ = state.store.delete_pod(pod.id).await;
        return Err(bad_request(anyhow::anyhow!("no available worker node")));
    };

    let pod = state
        .store
        .schedule_pod(pod.id, target)
        .await
        .map_err(store_err)?;

    let address = state.pod_ip_allocator.allocate();
    let pod = state
        .store
        .set_pod_network(pod.id, Some(address), None)
        .await
        .map_err(store_err)?
        .unwrap_or(pod);

    if let Err(e) = run_pod_on_sandbox(&state, target, &pod).await {
        tracing::warn!(pod_id = pod.id, node_id = target, error = %e, "create_pod: sandbox run_pod failed");
    }

    Ok((StatusCode::CREATED, Json(PodResponse::from(pod))).into_response())
}

async fn run_pod_on_sandbox(
    state: &AppState,
    node_id: NodeId,
    pod: &kube9_types::Pod,
) -> anyhow::Result<()> {
    let Some(node) = state.store.get_node(node_id).await? else {
        return Ok(());
    };
    let Some(handle) = &node.sandbox else {
        return Ok(());
    };
    let url = format!("http://{}:{}/run_pod", handle.host, handle.port);
    let body = serde_json::json!({
        "pod_id": pod.id,
        "pod_spec": {
            "name": pod.name,
            "cpu_cores_req": pod.cpu_cores_req,
            "ip_address": pod.address,
            "containers": pod.containers.iter().map(|c| serde_json::json!({
                "name": c.name,
                "image": c.image,
                "command": c.command,
                "args": c.args,
                "cpu_req": c.cpu_cores_req,
                "memory_req": c.memory_mb,
            })).collect::<Vec<_>>(),
        },
    });
    state.http.post(url).json(&body).send().await?;
    Ok(())
}

pub async fn list_pods(State(state): State<AppState>) -> Result<Response, Response> {
    let pods = state.store.list_pods().await.map_err(store_err)?;
    let out: Vec<PodResponse> = pods.into_iter().map(PodResponse::from).collect();
    Ok(Json(out).into_response())
}

pub async fn get_pod(
    State(state): State<AppState>,
    Path(id): Path<PodId>,
) -> Result<Response, Response> {
    let pod = state
        .store
        .get_pod(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| not_found(anyhow::anyhow!("pod {id} not found")))?;
    Ok(Json(PodResponse::from(pod)).into_response())
}

pub async fn delete_pod(
    State(state): State<AppState>,
    Path(id): Path<PodId>,
) -> Result<Response, Response> {
    let pod = state
        .store
        .get_pod(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| not_found(anyhow::anyhow!("pod {id} not found")))?;

    if let Some(node_id) = pod.node_id
        && let Ok(Some(node)) = state.store.get_node(node_id).await
        && let Some(handle) = &node.sandbox
    {
        let url = format!("http://{}:{}/pods/{}", handle.host, handle.port, pod.id);
        let _ = state.http.delete(url).send().await;
    }

    let _ = state.store.release_pod(pod.id, PodHealth::Terminated).await;
    state.store.delete_pod(id).await.map_err(store_err)?;
    Ok(StatusCode::OK.into_response())
}

/// `GET /pods/{id}/health` — proxies a liveness probe to the hosting
/// node's sandbox (spec.md §6 egress `GET /status`).
pub async fn pod_health(
    State(state): State<AppState>,
    Path(id): Path<PodId>,
) -> Result<Response, Response> {
    let pod = state
        .store
        .get_pod(id)
        .await
        .map_err(store_err)?
        .ok_or_else(|| not_found(anyhow::anyhow!("pod {id} not found")))?;

    let node_reachable = match pod.node_id {
        Some(node_id) => match state.store.get_node(node_id).await {
            Ok(Some(node)) => match &node.sandbox {
                Some(handle) => state.sandbox.check_responsiveness(&handle.host, handle.port).await,
                None => false,
            },
            _ => false,
        },
        None => false,
    };

    Ok(Json(PodHealthResponse {
        pod_id: pod.id,
        health: pod.health,
        node_reachable,
    })
    .into_response())
}
