use chrono::{DateTime, Utc};
use kube9_types::{
    ConfigItem, Container, Node, NodeComponents, NodeHealth, NodeId, NodeKind, Pod, PodHealth,
    PodId, PodKind, SandboxHandle, Volume,
};
use tokio_postgres::Row;

use crate::error::{Result, StoreError};

fn corrupt(field: &str, err: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(format!("column `{field}`: {err}"))
}

pub fn node_from_row(row: &Row, pod_ids: Vec<PodId>) -> Result<Node> {
    let id: NodeId = row.get("id");
    let kind_str: String = row.get("kind");
    let health_str: String = row.get("health");
    let components_json: serde_json::Value = row.get("components");
    let sandbox_json: Option<serde_json::Value> = row.get("sandbox");
    let last_heartbeat_ms: Option<i64> = row.get("last_heartbeat");

    Ok(Node {
        id,
        name: row.get("name"),
        kind: kind_str.parse().map_err(|e| corrupt("kind", e))?,
        cpu_cores_total: row.get("cpu_cores_total"),
        cpu_cores_avail: row.get("cpu_cores_avail"),
        health: health_str.parse().map_err(|e| corrupt("health", e))?,
        components: serde_json::from_value::<NodeComponents>(components_json)?,
        last_heartbeat: last_heartbeat_ms.and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms)),
        heartbeat_interval_secs: row.get("heartbeat_interval_secs"),
        max_heartbeat_interval_secs: row.get("max_heartbeat_interval_secs"),
        recovery_attempts: row.get("recovery_attempts"),
        max_recovery_attempts: row.get("max_recovery_attempts"),
        sandbox: sandbox_json
            .map(serde_json::from_value::<SandboxHandle>)
            .transpose()?,
        pod_ids,
    })
}

pub fn pod_from_row(row: &Row) -> Result<Pod> {
    let kind_str: String = row.get("kind");
    let health_str: String = row.get("health");
    let containers_json: serde_json::Value = row.get("containers");
    let volumes_json: serde_json::Value = row.get("volumes");
    let config_items_json: serde_json::Value = row.get("config_items");

    Ok(Pod {
        id: row.get("id"),
        name: row.get("name"),
        cpu_cores_req: row.get("cpu_cores_req"),
        kind: kind_str.parse().map_err(|e| corrupt("kind", e))?,
        address: row.get("address"),
        network_handle: row.get("network_handle"),
        health: health_str.parse().map_err(|e| corrupt("health", e))?,
        node_id: row.get("node_id"),
        containers: serde_json::from_value::<Vec<Container>>(containers_json)?,
        volumes: serde_json::from_value::<Vec<Volume>>(volumes_json)?,
        config_items: serde_json::from_value::<Vec<ConfigItem>>(config_items_json)?,
    })
}

pub const NODE_COLUMNS: &str = "id, name, kind, cpu_cores_total, cpu_cores_avail, health, \
    components, last_heartbeat, heartbeat_interval_secs, max_heartbeat_interval_secs, \
    recovery_attempts, max_recovery_attempts, sandbox";

pub const POD_COLUMNS: &str = "id, name, cpu_cores_req, kind, address, network_handle, health, \
    node_id, containers, volumes, config_items";

pub fn node_kind_str(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Worker => "worker",
        NodeKind::Master => "master",
    }
}

pub fn node_health_str(health: NodeHealth) -> &'static str {
    match health {
        NodeHealth::Initializing => "initializing",
        NodeHealth::Healthy => "healthy",
        NodeHealth::Recovering => "recovering",
        NodeHealth::Failed => "failed",
        NodeHealth::PermanentlyFailed => "permanently_failed",
    }
}

pub fn pod_health_str(health: PodHealth) -> &'static str {
    match health {
        PodHealth::Pending => "pending",
        PodHealth::Running => "running",
        PodHealth::Rescheduled => "rescheduled",
        PodHealth::Failed => "failed",
        PodHealth::Terminated => "terminated",
    }
}

pub fn pod_kind_str(kind: PodKind) -> &'static str {
    match kind {
        PodKind::SingleContainer => "single-container",
        PodKind::MultiContainer => "multi-container",
    }
}
