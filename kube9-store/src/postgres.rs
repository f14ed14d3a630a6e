use async_trait::async_trait;
use deadpool_postgres::Pool;
use kube9_types::{HeartbeatReport, Node, NodeComponents, NodeHealth, NodeId, Pod, PodHealth, PodId};

use crate::error::{Result, StoreError};
use crate::rows::{self, NODE_COLUMNS, POD_COLUMNS};
use crate::store::{NewNode, NewPod, Store};

/// Postgres-backed [`Store`]. Every multi-row mutation runs inside a
/// transaction obtained from the pool; no two in-flight requests can
/// observe a node's cpu accounting half-updated.
pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn pod_ids_for_node(
        client: &deadpool_postgres::Client,
        node_id: NodeId,
    ) -> Result<Vec<PodId>> {
        let rows = client
            .query("SELECT id FROM pods WHERE node_id = $1 ORDER BY id", &[&node_id])
            .await?;
        Ok(rows.iter().map(|r| r.get("id")).collect())
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn init_schema(&self) -> Result<()> {
        let client = self.pool.get().await?;

        client
            .batch_execute(
                r#"
                CREATE TABLE IF NOT EXISTS nodes (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    kind TEXT NOT NULL,
                    cpu_cores_total INT NOT NULL,
                    cpu_cores_avail INT NOT NULL,
                    health TEXT NOT NULL,
                    components JSONB NOT NULL,
                    last_heartbeat BIGINT,
                    heartbeat_interval_secs BIGINT NOT NULL,
                    max_heartbeat_interval_secs BIGINT NOT NULL,
                    recovery_attempts INT NOT NULL DEFAULT 0,
                    max_recovery_attempts INT NOT NULL,
                    sandbox JSONB
                );

                CREATE TABLE IF NOT EXISTS pods (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL,
                    cpu_cores_req INT NOT NULL,
                    kind TEXT NOT NULL,
                    address TEXT,
                    network_handle TEXT,
                    health TEXT NOT NULL,
                    node_id BIGINT REFERENCES nodes(id) ON DELETE SET NULL,
                    containers JSONB NOT NULL DEFAULT '[]',
                    volumes JSONB NOT NULL DEFAULT '[]',
                    config_items JSONB NOT NULL DEFAULT '[]'
                );

                CREATE INDEX IF NOT EXISTS idx_pods_node_id ON pods (node_id);
                "#,
            )
            .await?;

        tracing::info!("cluster store schema initialized");
        Ok(())
    }

    async fn create_node(&self, new_node: NewNode) -> Result<Node> {
        let client = self.pool.get().await?;
        let components = NodeComponents {
            worker: Default::default(),
            master: matches!(new_node.kind, kube9_types::NodeKind::Master)
                .then(kube9_types::MasterComponents::default),
        };
        let components_json = serde_json::to_value(&components)?;

        let query = format!(
            "INSERT INTO nodes (name, kind, cpu_cores_total, cpu_cores_avail, health, components, \
             heartbeat_interval_secs, max_heartbeat_interval_secs, recovery_attempts, max_recovery_attempts) \
             VALUES ($1, $2, $3, $3, $4, $5, $6, $7, 0, $8) RETURNING {NODE_COLUMNS}"
        );
        let row = client
            .query_one(
                &query,
                &[
                    &new_node.name,
                    &rows::node_kind_str(new_node.kind),
                    &new_node.cpu_cores_total,
                    &rows::node_health_str(NodeHealth::Initializing),
                    &components_json,
                    &new_node.heartbeat_interval_secs,
                    &new_node.max_heartbeat_interval_secs,
                    &new_node.max_recovery_attempts,
                ],
            )
            .await?;
        rows::node_from_row(&row, Vec::new())
    }

    async fn get_node(&self, id: NodeId) -> Result<Option<Node>> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = $1");
        let Some(row) = client.query_opt(&query, &[&id]).await? else {
            return Ok(None);
        };
        let pod_ids = Self::pod_ids_for_node(&client, id).await?;
        Ok(Some(rows::node_from_row(&row, pod_ids)?))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {NODE_COLUMNS} FROM nodes ORDER BY id");
        let node_rows = client.query(&query, &[]).await?;
        let mut out = Vec::with_capacity(node_rows.len());
        for row in &node_rows {
            let id: NodeId = row.get("id");
            let pod_ids = Self::pod_ids_for_node(&client, id).await?;
            out.push(rows::node_from_row(row, pod_ids)?);
        }
        Ok(out)
    }

    async fn delete_node(&self, id: NodeId) -> Result<bool> {
        let client = self.pool.get().await?;
        let affected = client.execute("DELETE FROM nodes WHERE id = $1", &[&id]).await?;
        Ok(affected > 0)
    }

    async fn set_node_sandbox(&self, id: NodeId, sandbox: Option<kube9_types::SandboxHandle>) -> Result<Option<Node>> {
        let client = self.pool.get().await?;
        let sandbox_json = sandbox.map(|s| serde_json::to_value(&s)).transpose()?;
        let query = format!("UPDATE nodes SET sandbox = $2 WHERE id = $1 RETURNING {NODE_COLUMNS}");
        let Some(row) = client.query_opt(&query, &[&id, &sandbox_json]).await? else {
            return Ok(None);
        };
        let pod_ids = Self::pod_ids_for_node(&client, id).await?;
        Ok(Some(rows::node_from_row(&row, pod_ids)?))
    }

    async fn set_node_health(&self, id: NodeId, health: NodeHealth) -> Result<Option<Node>> {
        let client = self.pool.get().await?;
        let query = format!("UPDATE nodes SET health = $2 WHERE id = $1 RETURNING {NODE_COLUMNS}");
        let Some(row) = client
            .query_opt(&query, &[&id, &rows::node_health_str(health)])
            .await?
        else {
            return Ok(None);
        };
        let pod_ids = Self::pod_ids_for_node(&client, id).await?;
        Ok(Some(rows::node_from_row(&row, pod_ids)?))
    }

    async fn set_node_components(&self, id: NodeId, components: NodeComponents) -> Result<Option<Node>> {
        let client = self.pool.get().await?;
        let components_json = serde_json::to_value(&components)?;
        let query = format!("UPDATE nodes SET components = $2 WHERE id = $1 RETURNING {NODE_COLUMNS}");
        let Some(row) = client.query_opt(&query, &[&id, &components_json]).await? else {
            return Ok(None);
        };
        let pod_ids = Self::pod_ids_for_node(&client, id).await?;
        Ok(Some(rows::node_from_row(&row, pod_ids)?))
    }

    async fn apply_heartbeat(&self, id: NodeId, report: &HeartbeatReport) -> Result<Option<Node>> {
        let mut client = self.pool.get().await?;
        let txn = client.transaction().await?;

        let existing = txn
            .query_opt("SELECT health FROM nodes WHERE id = $1 FOR UPDATE", &[&id])
            .await?;
        let Some(existing) = existing else {
            txn.rollback().await?;
            return Ok(None);
        };
        let prior_health: String = existing.get("health");
        let prior_health: NodeHealth = prior_health
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("health: {e}")))?;
        let reset_recovery = matches!(prior_health, NodeHealth::Recovering | NodeHealth::Failed);

        let now_ms = chrono::Utc::now().timestamp_millis();
        let components_json = serde_json::to_value(&report.components)?;

        let query = format!(
            "UPDATE nodes SET last_heartbeat = $2, cpu_cores_avail = $3, health = $4, components = $5, \
             recovery_attempts = CASE WHEN $6 THEN 0 ELSE recovery_attempts END \
             WHERE id = $1 RETURNING {NODE_COLUMNS}"
        );
        let row = txn
            .query_one(
                &query,
                &[
                    &id,
                    &now_ms,
                    &report.cpu_cores_avail,
                    &rows::node_health_str(report.health_status),
                    &components_json,
                    &reset_recovery,
                ],
            )
            .await?;
        let pod_ids = Self::pod_ids_for_node(&txn, id).await?;
        let node = rows::node_from_row(&row, pod_ids)?;
        txn.commit().await?;
        Ok(Some(node))
    }

    async fn increment_node_recovery_attempts(&self, id: NodeId) -> Result<Option<Node>> {
        let client = self.pool.get().await?;
        let query = format!(
            "UPDATE nodes SET recovery_attempts = recovery_attempts + 1 WHERE id = $1 RETURNING {NODE_COLUMNS}"
        );
        let Some(row) = client.query_opt(&query, &[&id]).await? else {
            return Ok(None);
        };
        let pod_ids = Self::pod_ids_for_node(&client, id).await?;
        Ok(Some(rows::node_from_row(&row, pod_ids)?))
    }

    async fn reset_node_recovery_attempts(&self, id: NodeId) -> Result<Option<Node>> {
        let client = self.pool.get().await?;
        let query = format!("UPDATE nodes SET recovery_attempts = 0 WHERE id = $1 RETURNING {NODE_COLUMNS}");
        let Some(row) = client.query_opt(&query, &[&id]).await? else {
            return Ok(None);
        };
        let pod_ids = Self::pod_ids_for_node(&client, id).await?;
        Ok(Some(rows::node_from_row(&row, pod_ids)?))
    }

    async fn create_pod(&self, new_pod: NewPod) -> Result<Pod> {
        let client = self.pool.get().await?;
        let containers_json = serde_json::to_value(&new_pod.containers)?;
        let volumes_json = serde_json::to_value(&new_pod.volumes)?;
        let config_items_json = serde_json::to_value(&new_pod.config_items)?;

        let query = format!(
            "INSERT INTO pods (name, cpu_cores_req, kind, health, containers, volumes, config_items) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {POD_COLUMNS}"
        );
        let row = client
            .query_one(
                &query,
                &[
                    &new_pod.name,
                    &new_pod.cpu_cores_req,
                    &rows::pod_kind_str(new_pod.kind),
                    &rows::pod_health_str(PodHealth::Pending),
                    &containers_json,
                    &volumes_json,
                    &config_items_json,
                ],
            )
            .await?;
        rows::pod_from_row(&row)
    }

    async fn get_pod(&self, id: PodId) -> Result<Option<Pod>> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {POD_COLUMNS} FROM pods WHERE id = $1");
        let row = client.query_opt(&query, &[&id]).await?;
        row.as_ref().map(rows::pod_from_row).transpose()
    }

    async fn list_pods(&self) -> Result<Vec<Pod>> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {POD_COLUMNS} FROM pods ORDER BY id");
        let pod_rows = client.query(&query, &[]).await?;
        pod_rows.iter().map(rows::pod_from_row).collect()
    }

    async fn list_pods_for_node(&self, node_id: NodeId) -> Result<Vec<Pod>> {
        let client = self.pool.get().await?;
        let query = format!("SELECT {POD_COLUMNS} FROM pods WHERE node_id = $1 ORDER BY id");
        let pod_rows = client.query(&query, &[&node_id]).await?;
        pod_rows.iter().map(rows::pod_from_row).collect()
    }

    async fn delete_pod(&self, id: PodId) -> Result<bool> {
        let client = self.pool.get().await?;
        let affected = client.execute("DELETE FROM pods WHERE id = $1", &[&id]).await?;
        Ok(affected > 0)
    }

    async fn set_pod_health(&self, id: PodId, health: PodHealth) -> Result<Option<Pod>> {
        let client = self.pool.get().await?;
        let query = format!("UPDATE pods SET health = $2 WHERE id = $1 RETURNING {POD_COLUMNS}");
        let row = client
            .query_opt(&query, &[&id, &rows::pod_health_str(health)])
            .await?;
        row.as_ref().map(rows::pod_from_row).transpose()
    }

    async fn set_pod_network(
        &self,
        id: PodId,
        address: Option<String>,
        network_handle: Option<String>,
    ) -> Result<Option<Pod>> {
        let client = self.pool.get().await?;
        let query = format!(
            "UPDATE pods SET address = $2, network_handle = $3 WHERE id = $1 RETURNING {POD_COLUMNS}"
        );
        let row = client.query_opt(&query, &[&id, &address, &network_handle]).await?;
        row.as_ref().map(rows::pod_from_row).transpose()
    }

    async fn schedule_pod(&self, pod_id: PodId, node_id: NodeId) -> Result<Pod> {
        let mut client = self.pool.get().await?;
        let txn = client.transaction().await?;

        let node_row = txn
            .query_opt(
                "SELECT cpu_cores_avail FROM nodes WHERE id = $1 FOR UPDATE",
                &[&node_id],
            )
            .await?
            .ok_or(StoreError::NodeNotFound(node_id))?;
        let avail: i32 = node_row.get("cpu_cores_avail");

        let pod_row = txn
            .query_opt(
                "SELECT cpu_cores_req FROM pods WHERE id = $1 FOR UPDATE",
                &[&pod_id],
            )
            .await?
            .ok_or(StoreError::PodNotFound(pod_id))?;
        let required: i32 = pod_row.get("cpu_cores_req");

        if avail < required {
            txn.rollback().await?;
            return Err(StoreError::InsufficientCpu {
                node_id,
                requested: required,
                available: avail,
            });
        }

        txn.execute(
            "UPDATE nodes SET cpu_cores_avail = cpu_cores_avail - $2 WHERE id = $1",
            &[&node_id, &required],
        )
        .await?;

        let query = format!(
            "UPDATE pods SET node_id = $2, health = $3 WHERE id = $1 RETURNING {POD_COLUMNS}"
        );
        let row = txn
            .query_one(&query, &[&pod_id, &node_id, &rows::pod_health_str(PodHealth::Running)])
            .await?;
        let pod = rows::pod_from_row(&row)?;
        txn.commit().await?;
        Ok(pod)
    }

    async fn release_pod(&self, pod_id: PodId, health_after: PodHealth) -> Result<Pod> {
        let mut client = self.pool.get().await?;
        let txn = client.transaction().await?;

        let pod_row = txn
            .query_opt(
                "SELECT node_id, cpu_cores_req FROM pods WHERE id = $1 FOR UPDATE",
                &[&pod_id],
            )
            .await?
            .ok_or(StoreError::PodNotFound(pod_id))?;
        let prior_node_id: Option<NodeId> = pod_row.get("node_id");
        let required: i32 = pod_row.get("cpu_cores_req");

        if let Some(node_id) = prior_node_id {
            txn.execute(
                "UPDATE nodes SET cpu_cores_avail = cpu_cores_avail + $2 WHERE id = $1",
                &[&node_id, &required],
            )
            .await?;
        }

        let query = format!(
            "UPDATE pods SET node_id = NULL, health = $2 WHERE id = $1 RETURNING {POD_COLUMNS}"
        );
        let row = txn
            .query_one(&query, &[&pod_id, &rows::pod_health_str(health_after)])
            .await?;
        let pod = rows::pod_from_row(&row)?;
        txn.commit().await?;
        Ok(pod)
    }

    async fn reschedule_pod(&self, pod_id: PodId, target_node_id: NodeId) -> Result<Pod> {
        let mut client = self.pool.get().await?;
        let txn = client.transaction().await?;

        let pod_row = txn
            .query_opt(
                "SELECT node_id, cpu_cores_req FROM pods WHERE id = $1 FOR UPDATE",
                &[&pod_id],
            )
            .await?
            .ok_or(StoreError::PodNotFound(pod_id))?;
        let prior_node_id: Option<NodeId> = pod_row.get("node_id");
        let required: i32 = pod_row.get("cpu_cores_req");

        // Lock source and target node rows in ascending id order so a
        // concurrent reschedule moving a pod the other way can't
        // deadlock against this one.
        let mut lock_ids: Vec<NodeId> = prior_node_id.into_iter().chain([target_node_id]).collect();
        lock_ids.sort_unstable();
        lock_ids.dedup();
        for id in &lock_ids {
            txn.query_opt("SELECT id FROM nodes WHERE id = $1 FOR UPDATE", &[id])
                .await?
                .ok_or(StoreError::NodeNotFound(*id))?;
        }

        let target_row = txn
            .query_one("SELECT cpu_cores_avail FROM nodes WHERE id = $1", &[&target_node_id])
            .await?;
        let avail: i32 = target_row.get("cpu_cores_avail");
        if avail < required {
            txn.rollback().await?;
            return Err(StoreError::InsufficientCpu {
                node_id: target_node_id,
                requested: required,
                available: avail,
            });
        }

        if let Some(node_id) = prior_node_id {
            txn.execute(
                "UPDATE nodes SET cpu_cores_avail = cpu_cores_avail + $2 WHERE id = $1",
                &[&node_id, &required],
            )
            .await?;
        }
        txn.execute(
            "UPDATE nodes SET cpu_cores_avail = cpu_cores_avail - $2 WHERE id = $1",
            &[&target_node_id, &required],
        )
        .await?;

        let query = format!(
            "UPDATE pods SET node_id = $2, health = $3 WHERE id = $1 RETURNING {POD_COLUMNS}"
        );
        let row = txn
            .query_one(
                &query,
                &[&pod_id, &target_node_id, &rows::pod_health_str(PodHealth::Running)],
            )
            .await?;
        let pod = rows::pod_from_row(&row)?;
        txn.commit().await?;
        Ok(pod)
    }
}
