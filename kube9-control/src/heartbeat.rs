//! The Heartbeat Tracker (spec.md §4.D). Ingests reports pushed by node
//! sandboxes and, on a periodic sweep, flags nodes whose heartbeat has
//! gone stale. Grounded in `monitor.py`'s `monitor_node_health` thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use kube9_sandbox::{RuntimeStatus, SandboxDriver};
use kube9_store::Store;
use kube9_types::{HeartbeatReport, HeartbeatResponse, NodeHealth, NodeId};
use tokio_util::sync::CancellationToken;

use crate::rescheduler::RescheduleSignal;

/// Node sandboxes get this long after process start before a missing
/// heartbeat counts as staleness (spec.md §4.D `STARTUP_GRACE_PERIOD`).
const STARTUP_GRACE_PERIOD: Duration = Duration::from_secs(30);

/// Applies an incoming heartbeat report and tells the sandbox what to
/// do next. A `permanently_failed` node tells its sandbox to stop
/// heartbeating and terminate outright — the rescheduler already owns
/// its pods by the time this happens.
pub async fn ingest_heartbeat(
    store: &dyn Store,
    node_id: NodeId,
    report: HeartbeatReport,
) -> kube9_store::Result<HeartbeatResponse> {
    let Some(node) = store.apply_heartbeat(node_id, &report).await? else {
        return Ok(HeartbeatResponse::stop());
    };

    if node.health == NodeHealth::PermanentlyFailed {
        return Ok(HeartbeatResponse::terminate());
    }

    Ok(HeartbeatResponse::ok(node.health))
}

/// Sweeps every node once per tick, marking any whose heartbeat has
/// exceeded `max_heartbeat_interval_secs` as `failed`. Also polls each
/// remaining healthy node's sandbox status and marks it `failed` if the
/// sandbox isn't `running` anymore — folded in from the original's
/// separate `monitor_containers` loop (spec.md §4.D supplement) rather
/// than run as its own loop, since both checks land on the same
/// transition. This does *not* touch `recovery_attempts` — only the
/// Node Reconciler's restart attempts count toward the recovery budget
/// (spec.md §9 design note). A node carried into `failed` here also
/// marks the shared `RescheduleSignal`, since the reconciler may escalate
/// it straight to `permanently_failed` on the very next tick and the
/// rescheduler should already be primed to look.
pub async fn sweep_once(
    store: &dyn Store,
    sandbox: &dyn SandboxDriver,
    signal: &RescheduleSignal,
    process_started_at: Instant,
) {
    let nodes = match store.list_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            tracing::warn!(error = %e, "heartbeat sweep: failed to list nodes");
            return;
        }
    };

    let now = Utc::now();
    for node in nodes {
        if !matches!(node.health, NodeHealth::Healthy | NodeHealth::Recovering) {
            continue;
        }

        let stale = match node.last_heartbeat {
            Some(last) => {
                let elapsed = (now - last).num_seconds().max(0) as u64;
                elapsed > node.max_heartbeat_interval_secs as u64
            }
            None => process_started_at.elapsed() > STARTUP_GRACE_PERIOD,
        };

        let sandbox_down = match &node.sandbox {
            Some(handle) => match sandbox.get_sandbox_info(&handle.sandbox_id).await {
                Ok(info) => info.status != RuntimeStatus::Running,
                Err(e) => {
                    tracing::warn!(node_id = node.id, error = %e, "heartbeat: failed to poll sandbox status");
                    false
                }
            },
            None => false,
        };

        if stale || sandbox_down {
            tracing::warn!(node_id = node.id, node_name = %node.name, sandbox_down, "heartbeat: node went stale, marking failed");
            match store.set_node_health(node.id, NodeHealth::Failed).await {
                Ok(_) => signal.mark(),
                Err(e) => tracing::warn!(node_id = node.id, error = %e, "heartbeat: failed to mark node failed"),
            }
        }
    }
}

/// Runs [`sweep_once`] on an interval until `cancel` fires.
pub async fn run(
    store: Arc<dyn Store>,
    sandbox: Arc<dyn SandboxDriver>,
    signal: Arc<RescheduleSignal>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let process_started_at = Instant::now();
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => sweep_once(store.as_ref(), sandbox.as_ref(), signal.as_ref(), process_started_at).await,
            _ = cancel.cancelled() => {
                tracing::info!("heartbeat tracker shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube9_sandbox::fake::FakeSandboxDriver;
    use kube9_store::NewNode;
    use kube9_store::memory::InMemoryStore;
    use kube9_types::{NodeComponents, SandboxHandle};

    fn worker() -> NewNode {
        NewNode {
            name: "worker".into(),
            kind: kube9_types::NodeKind::Worker,
            cpu_cores_total: 4,
            heartbeat_interval_secs: 60,
            max_heartbeat_interval_secs: 120,
            max_recovery_attempts: 3,
        }
    }

    fn healthy_report() -> HeartbeatReport {
        HeartbeatReport {
            pod_ids: Vec::new(),
            cpu_cores_avail: 4,
            health_status: NodeHealth::Healthy,
            components: NodeComponents::default(),
        }
    }

    #[tokio::test]
    async fn ingest_heartbeat_for_unknown_node_tells_sandbox_to_stop() {
        let store = InMemoryStore::new();
        let resp = ingest_heartbeat(&store, 999, healthy_report()).await.unwrap();
        assert!(resp.should_stop_heartbeat);
    }

    #[tokio::test]
    async fn ingest_heartbeat_reporting_permanent_failure_tells_sandbox_to_terminate() {
        let store = InMemoryStore::new();
        let node = store.create_node(worker()).await.unwrap();

        let mut report = healthy_report();
        report.health_status = NodeHealth::PermanentlyFailed;

        let resp = ingest_heartbeat(&store, node.id, report).await.unwrap();
        assert!(resp.should_terminate);
    }

    #[tokio::test]
    async fn sweep_leaves_a_recently_heartbeated_node_healthy() {
        let store = InMemoryStore::new();
        let sandbox = FakeSandboxDriver::new();
        let node = store.create_node(worker()).await.unwrap();
        store.apply_heartbeat(node.id, &healthy_report()).await.unwrap();
        let signal = RescheduleSignal::new();

        sweep_once(&store, &sandbox, &signal, Instant::now() - Duration::from_secs(200)).await;

        let after = store.get_node(node.id).await.unwrap().unwrap();
        assert_eq!(after.health, NodeHealth::Healthy);
    }

    #[tokio::test]
    async fn sweep_marks_node_failed_when_never_heartbeated_past_startup_grace() {
        let store = InMemoryStore::new();
        let sandbox = FakeSandboxDriver::new();
        let node = store.create_node(worker()).await.unwrap();
        store.set_node_health(node.id, NodeHealth::Healthy).await.unwrap();
        let signal = RescheduleSignal::new();

        sweep_once(&store, &sandbox, &signal, Instant::now() - Duration::from_secs(60)).await;

        let after = store.get_node(node.id).await.unwrap().unwrap();
        assert_eq!(after.health, NodeHealth::Failed);
        assert!(signal.take());
    }

    #[tokio::test]
    async fn sweep_marks_node_failed_when_its_sandbox_has_exited() {
        let store = InMemoryStore::new();
        let sandbox = FakeSandboxDriver::new();
        let node = store.create_node(worker()).await.unwrap();
        store.apply_heartbeat(node.id, &healthy_report()).await.unwrap();
        let signal = RescheduleSignal::new();

        sandbox.seed_sandbox("sbx-1", kube9_sandbox::RuntimeStatus::Exited);
        store
            .set_node_sandbox(
                node.id,
                Some(SandboxHandle {
                    sandbox_id: "sbx-1".into(),
                    host: "127.0.0.1".into(),
                    port: SandboxHandle::port_for(node.id),
                }),
            )
            .await
            .unwrap();

        sweep_once(&store, &sandbox, &signal, Instant::now()).await;

        let after = store.get_node(node.id).await.unwrap().unwrap();
        assert_eq!(after.health, NodeHealth::Failed);
        assert!(signal.take());
    }
}
