//! The Sandbox Reaper (spec.md §4.E/§5 fourth background loop; §8
//! invariant I3). Tears down the sandbox container for every
//! `permanently_failed` node and clears its handle, so a node never
//! sits `permanently_failed` while still holding a live sandbox.
//! Mirrors [`crate::node_reconciler`]'s per-node sweep shape but owns a
//! separate, narrower decision: a node either still needs reaping or it
//! doesn't.

use std::sync::Arc;
use std::time::Duration;

use kube9_sandbox::SandboxDriver;
use kube9_store::Store;
use kube9_types::NodeHealth;
use tokio_util::sync::CancellationToken;

/// One reap pass: every `permanently_failed` node still holding a
/// sandbox handle has its sandbox removed and the handle cleared.
pub async fn reap_once(store: &dyn Store, sandbox: &dyn SandboxDriver) {
    let nodes = match store.list_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            tracing::warn!(error = %e, "reaper: failed to list nodes");
            return;
        }
    };

    for node in nodes {
        if node.health != NodeHealth::PermanentlyFailed {
            continue;
        }
        let Some(handle) = &node.sandbox else { continue };

        if let Err(e) = sandbox.remove_sandbox(&handle.sandbox_id).await {
            tracing::warn!(node_id = node.id, error = %e, "reaper: failed to remove sandbox");
            continue;
        }

        if let Err(e) = store.set_node_sandbox(node.id, None).await {
            tracing::warn!(node_id = node.id, error = %e, "reaper: failed to clear sandbox handle");
            continue;
        }

        tracing::info!(node_id = node.id, "reaper: sandbox torn down");
    }
}

/// Runs [`reap_once`] on an interval until `cancel` fires.
pub async fn run(
    store: Arc<dyn Store>,
    sandbox: Arc<dyn SandboxDriver>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => reap_once(store.as_ref(), sandbox.as_ref()).await,
            _ = cancel.cancelled() => {
                tracing::info!("sandbox reaper shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube9_sandbox::RuntimeStatus;
    use kube9_sandbox::fake::FakeSandboxDriver;
    use kube9_store::NewNode;
    use kube9_store::memory::InMemoryStore;
    use kube9_types::{NodeKind, SandboxHandle};

    fn worker() -> NewNode {
        NewNode {
            name: "worker".into(),
            kind: NodeKind::Worker,
            cpu_cores_total: 2,
            heartbeat_interval_secs: 60,
            max_heartbeat_interval_secs: 120,
            max_recovery_attempts: 3,
        }
    }

    #[tokio::test]
    async fn permanently_failed_node_loses_its_sandbox_handle() {
        let store = InMemoryStore::new();
        let sandbox = FakeSandboxDriver::new();

        let node = store.create_node(worker()).await.unwrap();
        sandbox.seed_sandbox("sbx-1", RuntimeStatus::Running);
        let handle = SandboxHandle {
            sandbox_id: "sbx-1".into(),
            host: "127.0.0.1".into(),
            port: SandboxHandle::port_for(node.id),
        };
        store.set_node_sandbox(node.id, Some(handle)).await.unwrap();
        store
            .set_node_health(node.id, NodeHealth::PermanentlyFailed)
            .await
            .unwrap();

        reap_once(&store, &sandbox).await;

        let after = store.get_node(node.id).await.unwrap().unwrap();
        assert!(after.sandbox.is_none());
        assert!(!sandbox.has_sandbox("sbx-1"));
    }

    #[tokio::test]
    async fn a_healthy_node_keeps_its_sandbox() {
        let store = InMemoryStore::new();
        let sandbox = FakeSandboxDriver::new();

        let node = store.create_node(worker()).await.unwrap();
        sandbox.seed_sandbox("sbx-1", RuntimeStatus::Running);
        let handle = SandboxHandle {
            sandbox_id: "sbx-1".into(),
            host: "127.0.0.1".into(),
            port: SandboxHandle::port_for(node.id),
        };
        store.set_node_sandbox(node.id, Some(handle)).await.unwrap();
        store.set_node_health(node.id, NodeHealth::Healthy).await.unwrap();

        reap_once(&store, &sandbox).await;

        let after = store.get_node(node.id).await.unwrap().unwrap();
        assert!(after.sandbox.is_some());
        assert!(sandbox.has_sandbox("sbx-1"));
    }
}
