//! The Pod Rescheduler (spec.md §4.F). Woken by a single shared flag
//! whenever the Heartbeat Tracker or Node Reconciler escalates a node
//! towards failure, and otherwise polled on a short interval so a
//! missed wakeup is never fatal. Grounded in `monitor.py`'s
//! `reschedule_pods` thread and the single-active-pass guard it
//! implements with its own `need_rescheduling` boolean.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kube9_scheduler::{NodeCandidate, PodIpAllocator, select_best_fit_node};
use kube9_store::Store;
use kube9_types::{NodeHealth, Pod, PodHealth, PodId, SandboxHandle};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Shared "there is rescheduling work to do" signal. `Mutex` around the
/// pass itself ensures only one rescheduling sweep runs at a time even
/// if the flag is set again mid-pass.
#[derive(Default)]
pub struct RescheduleSignal {
    needed: AtomicBool,
    pass_lock: Mutex<()>,
}

impl RescheduleSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.needed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn take(&self) -> bool {
        self.needed.swap(false, Ordering::SeqCst)
    }
}

/// Builds the `/run_pod` request body the node sandbox expects (spec.md
/// §6), with `ip_address` set to the freshly allocated address rather
/// than whatever the pod carried on its previous node.
fn run_pod_body(pod: &Pod, ip_address: &str) -> serde_json::Value {
    serde_json::json!({
        "pod_id": pod.id,
        "pod_spec": {
            "name": pod.name,
            "cpu_cores_req": pod.cpu_cores_req,
            "ip_address": ip_address,
            "containers": pod.containers.iter().map(|c| serde_json::json!({
                "name": c.name,
                "image": c.image,
                "command": c.command,
                "args": c.args,
                "cpu_req": c.cpu_cores_req,
                "memory_req": c.memory_mb,
            })).collect::<Vec<_>>(),
        },
    })
}

/// POSTs `/run_pod` to the target sandbox and rejects on anything but a
/// 2xx (spec.md §4.F: "On non-2xx, abort this pod").
async fn post_run_pod(http: &reqwest::Client, handle: &SandboxHandle, body: &serde_json::Value) -> reqwest::Result<()> {
    let url = format!("http://{}:{}/run_pod", handle.host, handle.port);
    http.post(url).json(body).send().await?.error_for_status()?;
    Ok(())
}

/// Re-reads live node state and turns it into scheduler candidates.
/// Called fresh for every pod rather than once per tick, so placement
/// decisions see the cpu this tick's own earlier placements already
/// consumed.
async fn live_candidates(store: &dyn Store) -> kube9_store::Result<(Vec<kube9_types::Node>, Vec<NodeCandidate>)> {
    let nodes = store.list_nodes().await?;
    let candidates = nodes
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
    Ok((nodes, candidates))
}

async fn reschedule_pod(
    store: &dyn Store,
    http: &reqwest::Client,
    ip_allocator: &dyn PodIpAllocator,
    pod_id: PodId,
) {
    let pod = match store.get_pod(pod_id).await {
        Ok(Some(pod)) => pod,
        Ok(None) => return,
        Err(e) => {
            tracing::warn!(pod_id, error = %e, "rescheduler: failed to load pod");
            return;
        }
    };

    let (nodes, candidates) = match live_candidates(store).await {
        Ok(pair) => pair,
        Err(e) => {
            tracing::warn!(pod_id, error = %e, "rescheduler: failed to list nodes");
            return;
        }
    };

    let Some(target_node_id) = select_best_fit_node(&candidates, pod.cpu_cores_req) else {
        tracing::warn!(pod_id, "rescheduler: no eligible node, terminating pod");
        if let Err(e) = store.set_pod_health(pod_id, PodHealth::Terminated).await {
            tracing::warn!(pod_id, error = %e, "rescheduler: failed to mark pod terminated");
        }
        if let Err(e) = store.delete_pod(pod_id).await {
            tracing::warn!(pod_id, error = %e, "rescheduler: failed to delete terminated pod");
        }
        return;
    };

    let Some(target) = nodes.iter().find(|n| n.id == target_node_id) else {
        return;
    };
    let Some(handle) = target.sandbox.clone() else {
        tracing::warn!(pod_id, node_id = target_node_id, "rescheduler: target has no sandbox handle, leaving for next tick");
        return;
    };

    let new_address = ip_allocator.allocate();
    let body = run_pod_body(&pod, &new_address);

    if let Err(e) = post_run_pod(http, &handle, &body).await {
        tracing::warn!(pod_id, node_id = target_node_id, error = %e, "rescheduler: sandbox rejected relocation, leaving pod for next tick");
        return;
    }

    match store.reschedule_pod(pod_id, target_node_id).await {
        Ok(_) => {
            if let Err(e) = store.set_pod_network(pod_id, Some(new_address), None).await {
                tracing::warn!(pod_id, error = %e, "rescheduler: placed pod but failed to record its new address");
            }
            tracing::info!(pod_id, node_id = target_node_id, "rescheduler: relocated pod");
        }
        Err(e) => {
            tracing::warn!(pod_id, node_id = target_node_id, error = %e, "rescheduler: sandbox accepted the pod but the store write failed");
            return;
        }
    }

    // Best-effort advisory resend now that the store reflects the final
    // placement (spec.md §4.F step 3) — failure here doesn't undo the
    // relocation, it's just a nudge in case the sandbox wants it twice.
    if let Err(e) = post_run_pod(http, &handle, &body).await {
        tracing::debug!(pod_id, node_id = target_node_id, error = %e, "rescheduler: advisory resend failed");
    }
}

/// One rescheduling pass: every pod hosted on a `permanently_failed`
/// node is either relocated onto an eligible worker or, if none fits,
/// terminated and removed outright (spec.md §4.F cascade-delete edge
/// case). Pods within a failed node are handled in id order; failed
/// nodes themselves are handled in id order for determinism.
pub async fn reschedule_once(store: &dyn Store, http: &reqwest::Client, ip_allocator: &dyn PodIpAllocator) {
    let nodes = match store.list_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            tracing::warn!(error = %e, "rescheduler: failed to list nodes");
            return;
        }
    };

    let mut failed_node_ids: Vec<_> = nodes
        .iter()
        .filter(|n| n.health == NodeHealth::PermanentlyFailed)
        .map(|n| n.id)
        .collect();
    failed_node_ids.sort_unstable();

    for failed_node_id in failed_node_ids {
        let mut pod_ids = match store.list_pods_for_node(failed_node_id).await {
            Ok(pods) => pods.into_iter().map(|p| p.id).collect::<Vec<_>>(),
            Err(e) => {
                tracing::warn!(node_id = failed_node_id, error = %e, "rescheduler: failed to list pods for failed node");
                continue;
            }
        };
        pod_ids.sort_unstable();

        for pod_id in pod_ids {
            reschedule_pod(store, http, ip_allocator, pod_id).await;
        }
    }
}

/// Runs the rescheduler on a short poll interval, only doing real work
/// when `signal` has been marked (spec.md §4.F `RESCHEDULER_INTERVAL`
/// combined with the faster flag-check cadence in the reference
/// implementation).
pub async fn run(
    store: Arc<dyn Store>,
    http: reqwest::Client,
    ip_allocator: Arc<dyn PodIpAllocator>,
    signal: Arc<RescheduleSignal>,
    poll_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if signal.take() {
                    let _guard = signal.pass_lock.lock().await;
                    reschedule_once(store.as_ref(), &http, ip_allocator.as_ref()).await;
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("pod rescheduler shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::post;
    use kube9_scheduler::RandomPodIpAllocator;
    use kube9_store::NewNode;
    use kube9_store::memory::InMemoryStore;
    use kube9_types::{ComponentStatus, NodeComponents, NodeKind, PodKind, WorkerComponents};

    fn healthy_worker(cpu: i32) -> NewNode {
        NewNode {
            name: "worker".into(),
            kind: NodeKind::Worker,
            cpu_cores_total: cpu,
            heartbeat_interval_secs: 60,
            max_heartbeat_interval_secs: 120,
            max_recovery_attempts: 3,
        }
    }

    /// Spins up a throwaway HTTP server standing in for a node
    /// sandbox's `/run_pod` endpoint, bound to an ephemeral local port.
    async fn spawn_fake_sandbox_accepting_run_pod() -> SandboxHandle {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/run_pod", post(|| async { axum::http::StatusCode::OK }));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        SandboxHandle {
            sandbox_id: "fake-sandbox".into(),
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    #[tokio::test]
    async fn pods_on_a_permanently_failed_node_are_relocated_when_capacity_exists() {
        let store = InMemoryStore::new();
        let doomed = store.create_node(healthy_worker(2)).await.unwrap();
        let rescuer = store.create_node(healthy_worker(4)).await.unwrap();
        store.set_node_health(rescuer.id, NodeHealth::Healthy).await.unwrap();
        store
            .set_node_components(
                rescuer.id,
                NodeComponents {
                    worker: WorkerComponents {
                        kubelet: ComponentStatus::Running,
                        container_runtime: ComponentStatus::Running,
                        kube_proxy: ComponentStatus::Running,
                        node_agent: ComponentStatus::Running,
                    },
                    master: None,
                },
            )
            .await
            .unwrap();
        store
            .set_node_sandbox(rescuer.id, Some(spawn_fake_sandbox_accepting_run_pod().await))
            .await
            .unwrap();

        let pod = store
            .create_pod(kube9_store::NewPod {
                name: "pod".into(),
                cpu_cores_req: 1,
                kind: PodKind::SingleContainer,
                containers: Vec::new(),
                volumes: Vec::new(),
                config_items: Vec::new(),
            })
            .await
            .unwrap();
        store.schedule_pod(pod.id, doomed.id).await.unwrap();
        store.set_node_health(doomed.id, NodeHealth::PermanentlyFailed).await.unwrap();

        let http = reqwest::Client::new();
        let allocator = RandomPodIpAllocator;
        reschedule_once(&store, &http, &allocator).await;

        let moved = store.get_pod(pod.id).await.unwrap().unwrap();
        assert_eq!(moved.node_id, Some(rescuer.id));
        assert_eq!(moved.health, PodHealth::Running);
        assert!(moved.address.is_some());
    }

    #[tokio::test]
    async fn pods_with_no_eligible_node_are_terminated_and_removed() {
        let store = InMemoryStore::new();
        let doomed = store.create_node(healthy_worker(2)).await.unwrap();

        let pod = store
            .create_pod(kube9_store::NewPod {
                name: "pod".into(),
                cpu_cores_req: 1,
                kind: PodKind::SingleContainer,
                containers: Vec::new(),
                volumes: Vec::new(),
                config_items: Vec::new(),
            })
            .await
            .unwrap();
        store.schedule_pod(pod.id, doomed.id).await.unwrap();
        store.set_node_health(doomed.id, NodeHealth::PermanentlyFailed).await.unwrap();

        let http = reqwest::Client::new();
        let allocator = RandomPodIpAllocator;
        reschedule_once(&store, &http, &allocator).await;

        assert!(store.get_pod(pod.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_pod_stays_put_when_the_target_sandbox_is_unreachable() {
        let store = InMemoryStore::new();
        let doomed = store.create_node(healthy_worker(2)).await.unwrap();
        let rescuer = store.create_node(healthy_worker(4)).await.unwrap();
        store.set_node_health(rescuer.id, NodeHealth::Healthy).await.unwrap();
        store
            .set_node_components(
                rescuer.id,
                NodeComponents {
                    worker: WorkerComponents {
                        kubelet: ComponentStatus::Running,
                        container_runtime: ComponentStatus::Running,
                        kube_proxy: ComponentStatus::Running,
                        node_agent: ComponentStatus::Running,
                    },
                    master: None,
                },
            )
            .await
            .unwrap();
        // Nothing is listening on this port.
        store
            .set_node_sandbox(
                rescuer.id,
                Some(SandboxHandle {
                    sandbox_id: "unreachable".into(),
                    host: "127.0.0.1".into(),
                    port: 1,
                }),
            )
            .await
            .unwrap();

        let pod = store
            .create_pod(kube9_store::NewPod {
                name: "pod".into(),
                cpu_cores_req: 1,
                kind: PodKind::SingleContainer,
                containers: Vec::new(),
                volumes: Vec::new(),
                config_items: Vec::new(),
            })
            .await
            .unwrap();
        store.schedule_pod(pod.id, doomed.id).await.unwrap();
        store.set_node_health(doomed.id, NodeHealth::PermanentlyFailed).await.unwrap();

        let http = reqwest::Client::new();
        let allocator = RandomPodIpAllocator;
        reschedule_once(&store, &http, &allocator).await;

        let still_there = store.get_pod(pod.id).await.unwrap().unwrap();
        assert_eq!(still_there.node_id, Some(doomed.id));
        assert_eq!(still_there.health, PodHealth::Running);
    }

    #[test]
    fn signal_mark_and_take_round_trips() {
        let signal = RescheduleSignal::new();
        assert!(!signal.take());
        signal.mark();
        assert!(signal.take());
        assert!(!signal.take());
    }
}
