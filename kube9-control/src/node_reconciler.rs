//! The Node Reconciler (spec.md §4.E). Re-queries a fresh snapshot of
//! each node every tick, decides a single [`NodeAction`] from it, then
//! applies that action against the sandbox driver and the store.
//! Grounded in `storage-operator`'s `clusters/reconcile.rs`
//! determine-then-apply split.

use std::sync::Arc;
use std::time::Duration;

use kube9_sandbox::{RuntimeStatus, SandboxDriver};
use kube9_store::Store;
use kube9_types::{Node, NodeHealth};
use tokio_util::sync::CancellationToken;

use crate::rescheduler::RescheduleSignal;

/// The single decision taken for a node on one reconciliation tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// Node is healthy or not yet `failed`; nothing to do.
    NoOp,
    /// Container is already running again; just mark the node recovering
    /// and wait for its next heartbeat to confirm health.
    MarkRecovering,
    /// Container is stopped; try to start it.
    AttemptRestart,
    /// Container is gone outright; this attempt alone exhausts the
    /// recovery budget.
    RecoveryAttemptsExhausted,
    /// `recovery_attempts` is already at the ceiling; stop trying and
    /// hand the node's pods to the rescheduler.
    EscalatePermanentlyFailed,
}

impl NodeAction {
    pub fn to_str(&self) -> &'static str {
        match self {
            NodeAction::NoOp => "no_op",
            NodeAction::MarkRecovering => "mark_recovering",
            NodeAction::AttemptRestart => "attempt_restart",
            NodeAction::RecoveryAttemptsExhausted => "recovery_attempts_exhausted",
            NodeAction::EscalatePermanentlyFailed => "escalate_permanently_failed",
        }
    }
}

/// Pure decision function: given a node snapshot and what the sandbox
/// driver currently reports for its container, decide what to do.
/// `container_status` is `None` when the sandbox is gone outright.
pub fn determine_action(node: &Node, container_status: Option<RuntimeStatus>) -> NodeAction {
    if node.health == NodeHealth::PermanentlyFailed {
        return NodeAction::NoOp;
    }

    if node.recovery_attempts >= node.max_recovery_attempts {
        return NodeAction::EscalatePermanentlyFailed;
    }

    if node.health != NodeHealth::Failed {
        return NodeAction::NoOp;
    }

    match container_status {
        Some(RuntimeStatus::Running) => NodeAction::MarkRecovering,
        Some(RuntimeStatus::Exited) | Some(RuntimeStatus::Dead) => NodeAction::AttemptRestart,
        Some(RuntimeStatus::Created) | Some(RuntimeStatus::Unknown) | None => {
            NodeAction::RecoveryAttemptsExhausted
        }
    }
}

/// Applies a decided action. Returns `true` if the node was just
/// escalated to `permanently_failed`, so the caller can wake the
/// rescheduler.
pub async fn apply_action(
    store: &dyn Store,
    sandbox: &dyn SandboxDriver,
    node: &Node,
    action: NodeAction,
) -> crate::util::Result<bool> {
    match action {
        NodeAction::NoOp => Ok(false),

        NodeAction::MarkRecovering => {
            store.set_node_health(node.id, NodeHealth::Recovering).await?;
            Ok(false)
        }

        NodeAction::AttemptRestart => {
            let Some(sandbox_handle) = &node.sandbox else {
                return escalate_if_exhausted(store, node).await;
            };
            match sandbox.start_sandbox(&sandbox_handle.sandbox_id).await {
                Ok(()) => {
                    store.set_node_health(node.id, NodeHealth::Recovering).await?;
                    Ok(false)
                }
                Err(e) => {
                    tracing::warn!(node_id = node.id, error = %e, "node reconciler: restart failed");
                    escalate_if_exhausted(store, node).await
                }
            }
        }

        NodeAction::RecoveryAttemptsExhausted => escalate_if_exhausted(store, node).await,

        NodeAction::EscalatePermanentlyFailed => {
            store
                .set_node_health(node.id, NodeHealth::PermanentlyFailed)
                .await?;
            Ok(true)
        }
    }
}

async fn escalate_if_exhausted(store: &dyn Store, node: &Node) -> crate::util::Result<bool> {
    let updated = store
        .increment_node_recovery_attempts(node.id)
        .await?
        .ok_or(crate::util::Error::NodeNotFound(node.id))?;

    if updated.recovery_attempts >= updated.max_recovery_attempts {
        store
            .set_node_health(node.id, NodeHealth::PermanentlyFailed)
            .await?;
        return Ok(true);
    }
    Ok(false)
}

/// One reconciliation pass over every node (spec.md §4.E
/// `RECOVERY_INTERVAL`). Nodes not currently `failed` are skipped
/// before ever touching the sandbox driver.
pub async fn reconcile_once(
    store: &dyn Store,
    sandbox: &dyn SandboxDriver,
    signal: &RescheduleSignal,
) {
    let nodes = match store.list_nodes().await {
        Ok(nodes) => nodes,
        Err(e) => {
            tracing::warn!(error = %e, "node reconciler: failed to list nodes");
            return;
        }
    };

    for node in nodes {
        if node.health != NodeHealth::Failed && node.recovery_attempts < node.max_recovery_attempts {
            continue;
        }

        let container_status = match &node.sandbox {
            Some(handle) => sandbox
                .get_sandbox_info(&handle.sandbox_id)
                .await
                .map(|info| info.status)
                .ok(),
            None => None,
        };

        let action = determine_action(&node, container_status);
        if action == NodeAction::NoOp {
            continue;
        }

        tracing::info!(node_id = node.id, action = action.to_str(), "node reconciler: applying action");
        match apply_action(store, sandbox, &node, action).await {
            Ok(escalated) if escalated => signal.mark(),
            Ok(_) => {}
            Err(e) => tracing::warn!(node_id = node.id, error = %e, "node reconciler: action failed"),
        }
    }
}

pub async fn run(
    store: Arc<dyn Store>,
    sandbox: Arc<dyn SandboxDriver>,
    signal: Arc<RescheduleSignal>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => reconcile_once(store.as_ref(), sandbox.as_ref(), signal.as_ref()).await,
            _ = cancel.cancelled() => {
                tracing::info!("node reconciler shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube9_types::{NodeComponents, NodeKind};

    fn node(health: NodeHealth, recovery_attempts: i32, max_recovery_attempts: i32) -> Node {
        Node {
            id: 1,
            name: "worker-1".into(),
            kind: NodeKind::Worker,
            cpu_cores_total: 4,
            cpu_cores_avail: 4,
            health,
            components: NodeComponents::default(),
            last_heartbeat: None,
            heartbeat_interval_secs: 60,
            max_heartbeat_interval_secs: 120,
            recovery_attempts,
            max_recovery_attempts,
            sandbox: None,
            pod_ids: Vec::new(),
        }
    }

    #[test]
    fn healthy_node_is_left_alone() {
        let n = node(NodeHealth::Healthy, 0, 3);
        assert_eq!(determine_action(&n, Some(RuntimeStatus::Running)), NodeAction::NoOp);
    }

    #[test]
    fn failed_node_with_running_container_is_marked_recovering() {
        let n = node(NodeHealth::Failed, 0, 3);
        assert_eq!(
            determine_action(&n, Some(RuntimeStatus::Running)),
            NodeAction::MarkRecovering
        );
    }

    #[test]
    fn failed_node_with_stopped_container_attempts_restart() {
        let n = node(NodeHealth::Failed, 1, 3);
        assert_eq!(
            determine_action(&n, Some(RuntimeStatus::Exited)),
            NodeAction::AttemptRestart
        );
    }

    #[test]
    fn failed_node_with_missing_container_exhausts_the_attempt() {
        let n = node(NodeHealth::Failed, 0, 3);
        assert_eq!(determine_action(&n, None), NodeAction::RecoveryAttemptsExhausted);
    }

    #[test]
    fn node_already_at_the_recovery_ceiling_escalates_regardless_of_container_state() {
        let n = node(NodeHealth::Failed, 3, 3);
        assert_eq!(
            determine_action(&n, Some(RuntimeStatus::Running)),
            NodeAction::EscalatePermanentlyFailed
        );
    }

    #[test]
    fn permanently_failed_node_is_never_touched_again() {
        let n = node(NodeHealth::PermanentlyFailed, 3, 3);
        assert_eq!(determine_action(&n, None), NodeAction::NoOp);
    }
}
