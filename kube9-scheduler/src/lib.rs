//! The Best-Fit Scheduler (spec.md §4.C): pure, IO-free placement
//! decisions over a snapshot of node state. Grounded in
//! `storage-operator`'s `clusters/planner.rs` — no database or runtime
//! calls happen in this crate, only `min_by_key` over slices. Also
//! carries the [`PodIpAllocator`] trait (spec.md §6), the one piece of
//! this crate that isn't pure.

use kube9_types::{ComponentStatus, NodeHealth, NodeId, NodeKind};

mod ip_allocator;

pub use ip_allocator::{PodIpAllocator, RandomPodIpAllocator};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeCandidate {
    pub id: NodeId,
    pub kind: NodeKind,
    pub health: NodeHealth,
    pub cpu_cores_avail: i32,
    pub kubelet: ComponentStatus,
    pub container_runtime: ComponentStatus,
}

/// A worker is eligible for scheduling when it is healthy, has both the
/// kubelet and container runtime up, and has enough spare cpu (spec.md
/// §4.C, §3 invariant notes).
pub fn is_eligible(node: &NodeCandidate, required_cores: i32) -> bool {
    node.kind == NodeKind::Worker
        && node.health == NodeHealth::Healthy
        && node.kubelet == ComponentStatus::Running
        && node.container_runtime == ComponentStatus::Running
        && node.cpu_cores_avail >= required_cores
}

/// Picks the eligible node with the *least* spare cpu that can still
/// fit the request — best-fit, not first-fit, to leave large-capacity
/// nodes free for later large pods (spec.md §4.C; mirrors the
/// `min(eligible_nodes, key=lambda n: n.cpu_cores_avail)` selection in
/// the reference scheduler).
pub fn select_best_fit_node(nodes: &[NodeCandidate], required_cores: i32) -> Option<NodeId> {
    nodes
        .iter()
        .filter(|n| is_eligible(n, required_cores))
        .min_by_key(|n| (n.cpu_cores_avail, n.id))
        .map(|n| n.id)
}

/// All eligible nodes for a request, ordered best-fit first. Useful
/// for callers (e.g. the rescheduler) that want to try multiple
/// candidates if the first placement is rejected by the store due to a
/// race with a concurrent scheduling pass.
pub fn eligible_nodes_ranked(nodes: &[NodeCandidate], required_cores: i32) -> Vec<NodeId> {
    let mut eligible: Vec<&NodeCandidate> = nodes
        .iter()
        .filter(|n| is_eligible(n, required_cores))
        .collect();
    eligible.sort_by_key(|n| (n.cpu_cores_avail, n.id));
    eligible.into_iter().map(|n| n.id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: NodeId, health: NodeHealth, avail: i32) -> NodeCandidate {
        NodeCandidate {
            id,
            kind: NodeKind::Worker,
            health,
            cpu_cores_avail: avail,
            kubelet: ComponentStatus::Running,
            container_runtime: ComponentStatus::Running,
        }
    }

    #[test]
    fn picks_the_tightest_fit_among_eligible_nodes() {
        let nodes = vec![
            candidate(1, NodeHealth::Healthy, 8),
            candidate(2, NodeHealth::Healthy, 3),
            candidate(3, NodeHealth::Healthy, 5),
        ];
        assert_eq!(select_best_fit_node(&nodes, 2), Some(2));
    }

    #[test]
    fn skips_nodes_without_enough_spare_cpu() {
        let nodes = vec![candidate(1, NodeHealth::Healthy, 1)];
        assert_eq!(select_best_fit_node(&nodes, 2), None);
    }

    #[test]
    fn skips_unhealthy_and_master_nodes() {
        let mut unhealthy = candidate(1, NodeHealth::Failed, 8);
        unhealthy.health = NodeHealth::Failed;
        let mut master = candidate(2, NodeHealth::Healthy, 8);
        master.kind = NodeKind::Master;
        let nodes = vec![unhealthy, master];
        assert_eq!(select_best_fit_node(&nodes, 1), None);
    }

    #[test]
    fn ties_break_on_node_id_for_determinism() {
        let nodes = vec![
            candidate(5, NodeHealth::Healthy, 4),
            candidate(2, NodeHealth::Healthy, 4),
        ];
        assert_eq!(select_best_fit_node(&nodes, 1), Some(2));
    }

    #[test]
    fn ranked_list_is_sorted_tightest_first() {
        let nodes = vec![
            candidate(1, NodeHealth::Healthy, 8),
            candidate(2, NodeHealth::Healthy, 3),
            candidate(3, NodeHealth::Healthy, 5),
        ];
        assert_eq!(eligible_nodes_ranked(&nodes, 2), vec![2, 3, 1]);
    }
}
