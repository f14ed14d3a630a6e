//! Spawns the four control loops (Heartbeat Tracker, Node Reconciler,
//! Pod Rescheduler, Sandbox Reaper) as cooperative tasks sharing one
//! [`CancellationToken`], the same fan-out shutdown shape
//! `kube9_common::shutdown::shutdown_signal` expects its caller to
//! drive.

use std::sync::Arc;
use std::time::Duration;

use kube9_sandbox::SandboxDriver;
use kube9_scheduler::PodIpAllocator;
use kube9_store::Store;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::rescheduler::RescheduleSignal;
use crate::{heartbeat, node_reconciler, reaper, rescheduler};

/// Intervals for the four loops (spec.md §4.D/E/F constants).
pub struct ControlIntervals {
    pub heartbeat_sweep: Duration,
    pub node_recovery: Duration,
    pub reschedule_poll: Duration,
    pub sandbox_reap: Duration,
}

impl Default for ControlIntervals {
    fn default() -> Self {
        Self {
            heartbeat_sweep: Duration::from_secs(40),
            node_recovery: Duration::from_secs(15),
            reschedule_poll: Duration::from_secs(5),
            sandbox_reap: Duration::from_secs(20),
        }
    }
}

pub struct ControlLoops {
    pub heartbeat: JoinHandle<()>,
    pub node_reconciler: JoinHandle<()>,
    pub rescheduler: JoinHandle<()>,
    pub reaper: JoinHandle<()>,
}

pub fn spawn(
    store: Arc<dyn Store>,
    sandbox: Arc<dyn SandboxDriver>,
    http: reqwest::Client,
    pod_ip_allocator: Arc<dyn PodIpAllocator>,
    signal: Arc<RescheduleSignal>,
    intervals: ControlIntervals,
    cancel: CancellationToken,
) -> ControlLoops {
    let heartbeat = tokio::spawn(heartbeat::run(
        store.clone(),
        sandbox.clone(),
        signal.clone(),
        intervals.heartbeat_sweep,
        cancel.clone(),
    ));

    let node_reconciler = tokio::spawn(node_reconciler::run(
        store.clone(),
        sandbox.clone(),
        signal.clone(),
        intervals.node_recovery,
        cancel.clone(),
    ));

    let rescheduler = tokio::spawn(rescheduler::run(
        store.clone(),
        http,
        pod_ip_allocator,
        signal,
        intervals.reschedule_poll,
        cancel.clone(),
    ));

    let reaper = tokio::spawn(reaper::run(store, sandbox, intervals.sandbox_reap, cancel));

    ControlLoops {
        heartbeat,
        node_reconciler,
        rescheduler,
        reaper,
    }
}
