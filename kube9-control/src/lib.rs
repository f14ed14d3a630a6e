//! Control loops for the Kube-9 control plane: the Heartbeat Tracker
//! (spec.md §4.D), Node Reconciler (§4.E), Pod Rescheduler (§4.F), and
//! Sandbox Reaper (§4.E/§5). Wired together by [`supervisor::spawn`].

pub mod heartbeat;
pub mod node_reconciler;
pub mod reaper;
pub mod rescheduler;
pub mod supervisor;
mod util;

pub use util::{Error, Result};
