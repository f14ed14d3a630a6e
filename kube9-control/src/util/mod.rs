use std::time::Duration;

mod error;

pub use error::*;

/// Heartbeat sweep cadence is max_heartbeat_interval / 3 (spec.md §4.D),
/// this is the floor used when a node hasn't reported one yet.
pub(crate) const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(40);

/// Node and pod reconciliation never attempt a sandbox operation more
/// often than this, even if a sweep tick fires early.
pub(crate) const MIN_ACTION_INTERVAL: Duration = Duration::from_secs(1);
