//! The coordinator's uniform view of a node.

use std::time::Duration;
use xedgesim_common::{Event, InitConfig, NodeId, SimError, SimTime};

/// Timeout budget shared by the concrete adapters.
#[derive(Debug, Clone, Copy)]
pub struct AdapterTimeouts {
    /// Window for the READY ack after INIT.
    pub init: Duration,
    /// Window for the DONE ack after ADVANCE.
    pub advance: Duration,
    /// Grace period before force-terminating external resources.
    pub shutdown_grace: Duration,
}

impl Default for AdapterTimeouts {
    fn default() -> Self {
        AdapterTimeouts {
            init: Duration::from_secs(30),
            advance: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// The uniform capability set the coordinator holds for every node.
///
/// Lifecycle: `connect` → `send_init` → (`send_advance` → `wait_done`)* →
/// `send_shutdown`. Implementations enforce three invariants:
///
/// - `current_time` is monotonically non-decreasing across calls;
/// - every event returned from `wait_done` has `time <=` the most recent
///   advance target;
/// - events returned for one advance are ordered by time, ties broken by
///   the order the node produced them.
pub trait NodeAdapter {
    /// The node this adapter drives.
    fn node_id(&self) -> &NodeId;

    /// Prepare external resources. Idempotent; performs no protocol I/O.
    ///
    /// Fails with [`SimError::Connection`] if the node cannot be reached
    /// within the bounded connect budget.
    fn connect(&mut self) -> Result<(), SimError>;

    /// Send the scenario configuration and block until the node reports
    /// readiness.
    fn send_init(&mut self, config: &InitConfig) -> Result<(), SimError>;

    /// Deliver `pending` events and command advancement to `target`.
    ///
    /// `target` is monotonically non-decreasing across calls; regressions
    /// are a programming error surfaced as [`SimError::InvalidState`].
    fn send_advance(&mut self, target: SimTime, pending: Vec<Event>) -> Result<(), SimError>;

    /// Block until the node completes the most recent advance and return
    /// the events it emitted.
    fn wait_done(&mut self) -> Result<Vec<Event>, SimError>;

    /// Request orderly termination, force-terminating any remaining
    /// external resource after a bounded grace period. Idempotent, and
    /// callable even if `connect` failed.
    fn send_shutdown(&mut self) -> Result<(), SimError>;

    /// The node's advisory virtual time.
    fn current_time(&self) -> SimTime;
}

/// Enforce the `wait_done` invariants shared by every adapter: stamp the
/// source, bound every event by the advance target, and order by time
/// with insertion order breaking ties.
pub(crate) fn finalize_produced(
    node: &NodeId,
    target: SimTime,
    mut events: Vec<Event>,
) -> Result<Vec<Event>, SimError> {
    for event in &mut events {
        event.src = node.clone();
        if event.time > target {
            return Err(SimError::protocol(
                node,
                format!(
                    "event \"{}\" at {} is beyond the advance target {}",
                    event.kind, event.time, target
                ),
            ));
        }
    }
    events.sort_by_key(|e| e.time);
    Ok(events)
}
