//! Adapter over a coordinator-local node object.
//!
//! Complex nodes (notably the emulator node) live in the coordinator's
//! address space and implement [`InProcessNode`] directly; this adapter
//! presents them behind the same [`NodeAdapter`] contract as external
//! processes. No serialization, no I/O.

use crate::adapter::{finalize_produced, NodeAdapter};
use tracing::debug;
use xedgesim_common::{Event, InitConfig, NodeId, SimError, SimTime};

/// Lifecycle callbacks for a node living in the coordinator's process.
pub trait InProcessNode {
    /// The node's identity.
    fn id(&self) -> &NodeId;

    /// Prepare any external resources the node owns. Default: nothing.
    fn connect(&mut self) -> Result<(), SimError> {
        Ok(())
    }

    /// Apply the scenario configuration.
    fn init(&mut self, config: &InitConfig) -> Result<(), SimError>;

    /// Consume `pending` events and simulate up to `target`, returning any
    /// events produced in that window.
    fn advance(&mut self, target: SimTime, pending: Vec<Event>) -> Result<Vec<Event>, SimError>;

    /// Release any resources the node owns. Default: nothing.
    fn shutdown(&mut self) -> Result<(), SimError> {
        Ok(())
    }
}

/// Presents an [`InProcessNode`] behind the [`NodeAdapter`] contract.
pub struct InProcessNodeAdapter {
    node_id: NodeId,
    node: Box<dyn InProcessNode>,
    current: SimTime,
    last_target: SimTime,
    initialized: bool,
    shut_down: bool,
    /// Events produced by the advance in flight, held until `wait_done`.
    produced: Option<Vec<Event>>,
}

impl InProcessNodeAdapter {
    /// Wrap an in-process node.
    pub fn new(node: Box<dyn InProcessNode>) -> Self {
        InProcessNodeAdapter {
            node_id: node.id().clone(),
            node,
            current: SimTime::ZERO,
            last_target: SimTime::ZERO,
            initialized: false,
            shut_down: false,
            produced: None,
        }
    }
}

impl NodeAdapter for InProcessNodeAdapter {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn connect(&mut self) -> Result<(), SimError> {
        self.node.connect()
    }

    fn send_init(&mut self, config: &InitConfig) -> Result<(), SimError> {
        self.node.init(config)?;
        self.initialized = true;
        Ok(())
    }

    fn send_advance(&mut self, target: SimTime, pending: Vec<Event>) -> Result<(), SimError> {
        if !self.initialized {
            return Err(SimError::InvalidState(format!(
                "advance of {} before init",
                self.node_id
            )));
        }
        if target < self.last_target {
            return Err(SimError::InvalidState(format!(
                "advance target {} regressed below {}",
                target, self.last_target
            )));
        }
        self.last_target = target;

        // Pending events are always forwarded to the wrapped node; dropping
        // them here breaks every bidirectional flow.
        debug!(node = %self.node_id, %target, pending = pending.len(), "advancing in-process node");
        let produced = self.node.advance(target, pending)?;
        self.produced = Some(produced);
        Ok(())
    }

    fn wait_done(&mut self) -> Result<Vec<Event>, SimError> {
        let produced = self.produced.take().ok_or_else(|| {
            SimError::InvalidState(format!("wait_done on {} without an advance", self.node_id))
        })?;
        self.current = self.last_target;
        finalize_produced(&self.node_id, self.last_target, produced)
    }

    fn send_shutdown(&mut self) -> Result<(), SimError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;
        self.node.shutdown()
    }

    fn current_time(&self) -> SimTime {
        self.current
    }
}
