//! Protocol message types.

use serde::{Deserialize, Serialize};
use xedgesim_common::Event;

/// Commands sent from the coordinator to a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Deliver the scenario configuration; the node must answer with
    /// [`Ack::Ready`] once it is prepared to advance.
    #[serde(rename = "INIT")]
    Init {
        /// Scenario seed, passed through verbatim.
        seed: u64,
        /// Node-specific configuration block, opaque to the protocol.
        #[serde(default)]
        config: serde_json::Value,
    },

    /// Deliver pending events and command advancement of virtual time.
    ///
    /// `target_us` is monotonically non-decreasing across the run; the node
    /// answers with [`Ack::Done`] when it has simulated up to the target.
    #[serde(rename = "ADVANCE")]
    Advance {
        /// Virtual time to advance to, in microseconds.
        target_us: u64,
        /// Events to be consumed by the node during this advance.
        #[serde(default)]
        events: Vec<Event>,
    },

    /// Request orderly termination.
    #[serde(rename = "SHUTDOWN")]
    Shutdown,
}

/// Acknowledgements sent from a node to the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ack")]
pub enum Ack {
    /// The node has applied its INIT configuration and is ready.
    #[serde(rename = "READY")]
    Ready,

    /// The node has completed the most recent advance.
    #[serde(rename = "DONE")]
    Done {
        /// The node's virtual time after the advance, in microseconds.
        time_us: u64,
        /// Events the node emitted during the advance.
        #[serde(default)]
        events: Vec<Event>,
    },
}
