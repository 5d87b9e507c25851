//! Error taxonomy of the co-simulation core.
//!
//! Every variant is fatal to a run: the coordinator records the error,
//! shuts every adapter down, and returns it to the caller. The core does
//! not retry at the protocol layer; retries belong in `connect` only.

use thiserror::Error;

/// Errors raised by adapters, the network model, and the coordinator.
#[derive(Debug, Error)]
pub enum SimError {
    /// A node could not be reached within the connect budget.
    #[error("connection to {node} failed: {reason}")]
    Connection {
        /// Node the coordinator was connecting to.
        node: String,
        /// What went wrong.
        reason: String,
    },

    /// Malformed message, unexpected ack, or schema violation.
    #[error("protocol violation from {node}: {reason}")]
    Protocol {
        /// Node that produced the offending message.
        node: String,
        /// What was malformed or unexpected.
        reason: String,
    },

    /// An expected response did not arrive within the bounded window.
    #[error("{node} timed out after {timeout_ms} ms waiting for {what}")]
    Timeout {
        /// Node that failed to respond.
        node: String,
        /// The response that was expected.
        what: &'static str,
        /// The window that elapsed.
        timeout_ms: u64,
    },

    /// An established stream ended or was reset mid-run.
    #[error("connection to {node} lost: {reason}")]
    ConnectionLost {
        /// Node whose stream ended.
        node: String,
        /// How the loss was observed.
        reason: String,
    },

    /// API misuse, e.g. commanding an advance before INIT.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// An external resource (port, file, process, container) is unavailable.
    #[error("resource unavailable: {0}")]
    Resource(String),
}

impl SimError {
    /// Connection failure for `node`.
    pub fn connection(node: impl ToString, reason: impl ToString) -> Self {
        SimError::Connection {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Protocol violation observed from `node`.
    pub fn protocol(node: impl ToString, reason: impl ToString) -> Self {
        SimError::Protocol {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Timeout waiting on `node` for `what`.
    pub fn timeout(node: impl ToString, what: &'static str, timeout: std::time::Duration) -> Self {
        SimError::Timeout {
            node: node.to_string(),
            what,
            timeout_ms: timeout.as_millis() as u64,
        }
    }

    /// Stream to `node` ended mid-run.
    pub fn connection_lost(node: impl ToString, reason: impl ToString) -> Self {
        SimError::ConnectionLost {
            node: node.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_messages() {
        let err = SimError::timeout("edge0", "DONE", Duration::from_secs(30));
        assert_eq!(err.to_string(), "edge0 timed out after 30000 ms waiting for DONE");

        let err = SimError::protocol("edge0", "unknown ack \"BUSY\"");
        assert!(err.to_string().contains("unknown ack"));
    }
}
