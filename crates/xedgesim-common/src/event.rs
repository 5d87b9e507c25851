//! The event value object exchanged among all components.
//!
//! An [`Event`] is the sole value type that crosses component boundaries:
//! adapters return events from their nodes, the network model delays and
//! drops them, and the coordinator routes them to destination queues.
//! Events are immutable once created; ownership transfers on every hand-off.
//!
//! ## Wire schema
//!
//! Every event transmitted across a process boundary serializes as:
//!
//! ```json
//! {"time_us":0,"kind":"sample","src":"sensor0","dst":"cloud",
//!  "payload":{"v":1},"size_bytes":16,"net_meta":{}}
//! ```
//!
//! Absent fields decode to their documented defaults: `dst: null`,
//! `payload: null`, `size_bytes: 0`, `net_meta: {}`.

use crate::time::SimTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a simulation node.
///
/// The derived `Ord` is the coordinator's tie-break order for event
/// delivery, so identical scenarios produce identical runs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// Network routing metadata, populated by the network model when an event
/// is routed.
///
/// An event that has been through the network model carries at least
/// `sent_time_us` and `delivery_time_us`, with
/// `delivery_time_us >= sent_time_us`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetMeta {
    /// Virtual time at which the source emitted the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_time_us: Option<u64>,
    /// Virtual time at which the event reaches its destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_time_us: Option<u64>,
    /// Link latency applied, in microseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_us: Option<u64>,
    /// Identifier of the link that carried the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_id: Option<String>,
}

impl NetMeta {
    /// True when no field is set; empty metadata is omitted from the wire.
    pub fn is_empty(&self) -> bool {
        self.sent_time_us.is_none()
            && self.delivery_time_us.is_none()
            && self.latency_us.is_none()
            && self.link_id.is_none()
    }
}

/// A timestamped message exchanged among simulation components.
///
/// `time` is the event's origination time unless the network model has
/// rewritten it to the delivery time. `dst: None` marks an event that is
/// not network-routed (metrics or log output); the coordinator retains it
/// instead of routing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Virtual-time timestamp in microseconds.
    #[serde(rename = "time_us")]
    pub time: SimTime,
    /// Domain-defined type tag; opaque to the core.
    pub kind: String,
    /// Origin node. Every event has a valid source.
    pub src: NodeId,
    /// Destination node, or `None` for non-routed events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<NodeId>,
    /// Schema-free structured value carried by the event.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Nominal wire size; carried for future bandwidth modelling.
    #[serde(default)]
    pub size_bytes: u64,
    /// Routing metadata written by the network model.
    #[serde(default, skip_serializing_if = "NetMeta::is_empty")]
    pub net_meta: NetMeta,
}

impl Event {
    /// Create an event with the required fields and defaults elsewhere.
    pub fn new(time: SimTime, kind: impl Into<String>, src: impl Into<NodeId>) -> Self {
        Event {
            time,
            kind: kind.into(),
            src: src.into(),
            dst: None,
            payload: serde_json::Value::Null,
            size_bytes: 0,
            net_meta: NetMeta::default(),
        }
    }

    /// Set the destination node.
    pub fn with_dst(mut self, dst: impl Into<NodeId>) -> Self {
        self.dst = Some(dst.into());
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the nominal wire size.
    pub fn with_size_bytes(mut self, size_bytes: u64) -> Self {
        self.size_bytes = size_bytes;
        self
    }

    /// True when the event has a destination and is subject to routing.
    pub fn is_routed(&self) -> bool {
        self.dst.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_round_trip() {
        let event = Event::new(SimTime::from_micros(1_500), "sample", "sensor0")
            .with_dst("cloud")
            .with_payload(json!({"v": 2}))
            .with_size_bytes(16);

        let line = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_decode_defaults() {
        let back: Event =
            serde_json::from_str(r#"{"time_us":0,"kind":"boot","src":"n0"}"#).unwrap();
        assert_eq!(back.dst, None);
        assert_eq!(back.payload, serde_json::Value::Null);
        assert_eq!(back.size_bytes, 0);
        assert!(back.net_meta.is_empty());
    }

    #[test]
    fn test_empty_net_meta_omitted() {
        let event = Event::new(SimTime::ZERO, "sample", "n0");
        let line = serde_json::to_string(&event).unwrap();
        assert!(!line.contains("net_meta"));
        assert!(!line.contains("dst"));
    }

    #[test]
    fn test_net_meta_round_trip() {
        let mut event = Event::new(SimTime::from_micros(10_000), "sample", "n0").with_dst("n1");
        event.net_meta = NetMeta {
            sent_time_us: Some(0),
            delivery_time_us: Some(10_000),
            latency_us: Some(10_000),
            link_id: Some("n0->n1".to_string()),
        };

        let line = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&line).unwrap();
        assert_eq!(back.net_meta.latency_us, Some(10_000));
        assert_eq!(back.net_meta.link_id.as_deref(), Some("n0->n1"));
    }

    #[test]
    fn test_node_id_ordering() {
        let mut ids = vec![NodeId::new("cloud"), NodeId::new("b"), NodeId::new("a")];
        ids.sort();
        assert_eq!(ids[0].as_str(), "a");
        assert_eq!(ids[2].as_str(), "cloud");
    }
}
