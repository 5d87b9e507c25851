//! In-process synthetic nodes.
//!
//! [`ScriptedNode`] plays back a fixed emission schedule and can echo its
//! inbox, which is enough to stand in for traffic sources, sinks, and
//! simple services in scenarios and tests without any external process.

use crate::in_process::InProcessNode;
use std::sync::{Arc, Mutex};
use tracing::debug;
use xedgesim_common::{Event, InitConfig, NodeId, SimError, SimTime};

/// Shared view of everything a scripted node has received.
pub type ReceivedEvents = Arc<Mutex<Vec<Event>>>;

/// A deterministic in-process node driven by a pre-built schedule.
pub struct ScriptedNode {
    id: NodeId,
    /// Events to emit, ordered by time.
    schedule: Vec<Event>,
    cursor: usize,
    /// When set, every received event is echoed back to its source with
    /// this prefix on the kind.
    echo_prefix: Option<String>,
    received: ReceivedEvents,
    current: SimTime,
    initialized: bool,
}

impl ScriptedNode {
    /// An empty node; acts as a pure sink until emissions are added.
    pub fn new(id: impl Into<NodeId>) -> Self {
        ScriptedNode {
            id: id.into(),
            schedule: Vec::new(),
            cursor: 0,
            echo_prefix: None,
            received: Arc::new(Mutex::new(Vec::new())),
            current: SimTime::ZERO,
            initialized: false,
        }
    }

    /// Schedule an emission at `time` toward `dst`.
    pub fn emit_at(
        mut self,
        time: SimTime,
        kind: impl Into<String>,
        dst: impl Into<NodeId>,
        payload: serde_json::Value,
    ) -> Self {
        self.schedule.push(
            Event::new(time, kind, self.id.clone())
                .with_dst(dst)
                .with_payload(payload),
        );
        self
    }

    /// Schedule a non-routed (metrics) emission at `time`.
    pub fn emit_local_at(
        mut self,
        time: SimTime,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        self.schedule
            .push(Event::new(time, kind, self.id.clone()).with_payload(payload));
        self
    }

    /// Echo every received event back to its source, prefixing the kind.
    pub fn with_echo_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.echo_prefix = Some(prefix.into());
        self
    }

    /// Handle for inspecting received events after the run.
    pub fn received_handle(&self) -> ReceivedEvents {
        Arc::clone(&self.received)
    }
}

impl InProcessNode for ScriptedNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn init(&mut self, _config: &InitConfig) -> Result<(), SimError> {
        self.schedule.sort_by_key(|e| e.time);
        self.cursor = 0;
        self.initialized = true;
        Ok(())
    }

    fn advance(&mut self, target: SimTime, pending: Vec<Event>) -> Result<Vec<Event>, SimError> {
        if !self.initialized {
            return Err(SimError::InvalidState(format!(
                "scripted node {} advanced before init",
                self.id
            )));
        }

        let mut produced = Vec::new();
        while self.cursor < self.schedule.len() && self.schedule[self.cursor].time <= target {
            produced.push(self.schedule[self.cursor].clone());
            self.cursor += 1;
        }

        for event in pending {
            debug!(node = %self.id, kind = %event.kind, from = %event.src, "scripted node received event");
            if let Some(prefix) = &self.echo_prefix {
                // The reply is emitted inside the advanced window, at the
                // start of it if the original timestamp lies behind us.
                let reply_time = event.time.max(self.current);
                produced.push(
                    Event::new(
                        reply_time,
                        format!("{prefix}{}", event.kind),
                        self.id.clone(),
                    )
                    .with_dst(event.src.clone())
                    .with_payload(event.payload.clone()),
                );
            }
            self.received.lock().expect("received lock").push(event);
        }

        self.current = target;
        Ok(produced)
    }
}
