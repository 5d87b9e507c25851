//! The lockstep coordinator.
//!
//! Owns virtual time, all node adapters, and exactly one network model.
//! Runs a conservative synchronous loop on a single control thread: every
//! step, each node receives its pending events and advances one quantum,
//! in insertion order; everything the nodes emitted is routed through the
//! network model and buffered per destination for the next step.
//!
//! ## Determinism contract
//!
//! Given the same scenario (adapters, seeds, duration, quantum, network
//! configuration, node implementations), the sequence of events at every
//! destination is bit-identical across runs. The coordinator enforces the
//! ordering half of that contract: nodes advance in insertion order, and
//! delivery-ready events are stable-sorted by (destination, source, time)
//! with production order breaking ties.

use crate::adapter::NodeAdapter;
use metrics::counter;
use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use xedgesim_common::{Event, InitConfig, NodeId, SimError, SimTime};
use xedgesim_net::NetworkModel;

/// Default per-step virtual-time increment.
pub const DEFAULT_QUANTUM: SimTime = SimTime::from_micros(1_000);

/// The enumerated configuration record the coordinator is built with.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Total virtual time to simulate.
    pub duration: SimTime,
    /// Per-step virtual-time increment.
    pub quantum: SimTime,
    /// Scenario seed: derives link RNG seeds and is passed through in INIT.
    pub seed: u64,
}

impl CoordinatorConfig {
    /// Configuration with the default quantum.
    pub fn new(duration: SimTime, seed: u64) -> Self {
        CoordinatorConfig {
            duration,
            quantum: DEFAULT_QUANTUM,
            seed,
        }
    }

    /// Override the quantum.
    pub fn with_quantum(mut self, quantum: SimTime) -> Self {
        self.quantum = quantum;
        self
    }
}

/// Coordinator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Built, nothing connected yet.
    Created,
    /// Every adapter connected and initialized.
    Connected,
    /// The lockstep loop is executing.
    Running,
    /// The run ended; every adapter has been shut down.
    Done,
}

/// What a completed (or aborted) run did.
#[derive(Debug)]
pub struct RunSummary {
    /// Final virtual time.
    pub virtual_time: SimTime,
    /// Lockstep iterations executed.
    pub steps: u64,
    /// Events handed to the network model.
    pub events_routed: u64,
    /// Events buffered at a destination.
    pub events_delivered: u64,
    /// Events the network model dropped (modelled loss, not errors).
    pub events_dropped: u64,
    /// Non-routed (`dst = None`) events, retained for metrics consumers.
    pub local_events: Vec<Event>,
    /// Wall-clock duration of the run.
    pub wall_time: Duration,
    /// True when the run was stopped via the stop handle.
    pub interrupted: bool,
}

struct NodeEntry {
    adapter: Box<dyn NodeAdapter>,
    params: serde_json::Value,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("phase", &self.phase)
            .field("virtual_time", &self.virtual_time)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

/// The lockstep coordinator. See the module docs for the step algorithm.
pub struct Coordinator {
    config: CoordinatorConfig,
    network: Box<dyn NetworkModel>,
    nodes: Vec<NodeEntry>,
    /// Per-destination queues of events awaiting the next advance.
    pending: BTreeMap<NodeId, Vec<Event>>,
    virtual_time: SimTime,
    phase: Phase,
    stop: Arc<AtomicBool>,
    local_events: Vec<Event>,
    steps: u64,
    events_routed: u64,
    events_delivered: u64,
}

impl Coordinator {
    /// Coordinator over `network` with no nodes yet.
    pub fn new(config: CoordinatorConfig, network: Box<dyn NetworkModel>) -> Self {
        Coordinator {
            config,
            network,
            nodes: Vec::new(),
            pending: BTreeMap::new(),
            virtual_time: SimTime::ZERO,
            phase: Phase::Created,
            stop: Arc::new(AtomicBool::new(false)),
            local_events: Vec::new(),
            steps: 0,
            events_routed: 0,
            events_delivered: 0,
        }
    }

    /// Add a node. Insertion order is the advance order and therefore a
    /// determinism boundary.
    pub fn add_node(&mut self, adapter: Box<dyn NodeAdapter>) {
        self.add_node_with_params(adapter, serde_json::Value::Null);
    }

    /// Add a node with node-specific INIT parameters.
    pub fn add_node_with_params(&mut self, adapter: Box<dyn NodeAdapter>, params: serde_json::Value) {
        self.nodes.push(NodeEntry { adapter, params });
    }

    /// Flag observed between steps; setting it ends the run after the
    /// current step with a normal shutdown.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Current virtual time.
    pub fn virtual_time(&self) -> SimTime {
        self.virtual_time
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Execute the whole run: connect and initialize every node, iterate
    /// the lockstep loop, shut everything down.
    ///
    /// Shutdown of every adapter is guaranteed on all exit paths,
    /// including every error return.
    pub fn run(&mut self) -> Result<RunSummary, SimError> {
        if self.phase != Phase::Created {
            return Err(SimError::InvalidState(format!(
                "run called in phase {:?}",
                self.phase
            )));
        }
        if self.config.quantum == SimTime::ZERO {
            return Err(SimError::InvalidState("quantum must be positive".to_string()));
        }

        let started = Instant::now();

        if let Err(e) = self.connect_and_init() {
            self.finish();
            return Err(e);
        }
        self.phase = Phase::Running;
        info!(
            duration = %self.config.duration,
            quantum = %self.config.quantum,
            seed = self.config.seed,
            nodes = self.nodes.len(),
            "entering lockstep loop"
        );

        let mut interrupted = false;
        while self.virtual_time < self.config.duration {
            if self.stop.load(Ordering::Relaxed) {
                info!(virtual_time = %self.virtual_time, "stop requested, ending run");
                interrupted = true;
                break;
            }
            if let Err(e) = self.step() {
                self.finish();
                return Err(e);
            }
        }

        self.finish();
        let summary = RunSummary {
            virtual_time: self.virtual_time,
            steps: self.steps,
            events_routed: self.events_routed,
            events_delivered: self.events_delivered,
            events_dropped: self.network.dropped_count(),
            local_events: mem::take(&mut self.local_events),
            wall_time: started.elapsed(),
            interrupted,
        };
        info!(
            steps = summary.steps,
            routed = summary.events_routed,
            delivered = summary.events_delivered,
            dropped = summary.events_dropped,
            wall_ms = summary.wall_time.as_millis() as u64,
            "run finished"
        );
        Ok(summary)
    }

    fn connect_and_init(&mut self) -> Result<(), SimError> {
        let mut seen = BTreeMap::new();
        for entry in &self.nodes {
            if seen.insert(entry.adapter.node_id().clone(), ()).is_some() {
                return Err(SimError::InvalidState(format!(
                    "duplicate node id {}",
                    entry.adapter.node_id()
                )));
            }
        }

        for entry in &mut self.nodes {
            entry.adapter.connect()?;
        }
        for entry in &mut self.nodes {
            let config = InitConfig {
                seed: self.config.seed,
                params: entry.params.clone(),
            };
            entry.adapter.send_init(&config)?;
        }
        self.phase = Phase::Connected;
        Ok(())
    }

    /// One lockstep iteration.
    fn step(&mut self) -> Result<(), SimError> {
        let target = (self.virtual_time + self.config.quantum).min(self.config.duration);

        for entry in &mut self.nodes {
            let batch = self
                .pending
                .remove(entry.adapter.node_id())
                .unwrap_or_default();
            entry.adapter.send_advance(target, batch)?;
        }

        let mut produced = Vec::new();
        for entry in &mut self.nodes {
            produced.extend(entry.adapter.wait_done()?);
        }

        let mut working = Vec::new();
        for event in produced {
            if event.is_routed() {
                self.events_routed += 1;
                counter!("xedgesim_events_routed_total").increment(1);
                working.extend(self.network.route_message(event));
            } else {
                counter!("xedgesim_events_local_total").increment(1);
                self.local_events.push(event);
            }
        }
        working.extend(self.network.advance_to(target));

        // Stable sort: production order breaks ties within equal keys.
        working.sort_by(|a, b| {
            a.dst
                .cmp(&b.dst)
                .then_with(|| a.src.cmp(&b.src))
                .then_with(|| a.time.cmp(&b.time))
        });

        for event in working {
            let Some(dst) = event.dst.clone() else {
                warn!(kind = %event.kind, "network model returned an event without destination, dropping");
                continue;
            };
            if !self.nodes.iter().any(|e| e.adapter.node_id() == &dst) {
                warn!(%dst, kind = %event.kind, "event for unknown destination, dropping");
                continue;
            }
            self.pending.entry(dst).or_default().push(event);
            self.events_delivered += 1;
            counter!("xedgesim_events_delivered_total").increment(1);
        }

        self.virtual_time = target;
        self.steps += 1;
        counter!("xedgesim_steps_total").increment(1);
        debug!(virtual_time = %self.virtual_time, steps = self.steps, "step complete");
        Ok(())
    }

    /// Shut every adapter down and enter DONE. Idempotent; shutdown errors
    /// are logged and swallowed.
    fn finish(&mut self) {
        if self.phase == Phase::Done {
            return;
        }
        for entry in &mut self.nodes {
            if let Err(e) = entry.adapter.send_shutdown() {
                warn!(node = %entry.adapter.node_id(), error = %e, "adapter shutdown failed");
            }
        }
        self.phase = Phase::Done;
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        // Backstop for panics inside the loop; normal paths have already
        // reached DONE by now.
        self.finish();
    }
}
