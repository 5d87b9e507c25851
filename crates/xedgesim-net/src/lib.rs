//! # xedgesim-net
//!
//! Network models for the co-simulation core. A model receives every
//! routed event exactly once, decides whether and when it is delivered,
//! and hands delivery-ready events back to the coordinator as virtual time
//! advances.
//!
//! Two models ship: [`DirectModel`] (zero-latency, lossless, single-hop)
//! and [`LatencyModel`] (per-link deterministic latency and loss).

pub mod direct;
pub mod latency;

pub use direct::DirectModel;
pub use latency::{LatencyModel, LinkConfig};

use serde::{Deserialize, Serialize};
use xedgesim_common::{Event, SimTime};

/// The coordinator's view of a network model.
pub trait NetworkModel: Send {
    /// Route one emitted event. Called exactly once per event with
    /// `dst` set. Returns events ready for immediate delivery; events
    /// delayed to a later virtual time are retained internally.
    fn route_message(&mut self, event: Event) -> Vec<Event>;

    /// Release retained events whose delivery time has been reached.
    ///
    /// Returns all queued events with `delivery_time_us <= target`, in
    /// delivery-time order, ties broken by insertion order.
    fn advance_to(&mut self, target: SimTime) -> Vec<Event>;

    /// Clear all queued state and re-seed the per-link RNGs.
    fn reset(&mut self);

    /// Events dropped by the model so far. Modelled outcomes, not errors.
    fn dropped_count(&self) -> u64 {
        0
    }
}

/// Declarative model selection, as it appears in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum NetworkModelConfig {
    /// Zero-latency, lossless delivery.
    Direct,
    /// Per-link latency and loss with a default for unlisted pairs.
    Latency {
        /// Latency applied when no link entry matches, in microseconds.
        #[serde(default)]
        default_latency_us: u64,
        /// Loss rate applied when no link entry matches.
        #[serde(default)]
        default_loss_rate: f64,
        /// Explicit per-link entries.
        #[serde(default)]
        links: Vec<LinkSpec>,
    },
}

/// One (src, dst) link entry in a scenario file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSpec {
    /// Source node id.
    pub src: String,
    /// Destination node id.
    pub dst: String,
    /// One-way latency in microseconds.
    pub latency_us: u64,
    /// Probability in [0, 1] that an event on this link is dropped.
    #[serde(default)]
    pub loss_rate: f64,
}

impl NetworkModelConfig {
    /// Build the configured model, deriving link RNG seeds from `seed`.
    pub fn build(&self, seed: u64) -> Box<dyn NetworkModel> {
        match self {
            NetworkModelConfig::Direct => Box::new(DirectModel::new()),
            NetworkModelConfig::Latency {
                default_latency_us,
                default_loss_rate,
                links,
            } => {
                let mut model = LatencyModel::new(
                    seed,
                    LinkConfig {
                        latency: SimTime::from_micros(*default_latency_us),
                        loss_rate: *default_loss_rate,
                    },
                );
                for link in links {
                    model.set_link(
                        link.src.as_str().into(),
                        link.dst.as_str().into(),
                        LinkConfig {
                            latency: SimTime::from_micros(link.latency_us),
                            loss_rate: link.loss_rate,
                        },
                    );
                }
                Box::new(model)
            }
        }
    }
}
