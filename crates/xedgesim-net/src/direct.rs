//! Zero-latency, lossless delivery.

use crate::NetworkModel;
use xedgesim_common::{Event, NetMeta, SimTime};

/// Delivers every routed event unchanged in the step it was emitted.
///
/// Semantics: zero latency, no loss, FIFO, single hop. Routing metadata is
/// still written so consumers can rely on the through-the-model invariant.
#[derive(Debug, Default)]
pub struct DirectModel;

impl DirectModel {
    /// Create a direct model.
    pub fn new() -> Self {
        DirectModel
    }
}

impl NetworkModel for DirectModel {
    fn route_message(&mut self, mut event: Event) -> Vec<Event> {
        debug_assert!(event.is_routed(), "route_message requires a destination");
        let now = event.time.as_micros();
        let link_id = match &event.dst {
            Some(dst) => format!("{}->{}", event.src, dst),
            None => return Vec::new(),
        };
        event.net_meta = NetMeta {
            sent_time_us: Some(now),
            delivery_time_us: Some(now),
            latency_us: Some(0),
            link_id: Some(link_id),
        };
        vec![event]
    }

    fn advance_to(&mut self, _target: SimTime) -> Vec<Event> {
        Vec::new()
    }

    fn reset(&mut self) {}
}
