//! # xedgesim-common
//!
//! Common types shared by every crate in the xEdgeSim workspace: the virtual
//! timeline, node identifiers, the event value object and its wire schema,
//! the INIT configuration record, and the error taxonomy of the
//! co-simulation core.

pub mod config;
pub mod error;
pub mod event;
pub mod time;

pub use config::InitConfig;
pub use error::SimError;
pub use event::{Event, NetMeta, NodeId};
pub use time::SimTime;
