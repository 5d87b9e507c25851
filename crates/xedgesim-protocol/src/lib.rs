//! # xedgesim-protocol
//!
//! The line-delimited JSON protocol spoken between the coordinator and
//! every external node, whether the transport is a TCP socket or the
//! stdin/stdout of a container-attached process.
//!
//! ## Framing
//!
//! One JSON object per line, UTF-8, LF terminator. Unknown fields inside a
//! message are ignored; unknown `cmd` / `ack` values are a protocol error.
//!
//! ## Messages
//!
//! Coordinator to node:
//!
//! ```json
//! {"cmd":"INIT","seed":42,"config":{}}
//! {"cmd":"ADVANCE","target_us":1000,"events":[]}
//! {"cmd":"SHUTDOWN"}
//! ```
//!
//! Node to coordinator:
//!
//! ```json
//! {"ack":"READY"}
//! {"ack":"DONE","time_us":1000,"events":[]}
//! ```

pub mod codec;
pub mod messages;

pub use codec::{write_message, LineCodec};
pub use messages::{Ack, Command};
