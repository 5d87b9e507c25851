//! Line framing for the coordination protocol.
//!
//! Messages are framed as one JSON object per line with an LF terminator.
//! The codec accumulates raw bytes as they arrive from a stream and yields
//! complete lines; parsing into [`Command`](crate::Command) or
//! [`Ack`](crate::Ack) is the caller's step so transport errors and schema
//! errors stay distinguishable.

use bytes::BytesMut;
use serde::Serialize;
use std::io::{self, Write};

/// A codec that accumulates bytes and yields complete LF-terminated lines.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Buffer for accumulating incoming data.
    buffer: BytesMut,
}

impl LineCodec {
    /// Create a new line codec.
    pub fn new() -> Self {
        LineCodec {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add received data to the buffer.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to take one complete line from the buffer.
    ///
    /// Returns `Some(line)` without the terminator if a full line is
    /// available, `None` if more data is needed. A trailing CR before the
    /// LF is stripped. Empty lines are skipped.
    pub fn decode_line(&mut self) -> Option<String> {
        loop {
            let end = self.buffer.iter().position(|&b| b == b'\n')?;
            let line_data = self.buffer.split_to(end + 1);
            let mut line = &line_data[..end];
            if line.ends_with(b"\r") {
                line = &line[..line.len() - 1];
            }
            if line.is_empty() {
                continue;
            }
            return Some(String::from_utf8_lossy(line).to_string());
        }
    }

    /// Encode a message as one JSON line with an LF terminator.
    pub fn encode<T: Serialize>(msg: &T) -> serde_json::Result<Vec<u8>> {
        let mut buf = serde_json::to_vec(msg)?;
        buf.push(b'\n');
        Ok(buf)
    }

    /// Number of buffered bytes awaiting a terminator.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard any buffered partial data.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Write one message as a JSON line and flush the stream.
///
/// Flushing after every message is part of the protocol contract; buffered
/// writers on either side of a stdio transport will deadlock without it.
pub fn write_message<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> io::Result<()> {
    let line = LineCodec::encode(msg)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    writer.write_all(&line)?;
    writer.flush()
}
