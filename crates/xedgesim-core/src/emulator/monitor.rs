//! Client for the emulator's text monitor protocol.
//!
//! Commands are newline-terminated; the emulator echoes a prompt after
//! each one. Two prompt forms appear on the wire: the generic
//! `(monitor) ` before any machine exists, and `(<machine_name>) ` once a
//! machine has been created. Both must be recognized; matching only the
//! generic form deadlocks on the first advance after startup.
//!
//! The monitor port is a telnet server, so IAC negotiation sequences are
//! stripped before prompt matching.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace};
use xedgesim_common::{NodeId, SimError};

/// Telnet IAC byte.
const IAC: u8 = 0xFF;

/// Remove telnet IAC sequences from `data`, appending the rest to `out`.
///
/// Handles escaped literals (IAC IAC), three-byte option negotiation
/// (IAC WILL/WONT/DO/DONT opt) and two-byte commands. Subnegotiation
/// payloads do not appear on the monitor port.
fn strip_telnet_iac(data: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        if b != IAC {
            out.push(b);
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(&IAC) => {
                out.push(IAC);
                i += 2;
            }
            Some(0xFB..=0xFE) => i += 3,
            Some(_) => i += 2,
            None => i += 1,
        }
    }
}

/// If `buffer` currently ends with a prompt, return the byte offset where
/// the prompt line starts.
///
/// A prompt is a final line of the shape `(<label>) ` with no text after
/// it; the label is the machine name, or `monitor` before any machine
/// exists.
fn prompt_start(buffer: &[u8]) -> Option<usize> {
    let line_start = buffer
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|p| p + 1)
        .unwrap_or(0);
    let tail = &buffer[line_start..];
    let trimmed = std::str::from_utf8(tail).ok()?.trim_end_matches([' ', '\r']);
    if trimmed.len() >= 3 && trimmed.starts_with('(') && trimmed.ends_with(')') {
        Some(line_start)
    } else {
        None
    }
}

/// A connected monitor session.
#[derive(Debug)]
pub struct MonitorClient {
    node: NodeId,
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl MonitorClient {
    /// Poll-connect to the monitor port, retrying while the emulator
    /// starts up.
    pub fn connect(
        node: &NodeId,
        addr: SocketAddr,
        attempts: u32,
        backoff: Duration,
    ) -> Result<Self, SimError> {
        let mut last_error = String::new();
        for attempt in 1..=attempts.max(1) {
            match TcpStream::connect_timeout(&addr, Duration::from_secs(1)) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    debug!(node = %node, %addr, attempt, "monitor socket connected");
                    return Ok(MonitorClient {
                        node: node.clone(),
                        stream,
                        buffer: Vec::new(),
                    });
                }
                Err(e) => last_error = e.to_string(),
            }
            if attempt < attempts {
                thread::sleep(backoff);
            }
        }
        Err(SimError::connection(
            node,
            format!("monitor port {addr} unreachable after {attempts} attempts: {last_error}"),
        ))
    }

    /// Read until a prompt (either form) is observed, returning the text
    /// that preceded it.
    pub fn wait_prompt(&mut self, timeout: Duration) -> Result<String, SimError> {
        let deadline = Instant::now() + timeout;
        let mut raw = [0u8; 4096];
        loop {
            if let Some(start) = prompt_start(&self.buffer) {
                let output = String::from_utf8_lossy(&self.buffer[..start]).into_owned();
                self.buffer.clear();
                return Ok(output);
            }

            let remaining = deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
                .ok_or_else(|| SimError::timeout(&self.node, "monitor prompt", timeout))?;
            self.stream
                .set_read_timeout(Some(remaining))
                .map_err(|e| SimError::Resource(format!("set_read_timeout: {e}")))?;

            match self.stream.read(&mut raw) {
                Ok(0) => {
                    return Err(SimError::connection_lost(&self.node, "monitor socket EOF"));
                }
                Ok(n) => strip_telnet_iac(&raw[..n], &mut self.buffer),
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return Err(SimError::timeout(&self.node, "monitor prompt", timeout));
                }
                Err(e) => return Err(SimError::connection_lost(&self.node, e)),
            }
        }
    }

    /// Issue one command and read until the next prompt, returning the
    /// command's output.
    pub fn command(&mut self, command: &str, timeout: Duration) -> Result<String, SimError> {
        trace!(node = %self.node, command, "monitor command");
        self.send_line(command)?;
        self.wait_prompt(timeout)
    }

    /// Write one newline-terminated line without waiting for a prompt.
    ///
    /// Used for `quit`, after which no prompt follows.
    pub fn send_line(&mut self, line: &str) -> Result<(), SimError> {
        self.stream
            .write_all(line.as_bytes())
            .and_then(|_| self.stream.write_all(b"\n"))
            .and_then(|_| self.stream.flush())
            .map_err(|e| SimError::connection_lost(&self.node, format!("monitor write: {e}")))
    }
}
