//! Adapter driving an external process over a TCP socket.
//!
//! One TCP connection per node, line-delimited JSON framing. Connection
//! setup retries with exponential backoff; every protocol read is bounded
//! by a timeout. All protocol failures are fatal to the run: socket EOF is
//! [`SimError::ConnectionLost`], malformed JSON is [`SimError::Protocol`],
//! and a missed deadline is [`SimError::Timeout`].

use crate::adapter::{finalize_produced, AdapterTimeouts, NodeAdapter};
use std::io::{ErrorKind, Read};
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use xedgesim_common::{Event, InitConfig, NodeId, SimError, SimTime};
use xedgesim_protocol::{write_message, Ack, Command, LineCodec};

/// Default number of connection attempts.
const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
/// Initial backoff between connection attempts.
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
/// Backoff ceiling.
const MAX_BACKOFF: Duration = Duration::from_secs(2);
/// Per-attempt TCP connect timeout.
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

/// Drives an external node process over a line-delimited JSON socket.
pub struct SocketNodeAdapter {
    node_id: NodeId,
    addr: SocketAddr,
    timeouts: AdapterTimeouts,
    connect_attempts: u32,
    stream: Option<TcpStream>,
    codec: LineCodec,
    current: SimTime,
    last_target: SimTime,
    initialized: bool,
    shut_down: bool,
}

impl SocketNodeAdapter {
    /// Adapter for the node process listening at `addr`.
    pub fn new(node_id: impl Into<NodeId>, addr: SocketAddr) -> Self {
        SocketNodeAdapter {
            node_id: node_id.into(),
            addr,
            timeouts: AdapterTimeouts::default(),
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            stream: None,
            codec: LineCodec::new(),
            current: SimTime::ZERO,
            last_target: SimTime::ZERO,
            initialized: false,
            shut_down: false,
        }
    }

    /// Override the timeout budget.
    pub fn with_timeouts(mut self, timeouts: AdapterTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Override the number of connection attempts.
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts.max(1);
        self
    }

    fn write_command(&mut self, command: &Command) -> Result<(), SimError> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| SimError::InvalidState(format!("{} is not connected", self.node_id)))?;
        write_message(stream, command).map_err(|e| match e.kind() {
            ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                SimError::connection_lost(&self.node_id, e)
            }
            _ => SimError::Resource(format!("socket write to {}: {}", self.node_id, e)),
        })
    }

    /// Read one protocol line, bounded by `timeout`.
    fn read_line(&mut self, timeout: Duration, what: &'static str) -> Result<String, SimError> {
        let SocketNodeAdapter {
            node_id,
            stream,
            codec,
            ..
        } = self;
        if let Some(line) = codec.decode_line() {
            return Ok(line);
        }
        let stream = stream
            .as_mut()
            .ok_or_else(|| SimError::InvalidState(format!("{node_id} is not connected")))?;

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 4096];
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .filter(|d| !d.is_zero())
                .ok_or_else(|| SimError::timeout(&*node_id, what, timeout))?;
            stream
                .set_read_timeout(Some(remaining))
                .map_err(|e| SimError::Resource(format!("set_read_timeout: {e}")))?;

            match stream.read(&mut buf) {
                Ok(0) => {
                    return Err(SimError::connection_lost(&*node_id, "socket EOF"));
                }
                Ok(n) => {
                    codec.push(&buf[..n]);
                    if let Some(line) = codec.decode_line() {
                        return Ok(line);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return Err(SimError::timeout(&*node_id, what, timeout));
                }
                Err(e) => {
                    return Err(SimError::connection_lost(&*node_id, e));
                }
            }
        }
    }

    fn read_ack(&mut self, timeout: Duration, what: &'static str) -> Result<Ack, SimError> {
        let line = self.read_line(timeout, what)?;
        serde_json::from_str(&line)
            .map_err(|e| SimError::protocol(&self.node_id, format!("bad ack line: {e}")))
    }
}

impl NodeAdapter for SocketNodeAdapter {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn connect(&mut self) -> Result<(), SimError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let mut backoff = INITIAL_BACKOFF;
        let mut last_error = String::new();
        for attempt in 1..=self.connect_attempts {
            match TcpStream::connect_timeout(&self.addr, CONNECT_ATTEMPT_TIMEOUT) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    info!(node = %self.node_id, addr = %self.addr, attempt, "socket node connected");
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => {
                    debug!(node = %self.node_id, addr = %self.addr, attempt, error = %e, "connect attempt failed");
                    last_error = e.to_string();
                }
            }
            if attempt < self.connect_attempts {
                thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }

        Err(SimError::connection(
            &self.node_id,
            format!(
                "{} after {} attempts: {}",
                self.addr, self.connect_attempts, last_error
            ),
        ))
    }

    fn send_init(&mut self, config: &InitConfig) -> Result<(), SimError> {
        self.write_command(&Command::Init {
            seed: config.seed,
            config: config.params.clone(),
        })?;
        match self.read_ack(self.timeouts.init, "READY")? {
            Ack::Ready => {
                self.initialized = true;
                Ok(())
            }
            Ack::Done { .. } => Err(SimError::protocol(
                &self.node_id,
                "expected READY after INIT, got DONE",
            )),
        }
    }

    fn send_advance(&mut self, target: SimTime, pending: Vec<Event>) -> Result<(), SimError> {
        if !self.initialized {
            return Err(SimError::InvalidState(format!(
                "advance of {} before init",
                self.node_id
            )));
        }
        if target < self.last_target {
            return Err(SimError::InvalidState(format!(
                "advance target {} regressed below {}",
                target, self.last_target
            )));
        }
        self.last_target = target;
        self.write_command(&Command::Advance {
            target_us: target.as_micros(),
            events: pending,
        })
    }

    fn wait_done(&mut self) -> Result<Vec<Event>, SimError> {
        match self.read_ack(self.timeouts.advance, "DONE")? {
            Ack::Done { time_us, events } => {
                let reported = SimTime::from_micros(time_us);
                if reported > self.last_target {
                    return Err(SimError::protocol(
                        &self.node_id,
                        format!(
                            "DONE at {} overtakes the advance target {}",
                            reported, self.last_target
                        ),
                    ));
                }
                if reported < self.current {
                    return Err(SimError::protocol(
                        &self.node_id,
                        format!("DONE at {} went backwards from {}", reported, self.current),
                    ));
                }
                self.current = reported;
                finalize_produced(&self.node_id, self.last_target, events)
            }
            Ack::Ready => Err(SimError::protocol(
                &self.node_id,
                "expected DONE after ADVANCE, got READY",
            )),
        }
    }

    fn send_shutdown(&mut self) -> Result<(), SimError> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        if self.stream.is_some() {
            if let Err(e) = self.write_command(&Command::Shutdown) {
                warn!(node = %self.node_id, error = %e, "SHUTDOWN send failed");
            }
            if let Some(stream) = self.stream.take() {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
        }
        Ok(())
    }

    fn current_time(&self) -> SimTime {
        self.current
    }
}
