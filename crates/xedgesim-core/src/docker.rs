//! Adapter driving a service inside an already-running container.
//!
//! A launcher outside the core starts the container; this adapter opens an
//! interactive session executing the container's service entrypoint and
//! speaks the INIT/ADVANCE/SHUTDOWN protocol over that session's
//! stdin/stdout. The service must run its stdio unbuffered and flush after
//! every response, or the protocol deadlocks.
//!
//! stdout is consumed by a dedicated reader thread feeding a bounded
//! channel (see [`crate::reader`] for why readiness polling cannot replace
//! it); a second thread drains stderr into the log so the container cannot
//! deadlock on a full pipe. The container itself is stopped by its
//! launcher, never by this adapter.

use crate::adapter::{finalize_produced, AdapterTimeouts, NodeAdapter};
use crate::reader::{spawn_line_logger, spawn_line_reader, LineReader};
use crossbeam_channel::RecvTimeoutError;
use std::process::{Child, ChildStdin, Command as ProcessCommand, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use xedgesim_common::{Event, InitConfig, NodeId, SimError, SimTime};
use xedgesim_protocol::{write_message, Ack, Command};

/// Capacity of the stdout line channel.
const STDOUT_CHANNEL_CAPACITY: usize = 1024;

/// Drives a containerized service over an interactive attach.
pub struct DockerAdapter {
    node_id: NodeId,
    /// Program and arguments that open the interactive session.
    session_command: Vec<String>,
    timeouts: AdapterTimeouts,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout_lines: Option<LineReader>,
    stderr_logger: Option<thread::JoinHandle<()>>,
    current: SimTime,
    last_target: SimTime,
    initialized: bool,
    shut_down: bool,
}

impl DockerAdapter {
    /// Adapter for the service entrypoint inside `container`.
    ///
    /// The session is opened with `docker exec -i <container> <entrypoint...>`.
    pub fn new(
        node_id: impl Into<NodeId>,
        container: impl Into<String>,
        entrypoint: impl IntoIterator<Item = String>,
    ) -> Self {
        let mut session_command = vec![
            "docker".to_string(),
            "exec".to_string(),
            "-i".to_string(),
            container.into(),
        ];
        session_command.extend(entrypoint);
        Self::with_session_command(node_id, session_command)
    }

    /// Adapter over an arbitrary session command.
    ///
    /// This is the seam for non-Docker container engines (and for tests):
    /// any program whose stdin/stdout carry the protocol works.
    pub fn with_session_command(node_id: impl Into<NodeId>, session_command: Vec<String>) -> Self {
        DockerAdapter {
            node_id: node_id.into(),
            session_command,
            timeouts: AdapterTimeouts::default(),
            child: None,
            stdin: None,
            stdout_lines: None,
            stderr_logger: None,
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

    fn write_command(&mut self, command: &Command) -> Result<(), SimError> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| SimError::InvalidState(format!("{} is not attached", self.node_id)))?;
        write_message(stdin, command)
            .map_err(|e| SimError::connection_lost(&self.node_id, format!("session stdin: {e}")))
    }

    /// Wait for one ack line from the stdout channel.
    fn read_ack(&mut self, timeout: Duration, what: &'static str) -> Result<Ack, SimError> {
        let lines = self
            .stdout_lines
            .as_ref()
            .ok_or_else(|| SimError::InvalidState(format!("{} is not attached", self.node_id)))?;
        let line = match lines.recv_timeout(timeout) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => {
                return Err(SimError::timeout(&self.node_id, what, timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(SimError::connection_lost(
                    &self.node_id,
                    "session stdout closed",
                ));
            }
        };
        serde_json::from_str(&line)
            .map_err(|e| SimError::protocol(&self.node_id, format!("bad ack line: {e}")))
    }

    /// Force-terminate the session process if it outlives the grace period.
    fn reap_child(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        let deadline = Instant::now() + self.timeouts.shutdown_grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(node = %self.node_id, %status, "session process exited");
                    return;
                }
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!(node = %self.node_id, "session process still alive, killing");
                        let _ = child.kill();
                        let _ = child.wait();
                        return;
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => {
                    warn!(node = %self.node_id, error = %e, "wait on session process failed");
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
            }
        }
    }
}

impl NodeAdapter for DockerAdapter {
    fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn connect(&mut self) -> Result<(), SimError> {
        if self.child.is_some() {
            return Ok(());
        }
        let (program, args) = self
            .session_command
            .split_first()
            .ok_or_else(|| SimError::InvalidState("empty session command".to_string()))?;

        let mut child = ProcessCommand::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                SimError::connection(&self.node_id, format!("spawning {program}: {e}"))
            })?;

        // A session that dies immediately (missing container, bad
        // entrypoint) is a connect failure, not a protocol failure.
        if let Ok(Some(status)) = child.try_wait() {
            return Err(SimError::connection(
                &self.node_id,
                format!("session exited at startup with {status}"),
            ));
        }

        let stdin = child.stdin.take().ok_or_else(|| {
            SimError::Resource(format!("{}: session stdin unavailable", self.node_id))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SimError::Resource(format!("{}: session stdout unavailable", self.node_id))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            SimError::Resource(format!("{}: session stderr unavailable", self.node_id))
        })?;

        self.stdout_lines = Some(spawn_line_reader(
            format!("{}-stdout", self.node_id),
            stdout,
            STDOUT_CHANNEL_CAPACITY,
        ));
        self.stderr_logger = Some(spawn_line_logger(
            format!("{}-stderr", self.node_id),
            self.node_id.to_string(),
            stderr,
        ));
        self.stdin = Some(stdin);
        self.child = Some(child);
        info!(node = %self.node_id, "container session attached");
        Ok(())
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

        if self.stdin.is_some() {
            if let Err(e) = self.write_command(&Command::Shutdown) {
                warn!(node = %self.node_id, error = %e, "SHUTDOWN send failed");
            }
        }
        // Closing stdin delivers EOF to the service even if it ignored the
        // SHUTDOWN command.
        drop(self.stdin.take());

        if let Some(mut lines) = self.stdout_lines.take() {
            if !lines.wait_eof(self.timeouts.shutdown_grace) {
                warn!(node = %self.node_id, "session stdout did not reach EOF within grace period");
            }
        }
        self.reap_child();
        if let Some(handle) = self.stderr_logger.take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn current_time(&self) -> SimTime {
        self.current
    }
}

impl Drop for DockerAdapter {
    fn drop(&mut self) {
        // The run loop shuts adapters down on every exit path; this is the
        // backstop for panics between connect and shutdown.
        let _ = self.send_shutdown();
    }
}
