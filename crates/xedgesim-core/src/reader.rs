//! Blocking line-reader threads for stdio transports.
//!
//! Readiness polling on buffered text streams is unsound in several
//! runtimes: bytes already pulled into the peer's line buffer are
//! invisible to kernel-level readiness, so polling reports "no data" while
//! a complete line sits in user space, and the caller times out spuriously.
//! A thread that blocks in `read_line` and hands complete lines to a
//! bounded channel sidesteps that entire class of bug and gives the
//! consumer clean `recv_timeout` semantics.
//!
//! Reader threads never call back into adapter logic; they only enqueue.
//! They terminate when the underlying stream reaches EOF or errors.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use std::io::{BufRead, BufReader, Read};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::debug;

/// Lines arriving from a background reader thread.
pub struct LineReader {
    rx: Receiver<String>,
    handle: Option<JoinHandle<()>>,
}

/// Spawn a thread that reads LF-terminated lines from `source` and
/// enqueues them on a bounded channel.
pub fn spawn_line_reader<R>(name: String, source: R, capacity: usize) -> LineReader
where
    R: Read + Send + 'static,
{
    let (tx, rx) = bounded(capacity);
    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            let mut reader = BufReader::new(source);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line) {
                    Ok(0) => break,
                    Ok(_) => {
                        let trimmed = line.trim_end_matches(['\r', '\n']);
                        if trimmed.is_empty() {
                            continue;
                        }
                        if tx.send(trimmed.to_string()).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "line reader stopping on stream error");
                        break;
                    }
                }
            }
        })
        .expect("failed to spawn reader thread");

    LineReader {
        rx,
        handle: Some(handle),
    }
}

/// Spawn a thread that drains `source` line by line into the log.
///
/// Used for container stderr: the pipe must be drained continuously or the
/// OS buffer fills and deadlocks the service.
pub fn spawn_line_logger<R>(name: String, target: String, source: R) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(move || {
            let reader = BufReader::new(source);
            for line in reader.lines() {
                match line {
                    Ok(line) if !line.trim().is_empty() => {
                        debug!(node = %target, "stderr: {}", line);
                    }
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        })
        .expect("failed to spawn stderr logger thread")
}

impl LineReader {
    /// Wait up to `timeout` for the next line.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Take a line if one is already queued.
    pub fn try_recv(&self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `grace` for the stream to reach EOF, discarding any
    /// remaining lines. Returns true when EOF was observed and the thread
    /// joined; false when the deadline passed first.
    pub fn wait_eof(&mut self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        loop {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(d) if !d.is_zero() => d,
                _ => return false,
            };
            match self.rx.recv_timeout(remaining.min(Duration::from_millis(100))) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    if let Some(handle) = self.handle.take() {
                        let _ = handle.join();
                    }
                    return true;
                }
                Err(RecvTimeoutError::Timeout) => continue,
            }
        }
    }
}
