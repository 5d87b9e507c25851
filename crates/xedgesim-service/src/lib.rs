//! # xedgesim-service
//!
//! The in-container half of the coordination protocol. A service process
//! links this crate, implements [`Service`], and hands control to
//! [`run_service`]: commands are read one per line from stdin, the matching
//! callback is invoked, and the response is written to stdout and flushed.
//!
//! stdout is reserved exclusively for protocol messages; all diagnostics go
//! to stderr. The loop flushes after every response because line-buffered
//! stdio is not sufficient across the runtimes the coordinator attaches to.
//!
//! ## Callback contract
//!
//! The advance callback must not sleep on wall-clock time, and every event
//! it returns must carry a `time_us` inside the advanced window
//! `[current_us, target_us]`; its execution time does not shift virtual
//! time. Violations are reported as [`ServiceError::Contract`] and
//! terminate the process.
//!
//! ## Example
//!
//! ```no_run
//! use xedgesim_common::{Event, SimTime};
//! use xedgesim_service::{run_service, Service, ServiceError};
//!
//! struct Echo;
//!
//! impl Service for Echo {
//!     fn init(&mut self, _seed: u64, _config: &serde_json::Value) -> Result<(), ServiceError> {
//!         Ok(())
//!     }
//!
//!     fn advance(
//!         &mut self,
//!         _current: SimTime,
//!         _target: SimTime,
//!         events: Vec<Event>,
//!     ) -> Result<Vec<Event>, ServiceError> {
//!         Ok(events)
//!     }
//! }
//!
//! fn main() -> Result<(), ServiceError> {
//!     run_service(&mut Echo)
//! }
//! ```

use std::io::{self, BufRead, BufReader, Write};
use thiserror::Error;
use xedgesim_common::{Event, SimTime};
use xedgesim_protocol::{write_message, Ack, Command};

/// Errors terminating a service process.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Reading stdin or writing stdout failed.
    #[error("stream error: {0}")]
    Io(#[from] io::Error),

    /// A line did not parse as a known command.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The service callback violated its contract.
    #[error("callback contract violation: {0}")]
    Contract(String),

    /// The service callback itself failed.
    #[error("service failure: {0}")]
    Service(String),
}

impl ServiceError {
    /// Callback failure with a formatted reason.
    pub fn service(reason: impl ToString) -> Self {
        ServiceError::Service(reason.to_string())
    }
}

/// The callbacks a container service author implements.
pub trait Service {
    /// Apply the scenario configuration. Called exactly once, before any
    /// advance. Seed any local RNG from `seed`.
    fn init(&mut self, seed: u64, config: &serde_json::Value) -> Result<(), ServiceError>;

    /// Consume `events` and simulate from `current` up to `target`,
    /// returning any events produced in that window.
    fn advance(
        &mut self,
        current: SimTime,
        target: SimTime,
        events: Vec<Event>,
    ) -> Result<Vec<Event>, ServiceError>;

    /// Called on SHUTDOWN, immediately before the loop returns.
    fn shutdown(&mut self) {}
}

/// Run the protocol loop on stdin/stdout until SHUTDOWN or EOF.
pub fn run_service<S: Service>(service: &mut S) -> Result<(), ServiceError> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_service_on(service, BufReader::new(stdin.lock()), stdout.lock())
}

/// Run the protocol loop on arbitrary streams.
///
/// Split out from [`run_service`] so the loop is testable against
/// in-memory streams.
pub fn run_service_on<S, R, W>(service: &mut S, reader: R, mut writer: W) -> Result<(), ServiceError>
where
    S: Service,
    R: BufRead,
    W: Write,
{
    let mut current = SimTime::ZERO;
    let mut initialized = false;

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let command: Command = serde_json::from_str(&line)
            .map_err(|e| ServiceError::Protocol(format!("bad command line: {e}")))?;

        match command {
            Command::Init { seed, config } => {
                service.init(seed, &config)?;
                initialized = true;
                write_message(&mut writer, &Ack::Ready)?;
            }

            Command::Advance { target_us, events } => {
                if !initialized {
                    return Err(ServiceError::Protocol("ADVANCE before INIT".to_string()));
                }
                let target = SimTime::from_micros(target_us);
                let produced = service.advance(current, target, events)?;
                for event in &produced {
                    if event.time < current || event.time > target {
                        return Err(ServiceError::Contract(format!(
                            "event \"{}\" at {} outside advanced window [{}, {}]",
                            event.kind, event.time, current, target
                        )));
                    }
                }
                current = target;
                write_message(
                    &mut writer,
                    &Ack::Done {
                        time_us: target_us,
                        events: produced,
                    },
                )?;
            }

            Command::Shutdown => {
                service.shutdown();
                return Ok(());
            }
        }
    }

    // EOF without SHUTDOWN: the attached session was torn down by the
    // launcher. Treat as an orderly end.
    eprintln!("xedgesim-service: stdin closed before SHUTDOWN, exiting");
    service.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;
    use xedgesim_common::NodeId;

    /// Echoes every input event back with its kind prefixed `echo_` and
    /// the destination swapped to the original source.
    struct EchoService {
        id: NodeId,
        seed: Option<u64>,
    }

    impl EchoService {
        fn new(id: &str) -> Self {
            EchoService {
                id: NodeId::new(id),
                seed: None,
            }
        }
    }

    impl Service for EchoService {
        fn init(&mut self, seed: u64, _config: &serde_json::Value) -> Result<(), ServiceError> {
            self.seed = Some(seed);
            Ok(())
        }

        fn advance(
            &mut self,
            _current: SimTime,
            _target: SimTime,
            events: Vec<Event>,
        ) -> Result<Vec<Event>, ServiceError> {
            Ok(events
                .into_iter()
                .map(|e| {
                    let reply_to = e.src.clone();
                    Event::new(e.time, format!("echo_{}", e.kind), self.id.clone())
                        .with_dst(reply_to)
                        .with_payload(e.payload)
                })
                .collect())
        }
    }

    fn responses(input: &str, service: &mut impl Service) -> Vec<Ack> {
        let mut out = Vec::new();
        run_service_on(service, Cursor::new(input.to_string()), &mut out).unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_init_emits_ready() {
        let mut service = EchoService::new("svc");
        let acks = responses(
            "{\"cmd\":\"INIT\",\"seed\":42,\"config\":{}}\n{\"cmd\":\"SHUTDOWN\"}\n",
            &mut service,
        );
        assert_eq!(acks, vec![Ack::Ready]);
        assert_eq!(service.seed, Some(42));
    }

    #[test]
    fn test_echo_advance() {
        let mut service = EchoService::new("svc");
        let input = concat!(
            "{\"cmd\":\"INIT\",\"seed\":7,\"config\":{}}\n",
            "{\"cmd\":\"ADVANCE\",\"target_us\":1000,\"events\":[",
            "{\"time_us\":500,\"kind\":\"ping\",\"src\":\"gen\",\"dst\":\"svc\",\"payload\":{\"n\":1}}",
            "]}\n",
            "{\"cmd\":\"SHUTDOWN\"}\n",
        );
        let acks = responses(input, &mut service);
        assert_eq!(acks.len(), 2);
        match &acks[1] {
            Ack::Done { time_us, events } => {
                assert_eq!(*time_us, 1000);
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].kind, "echo_ping");
                assert_eq!(events[0].dst, Some(NodeId::new("gen")));
                assert_eq!(events[0].payload, json!({"n": 1}));
            }
            other => panic!("expected DONE, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_advance_yields_empty_done() {
        let mut service = EchoService::new("svc");
        let input = concat!(
            "{\"cmd\":\"INIT\",\"seed\":1,\"config\":{}}\n",
            "{\"cmd\":\"ADVANCE\",\"target_us\":1000}\n",
            "{\"cmd\":\"SHUTDOWN\"}\n",
        );
        let acks = responses(input, &mut service);
        assert_eq!(
            acks[1],
            Ack::Done {
                time_us: 1000,
                events: Vec::new()
            }
        );
    }

    #[test]
    fn test_advance_before_init_rejected() {
        let mut service = EchoService::new("svc");
        let mut out = Vec::new();
        let err = run_service_on(
            &mut service,
            Cursor::new("{\"cmd\":\"ADVANCE\",\"target_us\":10}\n".to_string()),
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, ServiceError::Protocol(_)));
    }

    #[test]
    fn test_event_outside_window_rejected() {
        struct Rogue;
        impl Service for Rogue {
            fn init(&mut self, _: u64, _: &serde_json::Value) -> Result<(), ServiceError> {
                Ok(())
            }
            fn advance(
                &mut self,
                _current: SimTime,
                target: SimTime,
                _events: Vec<Event>,
            ) -> Result<Vec<Event>, ServiceError> {
                Ok(vec![Event::new(target + SimTime::from_micros(1), "late", "svc")])
            }
        }

        let mut out = Vec::new();
        let input = concat!(
            "{\"cmd\":\"INIT\",\"seed\":1,\"config\":{}}\n",
            "{\"cmd\":\"ADVANCE\",\"target_us\":100}\n",
        );
        let err = run_service_on(&mut Rogue, Cursor::new(input.to_string()), &mut out).unwrap_err();
        assert!(matches!(err, ServiceError::Contract(_)));
    }

    #[test]
    fn test_eof_without_shutdown_is_orderly() {
        let mut service = EchoService::new("svc");
        let mut out = Vec::new();
        run_service_on(
            &mut service,
            Cursor::new("{\"cmd\":\"INIT\",\"seed\":1,\"config\":{}}\n".to_string()),
            &mut out,
        )
        .unwrap();
    }
}
