//! Socket adapter tests against an in-process TCP node.
//!
//! A thread on the far end of a loopback connection speaks the node side
//! of the protocol, so the full lifecycle is exercised without any
//! external process.

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener};
use std::thread;
use std::time::Duration;
use xedgesim_common::{Event, InitConfig, NodeId, SimError, SimTime};
use xedgesim_core::{AdapterTimeouts, NodeAdapter, SocketNodeAdapter};
use xedgesim_protocol::{Ack, Command};

fn us(n: u64) -> SimTime {
    SimTime::from_micros(n)
}

fn short_timeouts() -> AdapterTimeouts {
    AdapterTimeouts {
        init: Duration::from_secs(2),
        advance: Duration::from_secs(2),
        shutdown_grace: Duration::from_millis(500),
    }
}

/// Spawn a node that acks INIT and answers every ADVANCE by echoing the
/// delivered events with an `echo_` kind prefix.
fn spawn_echo_node() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).unwrap_or(0) == 0 {
                return;
            }
            let command: Command = match serde_json::from_str(&line) {
                Ok(command) => command,
                Err(_) => return,
            };
            let response = match command {
                Command::Init { .. } => Ack::Ready,
                Command::Advance { target_us, events } => Ack::Done {
                    time_us: target_us,
                    events: events
                        .into_iter()
                        .map(|e| {
                            Event::new(e.time, format!("echo_{}", e.kind), "ext")
                                .with_dst(e.src.clone())
                                .with_payload(e.payload)
                        })
                        .collect(),
                },
                Command::Shutdown => return,
            };
            writeln!(writer, "{}", serde_json::to_string(&response).unwrap()).unwrap();
        }
    });
    addr
}

/// Spawn a node that sends one fixed raw line in response to anything.
fn spawn_canned_node(canned: &'static str) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 {
            return;
        }
        let _ = writeln!(writer, "{canned}");
    });
    addr
}

#[test]
fn test_full_lifecycle_with_event_round_trip() {
    let addr = spawn_echo_node();
    let mut adapter = SocketNodeAdapter::new("ext", addr).with_timeouts(short_timeouts());

    adapter.connect().unwrap();
    adapter
        .send_init(&InitConfig::new(42).with_params(json!({"mode": "echo"})))
        .unwrap();

    let outgoing = Event::new(us(250), "ping", "gen")
        .with_dst("ext")
        .with_payload(json!({"n": 7}));
    adapter.send_advance(us(1_000), vec![outgoing]).unwrap();
    let produced = adapter.wait_done().unwrap();

    assert_eq!(produced.len(), 1);
    assert_eq!(produced[0].kind, "echo_ping");
    // The adapter stamps the source regardless of what the node claimed.
    assert_eq!(produced[0].src, NodeId::new("ext"));
    assert_eq!(produced[0].dst, Some(NodeId::new("gen")));
    assert_eq!(produced[0].payload, json!({"n": 7}));
    assert_eq!(adapter.current_time(), us(1_000));

    adapter.send_shutdown().unwrap();
    adapter.send_shutdown().unwrap();
}

#[test]
fn test_advance_before_init_rejected() {
    let addr = spawn_echo_node();
    let mut adapter = SocketNodeAdapter::new("ext", addr).with_timeouts(short_timeouts());
    adapter.connect().unwrap();
    assert!(matches!(
        adapter.send_advance(us(1_000), Vec::new()).unwrap_err(),
        SimError::InvalidState(_)
    ));
}

#[test]
fn test_connect_gives_up_after_attempts() {
    // Bind then drop to obtain a port with no listener behind it.
    let probe = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let mut adapter = SocketNodeAdapter::new("ext", addr)
        .with_timeouts(short_timeouts())
        .with_connect_attempts(2);
    assert!(matches!(
        adapter.connect().unwrap_err(),
        SimError::Connection { .. }
    ));
    // Shutdown remains callable after a failed connect.
    adapter.send_shutdown().unwrap();
}

#[test]
fn test_malformed_ack_is_protocol_error() {
    let addr = spawn_canned_node("{\"ack\":\"BUSY\"}");
    let mut adapter = SocketNodeAdapter::new("ext", addr).with_timeouts(short_timeouts());
    adapter.connect().unwrap();
    assert!(matches!(
        adapter.send_init(&InitConfig::new(1)).unwrap_err(),
        SimError::Protocol { .. }
    ));
}

#[test]
fn test_done_where_ready_expected_is_protocol_error() {
    let addr = spawn_canned_node("{\"ack\":\"DONE\",\"time_us\":0,\"events\":[]}");
    let mut adapter = SocketNodeAdapter::new("ext", addr).with_timeouts(short_timeouts());
    adapter.connect().unwrap();
    assert!(matches!(
        adapter.send_init(&InitConfig::new(1)).unwrap_err(),
        SimError::Protocol { .. }
    ));
}

#[test]
fn test_peer_eof_is_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        // Accept and immediately hang up.
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
    });

    let mut adapter = SocketNodeAdapter::new("ext", addr).with_timeouts(short_timeouts());
    adapter.connect().unwrap();
    assert!(matches!(
        adapter.send_init(&InitConfig::new(1)).unwrap_err(),
        SimError::ConnectionLost { .. } | SimError::Connection { .. }
    ));
}

#[test]
fn test_silent_peer_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        // Hold the connection open without ever responding.
        thread::sleep(Duration::from_secs(10));
        drop(stream);
    });

    let mut adapter = SocketNodeAdapter::new("ext", addr).with_timeouts(AdapterTimeouts {
        init: Duration::from_millis(200),
        advance: Duration::from_millis(200),
        shutdown_grace: Duration::from_millis(100),
    });
    adapter.connect().unwrap();
    assert!(matches!(
        adapter.send_init(&InitConfig::new(1)).unwrap_err(),
        SimError::Timeout { .. }
    ));
}

#[test]
fn test_done_overtaking_target_is_protocol_error() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut writer = stream;
        let mut line = String::new();
        // INIT
        reader.read_line(&mut line).unwrap();
        writeln!(writer, "{{\"ack\":\"READY\"}}").unwrap();
        // ADVANCE answered with an overtaking DONE
        line.clear();
        reader.read_line(&mut line).unwrap();
        writeln!(writer, "{{\"ack\":\"DONE\",\"time_us\":9999999,\"events\":[]}}").unwrap();
    });

    let mut adapter = SocketNodeAdapter::new("ext", addr).with_timeouts(short_timeouts());
    adapter.connect().unwrap();
    adapter.send_init(&InitConfig::new(1)).unwrap();
    adapter.send_advance(us(1_000), Vec::new()).unwrap();
    assert!(matches!(
        adapter.wait_done().unwrap_err(),
        SimError::Protocol { .. }
    ));
}
