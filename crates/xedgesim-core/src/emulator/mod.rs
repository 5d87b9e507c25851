//! The emulator-backed node.
//!
//! Manages an instruction-level emulator subprocess: a startup script
//! written to the working directory creates the emulated machine, loads
//! the platform description and firmware ELF, attaches a file backend to
//! the primary serial port, and leaves the machine paused. Virtual time is
//! then advanced over the monitor protocol with `emulation RunFor`, and
//! firmware output is ingested by tailing the serial-backend file.
//!
//! Events emitted by the firmware carry timestamps the firmware itself
//! produced with its seeded RNG; they are adopted verbatim, so replays
//! with the same seed reproduce the same event stream. Incoming events are
//! injected into the firmware's serial receive buffer byte by byte via
//! monitor `WriteChar` commands.

pub mod monitor;
pub mod serial;

pub use monitor::MonitorClient;
pub use serial::SerialTail;

use crate::adapter::AdapterTimeouts;
use crate::in_process::InProcessNode;
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use xedgesim_common::{Event, InitConfig, NodeId, SimError, SimTime};

/// Attempts to reach the monitor port while the emulator starts.
const MONITOR_CONNECT_ATTEMPTS: u32 = 40;
/// Delay between monitor connection attempts.
const MONITOR_CONNECT_BACKOFF: Duration = Duration::from_millis(250);
/// Budget for a single injected monitor command.
const INJECT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration of one emulator node.
#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    /// Path to the emulator executable.
    pub binary: PathBuf,
    /// Platform description loaded into the machine.
    pub platform: PathBuf,
    /// Firmware ELF loaded onto the system bus.
    pub firmware_elf: PathBuf,
    /// Name given to the created machine; appears in the monitor prompt.
    pub machine_name: String,
    /// The serial port used for event exchange, e.g. `sysbus.uart0`.
    pub uart: String,
    /// TCP port the emulator's monitor listens on.
    pub monitor_port: u16,
    /// Directory for the startup script and serial-backend file.
    pub working_dir: PathBuf,
    /// Additional arguments appended to the emulator command line.
    pub extra_args: Vec<String>,
}

impl EmulatorConfig {
    /// Configuration with the conventional machine name and UART.
    pub fn new(
        binary: impl Into<PathBuf>,
        platform: impl Into<PathBuf>,
        firmware_elf: impl Into<PathBuf>,
        monitor_port: u16,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        EmulatorConfig {
            binary: binary.into(),
            platform: platform.into(),
            firmware_elf: firmware_elf.into(),
            machine_name: "machine-0".to_string(),
            uart: "sysbus.uart0".to_string(),
            monitor_port,
            working_dir: working_dir.into(),
            extra_args: Vec::new(),
        }
    }
}

/// Render an advance delta in the emulator's duration syntax,
/// `HH:MM:SS.ffffff`.
fn format_run_for(delta: SimTime) -> String {
    let us = delta.as_micros();
    let secs = us / 1_000_000;
    let micros = us % 1_000_000;
    format!(
        "{:02}:{:02}:{:02}.{:06}",
        secs / 3_600,
        (secs % 3_600) / 60,
        secs % 60,
        micros
    )
}

/// Build the startup script executed by the emulator at launch.
fn startup_script(config: &EmulatorConfig, serial_path: &Path) -> String {
    format!(
        "mach create \"{name}\"\n\
         machine LoadPlatformDescription @{platform}\n\
         sysbus LoadELF @{elf}\n\
         {uart} CreateFileBackend @{serial} true\n\
         start\n\
         pause\n",
        name = config.machine_name,
        platform = config.platform.display(),
        elf = config.firmware_elf.display(),
        uart = config.uart,
        serial = serial_path.display(),
    )
}

/// The shape of a firmware-emitted event line. `time_us` and `kind` are
/// the required tag fields; everything else defaults.
#[derive(Debug, Deserialize)]
struct FirmwareLine {
    time_us: u64,
    kind: String,
    #[serde(default)]
    dst: Option<String>,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default)]
    size_bytes: u64,
}

/// Parse one serial line into an event, if it is one.
///
/// Lines whose first non-whitespace character is not `{` are firmware
/// logging, ignored silently. Lines that look like JSON but fail to parse
/// are malformed firmware output: logged, not fatal.
fn parse_serial_line(node: &NodeId, line: &str) -> Option<Event> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    match serde_json::from_str::<FirmwareLine>(trimmed) {
        Ok(parsed) => {
            let mut event = Event::new(
                SimTime::from_micros(parsed.time_us),
                parsed.kind,
                node.clone(),
            )
            .with_payload(parsed.payload)
            .with_size_bytes(parsed.size_bytes);
            if let Some(dst) = parsed.dst {
                event = event.with_dst(dst);
            }
            Some(event)
        }
        Err(e) => {
            warn!(node = %node, error = %e, line, "ignoring malformed firmware output");
            None
        }
    }
}

/// Drives an instruction-level emulator subprocess.
pub struct EmulatorNode {
    id: NodeId,
    config: EmulatorConfig,
    timeouts: AdapterTimeouts,
    serial_path: PathBuf,
    process: Option<Child>,
    monitor: Option<MonitorClient>,
    serial: Option<SerialTail>,
    current: SimTime,
}

impl EmulatorNode {
    /// Create the node; resources are acquired in `connect`.
    pub fn new(id: impl Into<NodeId>, config: EmulatorConfig) -> Self {
        let id = id.into();
        let serial_path = config.working_dir.join(format!("{id}-serial.log"));
        EmulatorNode {
            id,
            config,
            timeouts: AdapterTimeouts::default(),
            serial_path,
            process: None,
            monitor: None,
            serial: None,
            current: SimTime::ZERO,
        }
    }

    /// Override the timeout budget.
    pub fn with_timeouts(mut self, timeouts: AdapterTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Path of the serial-backend file; left on disk for post-mortem.
    pub fn serial_path(&self) -> &Path {
        &self.serial_path
    }

    fn monitor_mut(&mut self) -> Result<&mut MonitorClient, SimError> {
        self.monitor
            .as_mut()
            .ok_or_else(|| SimError::InvalidState(format!("{} is not connected", self.id)))
    }

    /// Inject one line into the firmware's serial receive buffer.
    fn inject_line(&mut self, line: &str) -> Result<(), SimError> {
        let uart = self.config.uart.clone();
        let monitor = self.monitor_mut()?;
        for &byte in line.as_bytes() {
            monitor.command(
                &format!("{uart} WriteChar {byte:#04x}"),
                INJECT_COMMAND_TIMEOUT,
            )?;
        }
        monitor.command(&format!("{uart} WriteChar 0x0a"), INJECT_COMMAND_TIMEOUT)?;
        Ok(())
    }

    /// Drain new serial output into events.
    fn collect_serial_events(&mut self) -> Result<Vec<Event>, SimError> {
        let tail = self
            .serial
            .as_mut()
            .ok_or_else(|| SimError::InvalidState(format!("{} is not connected", self.id)))?;
        let lines = tail.read_new_lines().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SimError::protocol(&self.id, format!("serial-backend file missing: {e}"))
            } else {
                SimError::Resource(format!("{}: serial-backend read: {}", self.id, e))
            }
        })?;
        Ok(lines
            .iter()
            .filter_map(|line| parse_serial_line(&self.id, line))
            .collect())
    }

    /// Wait for the subprocess to exit, force-terminating after the grace
    /// period.
    fn reap_process(&mut self) {
        let Some(mut child) = self.process.take() else {
            return;
        };
        let deadline = Instant::now() + self.timeouts.shutdown_grace;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    debug!(node = %self.id, %status, "emulator exited");
                    return;
                }
                Ok(None) if Instant::now() >= deadline => {
                    warn!(node = %self.id, "emulator still alive after grace period, killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
                Ok(None) => thread::sleep(Duration::from_millis(50)),
                Err(e) => {
                    warn!(node = %self.id, error = %e, "wait on emulator failed");
                    let _ = child.kill();
                    let _ = child.wait();
                    return;
                }
            }
        }
    }
}

impl InProcessNode for EmulatorNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    fn connect(&mut self) -> Result<(), SimError> {
        if self.process.is_some() {
            return Ok(());
        }

        fs::create_dir_all(&self.config.working_dir)
            .map_err(|e| SimError::Resource(format!("creating working dir: {e}")))?;

        let script_path = self.config.working_dir.join(format!("{}-start.resc", self.id));
        fs::write(&script_path, startup_script(&self.config, &self.serial_path))
            .map_err(|e| SimError::Resource(format!("writing startup script: {e}")))?;

        let child = Command::new(&self.config.binary)
            .arg("--disable-xwt")
            .arg("--port")
            .arg(self.config.monitor_port.to_string())
            .args(&self.config.extra_args)
            .arg(&script_path)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                SimError::Resource(format!(
                    "spawning emulator {}: {}",
                    self.config.binary.display(),
                    e
                ))
            })?;
        self.process = Some(child);

        let addr = SocketAddr::new(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            self.config.monitor_port,
        );
        let mut monitor = match MonitorClient::connect(
            &self.id,
            addr,
            MONITOR_CONNECT_ATTEMPTS,
            MONITOR_CONNECT_BACKOFF,
        ) {
            Ok(monitor) => monitor,
            Err(e) => {
                self.reap_process();
                return Err(e);
            }
        };

        // The node is ready once the prompt is observed; the startup
        // script has run by then and the serial backend exists.
        if let Err(e) = monitor.wait_prompt(self.timeouts.init) {
            self.reap_process();
            return Err(e);
        }

        self.monitor = Some(monitor);
        self.serial = Some(SerialTail::new(&self.serial_path));
        info!(node = %self.id, port = self.config.monitor_port, "emulator ready");
        Ok(())
    }

    fn init(&mut self, config: &InitConfig) -> Result<(), SimError> {
        // The firmware consumes configuration as a serial line, like any
        // other injected message. The monitor prompt after the final
        // WriteChar is the readiness ack.
        let line = serde_json::to_string(&serde_json::json!({
            "cmd": "INIT",
            "seed": config.seed,
            "config": config.params,
        }))
        .map_err(|e| SimError::Resource(format!("encoding INIT: {e}")))?;
        self.inject_line(&line)
    }

    fn advance(&mut self, target: SimTime, pending: Vec<Event>) -> Result<Vec<Event>, SimError> {
        for event in &pending {
            let line = serde_json::to_string(event)
                .map_err(|e| SimError::Resource(format!("encoding event: {e}")))?;
            self.inject_line(&line)?;
        }

        let delta = target.saturating_sub(self.current);
        if delta > SimTime::ZERO {
            let advance_timeout = self.timeouts.advance;
            let run_for = format!("emulation RunFor \"{}\"", format_run_for(delta));
            self.monitor_mut()?.command(&run_for, advance_timeout)?;
        }

        let events = self.collect_serial_events()?;
        self.current = target;
        Ok(events)
    }

    fn shutdown(&mut self) -> Result<(), SimError> {
        if let Some(monitor) = self.monitor.as_mut() {
            // Detach the file backend; the output file stays on disk.
            let close = format!(
                "{} CloseFileBackend @{}",
                self.config.uart,
                self.serial_path.display()
            );
            if let Err(e) = monitor.command(&close, Duration::from_secs(1)) {
                debug!(node = %self.id, error = %e, "CloseFileBackend failed");
            }
            if let Err(e) = monitor.send_line("quit") {
                debug!(node = %self.id, error = %e, "quit failed");
            }
        }
        self.monitor = None;
        self.serial = None;
        self.reap_process();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_run_for() {
        assert_eq!(format_run_for(SimTime::from_micros(1_000)), "00:00:00.001000");
        assert_eq!(format_run_for(SimTime::from_secs(1)), "00:00:01.000000");
        assert_eq!(format_run_for(SimTime::from_secs(3_725)), "01:02:05.000000");
        assert_eq!(
            format_run_for(SimTime::from_micros(1_500_001)),
            "00:00:01.500001"
        );
    }

    #[test]
    fn test_startup_script_contents() {
        let config = EmulatorConfig::new(
            "/opt/emulator/bin/emulator",
            "/scenarios/board.repl",
            "/scenarios/fw.elf",
            3456,
            "/tmp/run",
        );
        let script = startup_script(&config, Path::new("/tmp/run/emu0-serial.log"));

        assert!(script.starts_with("mach create \"machine-0\"\n"));
        assert!(script.contains("machine LoadPlatformDescription @/scenarios/board.repl"));
        assert!(script.contains("sysbus LoadELF @/scenarios/fw.elf"));
        assert!(script
            .contains("sysbus.uart0 CreateFileBackend @/tmp/run/emu0-serial.log true"));
        assert!(script.ends_with("start\npause\n"));
    }

    #[test]
    fn test_parse_serial_line_event() {
        let node = NodeId::new("emu0");
        let event = parse_serial_line(
            &node,
            r#"{"time_us":1000000,"kind":"sample","dst":"cloud","payload":{"temp_c":28.9}}"#,
        )
        .unwrap();
        assert_eq!(event.time, SimTime::from_secs(1));
        assert_eq!(event.kind, "sample");
        assert_eq!(event.src, node);
        assert_eq!(event.dst, Some(NodeId::new("cloud")));
        assert_eq!(event.payload, json!({"temp_c": 28.9}));
    }

    #[test]
    fn test_parse_serial_line_ignores_logging() {
        let node = NodeId::new("emu0");
        assert!(parse_serial_line(&node, "boot: clock at 64 MHz").is_none());
        assert!(parse_serial_line(&node, "").is_none());
    }

    #[test]
    fn test_parse_serial_line_ignores_malformed_json() {
        let node = NodeId::new("emu0");
        // Looks like JSON but is missing the required tag fields.
        assert!(parse_serial_line(&node, r#"{"temp_c": 28.9}"#).is_none());
        assert!(parse_serial_line(&node, "{not json at all").is_none());
    }

    #[test]
    fn test_timestamps_adopted_verbatim() {
        let node = NodeId::new("emu0");
        let event =
            parse_serial_line(&node, r#"{"time_us":123456789,"kind":"sample"}"#).unwrap();
        assert_eq!(event.time.as_micros(), 123_456_789);
    }
}
