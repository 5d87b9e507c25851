//! Scenario files and coordinator construction.
//!
//! A scenario is a YAML document naming the seed, duration, quantum,
//! network model, and an ordered node list. Node order in the file is the
//! coordinator's insertion order and therefore part of the scenario's
//! deterministic identity.
//!
//! ```yaml
//! seed: 42
//! duration_us: 5000
//! quantum_us: 1000
//! network:
//!   model: latency
//!   default_latency_us: 0
//!   links:
//!     - { src: sensor0, dst: cloud, latency_us: 10000, loss_rate: 0.01 }
//! nodes:
//!   - id: sensor0
//!     adapter: emulator
//!     binary: /opt/renode/renode
//!     platform: boards/sensor.repl
//!     firmware_elf: firmware/sensor.elf
//!     monitor_port: 3456
//!     working_dir: /tmp/xedgesim/sensor0
//!   - id: cloud
//!     adapter: container
//!     container: xedgesim-cloud-1
//!     entrypoint: ["python3", "-u", "/app/service.py"]
//! ```

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xedgesim_common::SimTime;
use xedgesim_core::{
    Coordinator, CoordinatorConfig, DockerAdapter, EmulatorConfig, EmulatorNode,
    InProcessNodeAdapter, ScriptedNode, SocketNodeAdapter,
};
use xedgesim_net::NetworkModelConfig;

fn default_quantum_us() -> u64 {
    1_000
}

fn default_machine_name() -> String {
    "machine-0".to_string()
}

fn default_uart() -> String {
    "sysbus.uart0".to_string()
}

/// Errors loading or materializing a scenario.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// The file could not be read.
    #[error("cannot read scenario {path}: {source}")]
    Io {
        /// Scenario path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not a valid scenario document.
    #[error("cannot parse scenario {path}: {source}")]
    Parse {
        /// Scenario path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_yaml::Error,
    },

    /// The document parsed but describes an unusable scenario.
    #[error("invalid scenario: {0}")]
    Invalid(String),
}

/// A parsed scenario document.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    /// Scenario seed: link RNG derivation and INIT pass-through.
    pub seed: u64,
    /// Total virtual time to simulate, in microseconds.
    pub duration_us: u64,
    /// Lockstep quantum, in microseconds.
    #[serde(default = "default_quantum_us")]
    pub quantum_us: u64,
    /// Network model selection.
    pub network: NetworkModelConfig,
    /// Ordered node list.
    pub nodes: Vec<NodeSpec>,
}

/// One node entry.
#[derive(Debug, Deserialize)]
pub struct NodeSpec {
    /// Node identifier, unique within the scenario.
    pub id: String,
    /// Node-specific INIT parameters, forwarded verbatim.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Which adapter drives the node.
    #[serde(flatten)]
    pub adapter: AdapterSpec,
}

/// Adapter selection and its transport-specific settings.
#[derive(Debug, Deserialize)]
#[serde(tag = "adapter", rename_all = "snake_case")]
pub enum AdapterSpec {
    /// External process listening on a TCP socket.
    Socket {
        /// `host:port` the node process listens on.
        addr: String,
    },

    /// Service inside an already-running container.
    Container {
        /// Container name or id, as known to the engine.
        container: String,
        /// Service entrypoint executed by the interactive attach.
        entrypoint: Vec<String>,
    },

    /// Emulator-backed firmware node.
    Emulator {
        /// Emulator executable.
        binary: PathBuf,
        /// Platform description file.
        platform: PathBuf,
        /// Firmware ELF.
        firmware_elf: PathBuf,
        /// Monitor TCP port.
        monitor_port: u16,
        /// Working directory for scripts and the serial-backend file.
        working_dir: PathBuf,
        /// Machine name; appears in the monitor prompt.
        #[serde(default = "default_machine_name")]
        machine_name: String,
        /// Serial port used for event exchange.
        #[serde(default = "default_uart")]
        uart: String,
        /// Extra emulator command-line arguments.
        #[serde(default)]
        extra_args: Vec<String>,
    },

    /// In-process synthetic node.
    Scripted {
        /// Events to emit on schedule.
        #[serde(default)]
        emits: Vec<EmitSpec>,
        /// Echo received events back with this kind prefix.
        #[serde(default)]
        echo_prefix: Option<String>,
    },
}

/// One scheduled emission of a scripted node.
#[derive(Debug, Deserialize)]
pub struct EmitSpec {
    /// Emission time, in microseconds.
    pub time_us: u64,
    /// Event kind tag.
    pub kind: String,
    /// Destination node; omitted for metrics-only events.
    #[serde(default)]
    pub dst: Option<String>,
    /// Event payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Read and parse a scenario file.
pub fn load_scenario(path: &Path) -> Result<Scenario, ScenarioError> {
    let text = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let scenario: Scenario =
        serde_yaml::from_str(&text).map_err(|source| ScenarioError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    if scenario.nodes.is_empty() {
        return Err(ScenarioError::Invalid("scenario has no nodes".to_string()));
    }
    Ok(scenario)
}

/// Materialize a coordinator from a parsed scenario.
pub fn build_coordinator(scenario: &Scenario) -> Result<Coordinator, ScenarioError> {
    let config = CoordinatorConfig::new(
        SimTime::from_micros(scenario.duration_us),
        scenario.seed,
    )
    .with_quantum(SimTime::from_micros(scenario.quantum_us));

    let mut coordinator = Coordinator::new(config, scenario.network.build(scenario.seed));

    for node in &scenario.nodes {
        let adapter: Box<dyn xedgesim_core::NodeAdapter> = match &node.adapter {
            AdapterSpec::Socket { addr } => {
                let addr = addr.parse().map_err(|e| {
                    ScenarioError::Invalid(format!("node {}: bad addr {addr}: {e}", node.id))
                })?;
                Box::new(SocketNodeAdapter::new(node.id.as_str(), addr))
            }

            AdapterSpec::Container {
                container,
                entrypoint,
            } => Box::new(DockerAdapter::new(
                node.id.as_str(),
                container.clone(),
                entrypoint.iter().cloned(),
            )),

            AdapterSpec::Emulator {
                binary,
                platform,
                firmware_elf,
                monitor_port,
                working_dir,
                machine_name,
                uart,
                extra_args,
            } => {
                let mut emulator_config = EmulatorConfig::new(
                    binary,
                    platform,
                    firmware_elf,
                    *monitor_port,
                    working_dir,
                );
                emulator_config.machine_name = machine_name.clone();
                emulator_config.uart = uart.clone();
                emulator_config.extra_args = extra_args.clone();
                Box::new(InProcessNodeAdapter::new(Box::new(EmulatorNode::new(
                    node.id.as_str(),
                    emulator_config,
                ))))
            }

            AdapterSpec::Scripted { emits, echo_prefix } => {
                let mut scripted = ScriptedNode::new(node.id.as_str());
                for emit in emits {
                    scripted = match &emit.dst {
                        Some(dst) => scripted.emit_at(
                            SimTime::from_micros(emit.time_us),
                            emit.kind.clone(),
                            dst.as_str(),
                            emit.payload.clone(),
                        ),
                        None => scripted.emit_local_at(
                            SimTime::from_micros(emit.time_us),
                            emit.kind.clone(),
                            emit.payload.clone(),
                        ),
                    };
                }
                if let Some(prefix) = echo_prefix {
                    scripted = scripted.with_echo_prefix(prefix.clone());
                }
                Box::new(InProcessNodeAdapter::new(Box::new(scripted)))
            }
        };

        coordinator.add_node_with_params(adapter, node.params.clone());
    }

    Ok(coordinator)
}
