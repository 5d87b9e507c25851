//! # xedgesim-runner
//!
//! Scenario loading and process wiring for the `xedgesim` binary. The
//! co-simulation core knows nothing about YAML or CLI flags; this crate
//! translates a scenario file into a configured [`Coordinator`]
//! (re-exported from `xedgesim-core`) and hands it to `main`.

pub mod logging;
pub mod scenario;

pub use scenario::{build_coordinator, load_scenario, Scenario, ScenarioError};
