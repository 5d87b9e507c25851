//! xEdgeSim CLI entry point.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use tracing::error;
use xedgesim_core::RunSummary;
use xedgesim_runner::{build_coordinator, load_scenario, logging};

/// Run an xEdgeSim scenario to completion.
#[derive(Debug, Parser)]
#[command(name = "xedgesim", version, about)]
struct Args {
    /// Scenario file (YAML).
    scenario: PathBuf,

    /// Override the scenario seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Override the simulated duration, in microseconds.
    #[arg(long)]
    duration_us: Option<u64>,

    /// Override the lockstep quantum, in microseconds.
    #[arg(long)]
    quantum_us: Option<u64>,

    /// Log filter directive, e.g. "info" or "xedgesim_core=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(&args.log);

    match run(&args) {
        Ok(summary) => {
            print_summary(&summary);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let mut scenario = load_scenario(&args.scenario)?;
    if let Some(seed) = args.seed {
        scenario.seed = seed;
    }
    if let Some(duration_us) = args.duration_us {
        scenario.duration_us = duration_us;
    }
    if let Some(quantum_us) = args.quantum_us {
        scenario.quantum_us = quantum_us;
    }

    let mut coordinator = build_coordinator(&scenario)?;

    let stop = coordinator.stop_handle();
    ctrlc::set_handler(move || {
        eprintln!("interrupt received, finishing current step");
        stop.store(true, Ordering::Relaxed);
    })?;

    Ok(coordinator.run()?)
}

fn print_summary(summary: &RunSummary) {
    eprintln!();
    eprintln!("simulated {} in {} steps", summary.virtual_time, summary.steps);
    eprintln!(
        "events: {} routed, {} delivered, {} dropped, {} local",
        summary.events_routed,
        summary.events_delivered,
        summary.events_dropped,
        summary.local_events.len()
    );
    eprintln!("wall time: {:.3}s", summary.wall_time.as_secs_f64());
    if summary.interrupted {
        eprintln!("run was interrupted before the configured duration");
    }
}
