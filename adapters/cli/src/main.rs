#![deny(
    unsafe_code,
    missing_docs,
    dead_code,
    unused_results,
    non_snake_case,
    unreachable_pub
)]

//! Command-line adapter that runs a Wavekeeper session headlessly.

mod config;
mod simulation;

use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{
    config::Scenario,
    simulation::{Outcome, Report, Simulation},
};

/// Runs a seeded wave session against a simulated factory and operator.
#[derive(Debug, Parser)]
#[command(name = "wavekeeper", version, about)]
struct Cli {
    /// Scenario file in TOML format; a built-in three-round plan is used otherwise.
    #[arg(long)]
    plan: Option<PathBuf>,
    /// Overrides the seed of the run.
    #[arg(long)]
    seed: Option<u64>,
    /// Simulated milliseconds per tick.
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,
    /// Upper bound on the number of ticks simulated.
    #[arg(long, default_value_t = 20_000)]
    max_ticks: u64,
    /// Overrides the operator's reaction time in milliseconds.
    #[arg(long)]
    reaction_ms: Option<u64>,
    /// Overrides the probability that the operator misses an assignment.
    #[arg(long)]
    miss_rate: Option<f64>,
    /// Overrides the number of factory placement points.
    #[arg(long)]
    placements: Option<u32>,
    /// Logs every session event.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli) {
        Ok(report) => {
            print_report(&report);
            if matches!(report.outcome, Outcome::Won { .. }) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("WAVEKEEPER_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

fn run(cli: Cli) -> Result<Report> {
    if cli.tick_ms == 0 {
        bail!("--tick-ms must be greater than zero");
    }

    let mut scenario = match &cli.plan {
        Some(path) => config::load(path)
            .with_context(|| format!("failed to load scenario {}", path.display()))?,
        None => Scenario::default(),
    };
    if let Some(seed) = cli.seed {
        scenario.tuning.seed = seed;
    }
    if let Some(reaction_ms) = cli.reaction_ms {
        scenario.operator.reaction = Duration::from_millis(reaction_ms);
    }
    if let Some(miss_rate) = cli.miss_rate {
        scenario.operator.miss_rate = miss_rate;
    }
    if let Some(placements) = cli.placements {
        scenario.factory.placements = placements;
    }
    scenario
        .validate()
        .context("scenario would be rejected by the session")?;

    let mut simulation = Simulation::new(scenario);
    Ok(simulation.run(Duration::from_millis(cli.tick_ms), cli.max_ticks))
}

fn print_report(report: &Report) {
    let elapsed = report.elapsed.as_secs_f64();
    match report.outcome {
        Outcome::Won { rounds, counters } => {
            println!(
                "won {rounds} round(s) in {elapsed:.1}s: {} cleared, {} expired, {} missed",
                counters.agents_cleared, counters.agents_expired, report.missed
            );
        }
        Outcome::Reset {
            reason,
            rounds_completed,
        } => {
            println!(
                "run reset after {rounds_completed} round(s) at {elapsed:.1}s ({reason:?}), {} missed",
                report.missed
            );
        }
        Outcome::Unfinished => {
            println!("run still in progress after {elapsed:.1}s");
        }
    }
}
