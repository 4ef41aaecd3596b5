//! `statewatch` command-line entry point.
//!
//! Reads a TOML monitor config, verifies which UI states are active and runs
//! the state-aware scheduler against recorded fixtures.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use statewatch::exit_codes;
use statewatch::io::actuator::SimulatedActuator;
use statewatch::logging;
use statewatch::run::{RunOptions, run_monitor};
use statewatch::scheduler::SchedulerError;
use statewatch::validate::validate_project;

#[derive(Parser)]
#[command(
    name = "statewatch",
    version,
    about = "State-aware monitoring scheduler for visual UI automation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the config, its catalog and its fixtures.
    Validate {
        #[arg(short, long, default_value = "statewatch.toml")]
        config: PathBuf,
    },
    /// Verify starting states, then run the scheduler until it stops.
    Run {
        #[arg(short, long, default_value = "statewatch.toml")]
        config: PathBuf,
        /// Override `scheduler.max_iterations`.
        #[arg(long)]
        iterations: Option<u32>,
        /// Override `scheduler.total_duration_ms`.
        #[arg(long)]
        duration_ms: Option<u64>,
        /// Override `replay.seed`.
        #[arg(long)]
        seed: Option<u64>,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        let code = if err.downcast_ref::<SchedulerError>().is_some() {
            exit_codes::FATAL
        } else {
            exit_codes::INVALID
        };
        std::process::exit(code);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Validate { config } => cmd_validate(config),
        Command::Run {
            config,
            iterations,
            duration_ms,
            seed,
        } => cmd_run(
            config,
            RunOptions {
                max_iterations: iterations,
                total_duration: duration_ms.map(Duration::from_millis),
                seed,
            },
        ),
    }
}

fn cmd_validate(config: PathBuf) -> Result<()> {
    let outcome = validate_project(&config)?;
    println!(
        "ok: {} anchors, {} states, {} transitions",
        outcome.anchors, outcome.states, outcome.transitions
    );
    if let Some(count) = outcome.fixture_anchors {
        println!("fixtures: {} anchors", count);
    }
    for anchor in &outcome.unknown_fixture_anchors {
        println!("warning: fixtures reference undeclared anchor `{}`", anchor);
    }
    Ok(())
}

fn cmd_run(config: PathBuf, options: RunOptions) -> Result<()> {
    let outcome = run_monitor(&config, &options, Arc::new(SimulatedActuator))?;
    let report = &outcome.report;
    println!(
        "stopped ({:?}{}): {} ticks, {} task runs, {} skipped, {} failed",
        report.stop_reason,
        if report.forced { ", forced" } else { "" },
        report.ticks,
        report.task_runs,
        report.skipped,
        report.failed
    );
    if let Some(active) = &outcome.active_states {
        println!("active states: {}", active.join(", "));
    }
    Ok(())
}
