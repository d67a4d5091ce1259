mod action;
mod analysis;
mod config;
mod engine;
mod pathway;
mod patient;
mod stats;
mod types;
mod utils;

use crate::analysis::Analyzer;
use crate::config::Config;
use crate::engine::Engine;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{
    io::{self, Write},
    path::PathBuf,
};

/// Number of patients and actions shown by `inspect`.
const N_INSPECTED: usize = 3;

#[derive(Debug, Parser)]
#[command(version, about)]
struct CLI {
    /// TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Override the seed of the configuration.
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run every major episode and print the report.
    Simulate,

    /// Build the health system and population and print a sample of them.
    Inspect,
}

fn main() {
    env_logger::Builder::new()
        .format_timestamp_millis()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    if let Err(error) = run_cli() {
        log::error!("{error:#?}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<()> {
    let args = CLI::parse();
    log::info!("{args:#?}");

    let mut cfg = Config::from_file(&args.config).context("failed to construct cfg")?;
    if args.seed.is_some() {
        cfg.init.seed = args.seed;
    }
    log::info!("{cfg:#?}");

    let engine = Engine::generate_initial_condition(cfg)
        .context("failed to generate initial condition")?;

    let report = match args.command {
        Command::Simulate => {
            let output = engine.run();
            let mut analyzer = Analyzer::new();
            analyzer.add_run(&output).context("failed to analyze run")?;
            analyzer.report()
        }
        Command::Inspect => {
            for patient in engine.patients().iter().take(N_INSPECTED) {
                log::info!(
                    "patient {}: age {} ({:?}), comorbidities {:?}, sickness {:.4}",
                    patient.id(),
                    patient.age(),
                    patient.age_group(),
                    patient.comorbidities(),
                    patient.sickness()
                );
            }
            let actions: Vec<_> = engine
                .actions()
                .iter()
                .take(N_INSPECTED)
                .map(|act| act.snapshot())
                .collect();
            let pathways: Vec<_> = engine.pathways().iter().map(|pw| pw.snapshot()).collect();
            let thresholds: Vec<_> = engine
                .pathways()
                .iter()
                .map(|pw| pw.threshold(0))
                .collect();
            serde_json::json!({
                "patients": &engine.patients()[..N_INSPECTED.min(engine.patients().len())],
                "actions": actions,
                "pathways": pathways,
                "a0_thresholds": thresholds,
                "n_pathways": engine.transitions().n_pathways(),
            })
        }
    };

    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &report).context("failed to write report")?;
    writeln!(stdout).context("failed to write report")?;

    Ok(())
}
