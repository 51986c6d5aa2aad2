//! namd-sim CLI
//!
//! Usage:
//!   namd-sim run --protocol protocol.toml --costs costs.toml --recruitment recruitment.toml --output out/ --seed 42
//!   namd-sim validate --protocol protocol.toml --costs costs.toml --recruitment recruitment.toml

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use namd_sim::{
    load_cost_spec, load_protocol_spec, load_recruitment_spec, logging, run, CancellationToken,
    RunStatus,
};

#[derive(Parser)]
#[command(name = "namd-sim")]
#[command(about = "Deterministic simulation engine for anti-VEGF treatment of nAMD")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full simulation and write results to the output directory
    Run {
        /// Protocol specification (disease transitions, vision model, discontinuation profile)
        #[arg(long)]
        protocol: PathBuf,
        /// Cost/resource specification
        #[arg(long)]
        costs: PathBuf,
        /// Recruitment specification
        #[arg(long)]
        recruitment: PathBuf,
        /// Output directory for visits.csv, patients.csv, run_metadata.csv
        #[arg(long)]
        output: PathBuf,
        /// Random seed
        #[arg(long)]
        seed: u64,
    },
    /// Load and validate configuration without running a simulation
    Validate {
        #[arg(long)]
        protocol: PathBuf,
        #[arg(long)]
        costs: PathBuf,
        #[arg(long)]
        recruitment: PathBuf,
    },
}

fn main() {
    logging::init();
    let cli = Cli::parse();

    if let Err(err) = dispatch(cli) {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { protocol, costs, recruitment, output, seed } => run_command(protocol, costs, recruitment, output, seed),
        Commands::Validate { protocol, costs, recruitment } => validate_command(protocol, costs, recruitment),
    }
}

fn run_command(protocol: PathBuf, costs: PathBuf, recruitment: PathBuf, output: PathBuf, seed: u64) -> Result<()> {
    let protocol_spec = load_protocol_spec(&protocol).context("loading protocol specification")?;
    let cost_spec = load_cost_spec(&costs).context("loading cost specification")?;
    let recruitment_spec = load_recruitment_spec(&recruitment).context("loading recruitment specification")?;

    let outcome = run(protocol_spec, cost_spec, recruitment_spec, &output, seed, CancellationToken::new(), None)
        .context("running simulation")?;

    match outcome.status {
        RunStatus::Success => println!("Run complete. Output written to {}", outcome.output_dir.display()),
        RunStatus::Partial { last_day } => {
            println!("Run cancelled after day {last_day}. Partial output written to {}", outcome.output_dir.display())
        }
    }
    Ok(())
}

fn validate_command(protocol: PathBuf, costs: PathBuf, recruitment: PathBuf) -> Result<()> {
    let protocol_spec = load_protocol_spec(&protocol).context("loading protocol specification")?;
    protocol_spec.validate().context("validating protocol specification")?;

    let cost_spec = load_cost_spec(&costs).context("loading cost specification")?;
    cost_spec.validate_covers_all_visit_types().context("validating cost specification")?;

    let _recruitment_spec = load_recruitment_spec(&recruitment).context("loading recruitment specification")?;

    println!("Configuration is valid.");
    Ok(())
}
