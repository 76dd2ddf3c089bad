//! labsweep command line.
//!
//! ```bash
//! labsweep instruments
//! labsweep connect-all
//! labsweep validate sweeps/frequency.toml
//! labsweep run sweeps/frequency.toml
//! ```
//!
//! `run` stops at the next step boundary on Ctrl-C. Every command disconnects
//! all instruments before exiting.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use labsweep::app;
use labsweep::config::{LabConfig, DEFAULT_CONFIG_PATH};
use labsweep::{health, tracing_setup};
use labsweep_core::health::HealthIndicator;
use labsweep_experiment::CancelToken;
use labsweep_hardware::InstrumentService;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "labsweep")]
#[command(about = "Connect lab instruments and run parameter sweeps", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, short, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List configured instruments and their connection status
    Instruments,

    /// Connect every configured instrument
    ConnectAll,

    /// Check a sweep file without connecting anything
    Validate {
        /// Sweep definition (TOML)
        sweep: PathBuf,
    },

    /// Run a sweep and record the results
    Run {
        /// Sweep definition (TOML)
        sweep: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = LabConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.validate().map_err(|e| anyhow!(e))?;
    tracing_setup::init_from_config(&config).map_err(|e| anyhow!(e))?;
    info!(application = %config.application.name, "Starting");

    let indicator = HealthIndicator::new();
    let health_task = health::start(&config.health, indicator.clone());

    let service = app::build_service(&config)?;
    let result = dispatch(cli.command, &service, &config).await;

    let failed = app::shutdown(&service).await;
    if !failed.is_empty() {
        eprintln!("Failed to disconnect: {}", failed.join(", "));
    }
    if let Some(task) = health_task {
        task.abort();
    }
    result
}

async fn dispatch(
    command: Commands,
    service: &InstrumentService,
    config: &LabConfig,
) -> Result<()> {
    match command {
        Commands::Instruments => {
            for status in service.status().await? {
                println!(
                    "{:<16} {:<8} {:<32} {}",
                    status.identity,
                    status.interface,
                    status.address,
                    if status.connected { "connected" } else { "disconnected" }
                );
            }
            Ok(())
        }
        Commands::ConnectAll => {
            let failed = service.connect_all_known().await?;
            for status in service.status().await? {
                let mark = if status.connected { "ok" } else { "FAILED" };
                println!("{:<16} {}", status.identity, mark);
            }
            if failed.is_empty() {
                Ok(())
            } else {
                Err(anyhow!("{} instrument(s) failed to connect", failed.len()))
            }
        }
        Commands::Validate { sweep } => {
            let (definition, plan) = app::load_sweep(&sweep)?;
            println!("{}: {} steps", sweep.display(), plan.total_steps());
            for (index, level) in plan.levels().iter().enumerate() {
                let names: Vec<String> =
                    level.quantities().iter().map(ToString::to_string).collect();
                println!("  level {} ({} points): {}", index, level.len(), names.join(", "));
            }
            let outputs: Vec<String> = plan.outputs().iter().map(ToString::to_string).collect();
            println!("  outputs: {}", outputs.join(", "));
            let unknown: Vec<String> = {
                let known: Vec<String> = service
                    .list_instruments()
                    .await?
                    .into_iter()
                    .map(|d| d.identity)
                    .collect();
                definition
                    .instruments()
                    .into_iter()
                    .filter(|id| !known.contains(id))
                    .collect()
            };
            if unknown.is_empty() {
                Ok(())
            } else {
                Err(anyhow!("Sweep uses unconfigured instruments: {}", unknown.join(", ")))
            }
        }
        Commands::Run { sweep } => {
            let cancel = CancelToken::new();
            let on_interrupt = cancel.clone();
            let interrupt = tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, stopping after the current step");
                    on_interrupt.cancel();
                }
            });

            let report = app::run_sweep(service, config, &sweep, cancel).await;
            interrupt.abort();
            let report = report?;

            println!("Sweep {}", report.outcome);
            println!("Results: {}", report.results.display());
            match report.outcome {
                labsweep_experiment::RunOutcome::Failed { error, .. } => Err(error.into()),
                _ => Ok(()),
            }
        }
    }
}
