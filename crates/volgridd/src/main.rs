//! volgridd — the volgrid driver.
//!
//! Runs a balancing group in one process: one tokio task per rank, wired
//! with channels, fed job lifecycle commands from a TOML scenario.
//!
//! # Usage
//!
//! ```text
//! volgridd simulate --ranks 16 --scenario jobs.toml --config volgrid.toml
//! volgridd config --config volgrid.toml
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::info;

use volgridd::{Scenario, SimulationOptions, load_config, simulate};

#[derive(Parser)]
#[command(name = "volgridd", about = "volgrid balancing driver")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a job scenario and print the volume timeline as JSON.
    Simulate {
        /// Number of ranks in the group.
        #[arg(long, default_value = "8")]
        ranks: usize,

        /// Balancer configuration (volgrid.toml). Defaults apply if omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Job scenario file.
        #[arg(long)]
        scenario: PathBuf,

        /// Seconds to run, overriding the scenario's duration.
        #[arg(long)]
        duration: Option<f64>,

        /// Rank tick interval in milliseconds.
        #[arg(long, default_value = "5")]
        tick_ms: u64,
    },
    /// Print the effective configuration as TOML.
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr, reports to stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,volgridd=debug,volgrid=debug")
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            ranks,
            config,
            scenario,
            duration,
            tick_ms,
        } => {
            let config = load_config(config.as_deref())?;
            let scenario = Scenario::from_file(&scenario)?;
            info!(ranks, rounding = ?config.balancer.rounding, "volgridd simulate");

            let options = SimulationOptions {
                ranks,
                duration,
                tick: Duration::from_millis(tick_ms.max(1)),
            };
            let report = simulate(&config, &scenario, &options).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}
