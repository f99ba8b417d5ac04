//! Command-line interface for mqtt-stresser
//!
//! # Usage Examples
//!
//! ```bash
//! # Default run: one pair against localhost:1883 for five seconds
//! mqtt-stresser run
//!
//! # Options from YAML, with a flag overriding one of them
//! mqtt-stresser run -y stress.yaml -n 100
//!
//! # Exercise the harness without a broker
//! mqtt-stresser run --dry-run -n 50 -d 10s -i 0.01 --format table
//! ```

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use mqtt_stresser::{open_output, run_stress, write_report, StressArgs, StressConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mqtt-stresser")]
#[command(about = "Load generator and latency probe for MQTT brokers")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open connection pairs, flood them with messages and report latencies
    Run(StressArgs),

    /// Write a raw-text passwd file of random users for the broker under test
    GenPasswd(GenPasswdArgs),
}

#[derive(Args)]
struct GenPasswdArgs {
    /// File to write
    #[arg(short = 'o', long, default_value = "rawtext.passwd")]
    output: PathBuf,

    /// Number of random user:password entries after the fixed one
    #[arg(short = 'n', long, default_value_t = 1000)]
    count: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let config = StressConfig::resolve(args)?;
            let mut out = open_output(&config.output)?;
            config
                .echo(&mut std::io::stdout())
                .context("Failed to print configuration")?;

            let report = run_stress(&config).await?;
            write_report(&mut *out, &report, &config)?;
        }
        Commands::GenPasswd(args) => {
            broker_client::write_passwd_file(&args.output, args.count)
                .with_context(|| format!("Failed to write passwd file {:?}", args.output))?;
            tracing::info!(
                path = %args.output.display(),
                entries = args.count + 1,
                "Wrote passwd file"
            );
        }
    }

    Ok(())
}
