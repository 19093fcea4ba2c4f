//! rules-bt CLI: run a backtest from a JSON request.
//!
//! Commands:
//! - `run`: backtest a request against a JSON series file or the synthetic provider
//! - `check`: validate a request without running it

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use rules_bt::prelude::*;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rules-bt", about = "Backtest rule-based trading strategies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest and print its metrics and JSON report.
    Run {
        /// Path to the JSON request (instruments, dates, capital, rules).
        #[arg(long)]
        config: PathBuf,

        /// JSON file of `{ instrument: [bar, ...] }`. Synthetic series are used without it.
        #[arg(long)]
        data: Option<PathBuf>,

        /// Seed of the synthetic series.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Write the JSON report here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a request without running it.
    Check {
        /// Path to the JSON request.
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            data,
            seed,
            output,
        } => run(&config, data.as_deref(), seed, output.as_deref()),
        Commands::Check { config } => {
            let config = load_config(&config)?;
            println!(
                "ok: {} instrument(s), {} rule(s), granularity {}",
                config.instruments.len(),
                config.rules.len(),
                config.granularity
            );
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<BacktestConfig> {
    let request = BacktestRequest::from_file(path).with_context(|| format!("reading {}", path.display()))?;
    let config = BacktestConfig::try_from(request)?;
    config.rules.check_pairing()?;
    Ok(config)
}

fn run(config: &Path, data: Option<&Path>, seed: u64, output: Option<&Path>) -> Result<()> {
    let config = load_config(config)?;
    let backtest = Backtest::new(config)?;

    let result = match data {
        Some(path) => {
            let provider = JsonFileProvider::open(path).with_context(|| format!("reading {}", path.display()))?;
            let missing = backtest
                .config()
                .instruments
                .iter()
                .filter(|i| !provider.instruments().any(|p| p == i.as_str()))
                .count();
            if missing == backtest.config().instruments.len() {
                bail!("{} has no series for any configured instrument", path.display());
            }
            backtest.run(&provider)?
        }
        None => {
            info!(seed, "using synthetic series");
            backtest.run(&SyntheticProvider::new(seed))?
        }
    };

    eprintln!("{}", Metrics::from(&result));
    let report = BacktestReport::from(&result).to_json()?;
    match output {
        Some(path) => {
            std::fs::write(path, report).with_context(|| format!("writing {}", path.display()))?;
            info!("report saved to {}", path.display());
        }
        None => println!("{report}"),
    }
    Ok(())
}
