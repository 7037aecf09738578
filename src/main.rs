mod analysis;
mod collect;
mod config;
mod data;
mod error;
mod monitoring;
mod pipeline;

use anyhow::Result;
use clap::{Parser, Subcommand};
use config::{Config, EnvConfig};

#[derive(Parser)]
#[command(name = "kalshi-iv")]
#[command(author = "Celsius Team")]
#[command(version = "0.1.0")]
#[command(about = "Do Kalshi probabilities lead implied volatility?", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull the Kalshi threshold panel
    Markets,
    /// Pull VIX-family reference series from Yahoo Finance
    Reference,
    /// Draw exploratory charts and lagged correlations
    Plot,
    /// Stationarity, Granger causality and lead-lag analysis
    Analyze,
    /// Count settled and active markets for candidate series
    Survey,
    /// Run markets, reference, plot and analyze in order
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let env_config = EnvConfig::load();
    tracing::info!("Loading configuration from {}", env_config.config_path);
    let mut config = Config::load(&env_config.config_path)?;
    config.apply_env(&env_config);

    match cli.command {
        Command::Markets => pipeline::markets(&config).await,
        Command::Reference => pipeline::reference(&config).await,
        Command::Plot => pipeline::plot(&config),
        Command::Analyze => pipeline::analyze(&config),
        Command::Survey => pipeline::survey(&config).await,
        Command::Run => pipeline::run_all(&config).await,
    }
}
