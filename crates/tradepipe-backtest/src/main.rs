//! tradepipe back-test runner - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Replay recorded market data through the emulation connector
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TRADEPIPE_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tradepipe_telemetry::init_logging()?;

    info!("Starting tradepipe back-test v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > TRADEPIPE_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TRADEPIPE_CONFIG").ok())
        .unwrap_or_else(|| "config/backtest.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");
    let config = tradepipe_backtest::AppConfig::from_file(&config_path)?;
    info!(data = %config.data.path, portfolios = config.portfolios.len(), "Configuration loaded");

    let app = tradepipe_backtest::Application::new(config)?;
    let report = app.run().await?;

    if !report.finished && !report.interrupted {
        anyhow::bail!("emulation stopped before history was exhausted");
    }
    Ok(())
}
