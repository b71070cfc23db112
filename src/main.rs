mod cli;
mod commands;

use clap::Parser;
use cli::Cli;
use prefguard::{load_tracking_config, Error};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let seed =
        hex::decode(&cli.seed).map_err(|e| Error::InvalidSeed(format!("{}: {e}", cli.seed)))?;
    let tracked = load_tracking_config(&cli.config)?;

    match cli.command {
        cli::Commands::Init { file } => commands::init(&file, &seed, &cli.device_id, tracked),
        cli::Commands::Check { file } => commands::check(&file, &seed, &cli.device_id, tracked),
        cli::Commands::Enforce { file } => {
            commands::enforce(&file, &seed, &cli.device_id, tracked)
        }
        cli::Commands::ResetTime { file, clear } => commands::reset_time(&file, clear),
    }
}
