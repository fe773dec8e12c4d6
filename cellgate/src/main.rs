mod commands;
mod config;
mod health;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use logging::init_logging;

#[derive(clap::Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short, env = "CELLGATE_CONFIG", default_value = "/etc/cellgate.yaml")]
    config: PathBuf,
}

#[derive(clap::Subcommand)]
pub(crate) enum Commands {
    /// Run the SSH proxy
    Proxy,
    /// Run the in-container SSH daemon
    Daemon,
    /// Validate the config file
    Check,
    /// Probe the proxy's health check endpoint
    Healthcheck,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    match &cli.command {
        Commands::Proxy => crate::commands::proxy::command(&cli).await,
        Commands::Daemon => crate::commands::daemon::command(&cli).await,
        Commands::Check => crate::commands::check::command(&cli).await,
        Commands::Healthcheck => crate::commands::healthcheck::command(&cli).await,
    }
}
