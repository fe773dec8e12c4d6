use anyhow::{Context, Result};
use cellgate_protocol_ssh::resolver::default_address_resolver;
use cellgate_protocol_ssh::{ConnectionServer, DaemonConnectionHandler};
use tracing::*;

use super::common::cancel_on_signal;
use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    info!(%version, "cellgate daemon");

    let config = load_config(&cli.config)?
        .daemon
        .context("The config has no daemon section")?;
    let handler =
        DaemonConnectionHandler::from_config(&config).context("Invalid daemon config")?;

    let address = default_address_resolver().resolve(*config.listen);
    let listener = ConnectionServer::<DaemonConnectionHandler>::bind(address).await?;
    let shutdown = cancel_on_signal();

    ConnectionServer::new(handler, config.idle_connection_timeout, config.shutdown_grace)
        .serve(listener, shutdown)
        .await?;

    info!("Stopped");
    Ok(())
}
