use anyhow::{Context, Result};
use cellgate_protocol_ssh::{ConnectionServer, ProxyConnectionHandler};
use tracing::*;

use super::common::cancel_on_signal;
use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    info!(%version, "cellgate proxy");

    let config = load_config(&cli.config)?
        .proxy
        .context("The config has no proxy section")?;
    let handler = ProxyConnectionHandler::from_config(&config).context("Invalid proxy config")?;

    let listener = ConnectionServer::<ProxyConnectionHandler>::bind(*config.listen).await?;
    let shutdown = cancel_on_signal();

    if console::user_attended() {
        info!("--------------------------------------------");
        info!("cellgate proxy is now running.");
        info!("Accepting SSH connections on {}", config.listen);
        if config.health_check.enable {
            info!("Health check on http://{}/", config.health_check.listen);
        }
        info!("--------------------------------------------");
    }

    let server = ConnectionServer::new(
        handler,
        config.idle_connection_timeout,
        config.shutdown_grace,
    )
    .serve(listener, shutdown.clone());

    if config.health_check.enable {
        let health = crate::health::run(*config.health_check.listen, shutdown.clone());
        let result = tokio::try_join!(server, health);
        shutdown.cancel();
        result?;
    } else {
        server.await?;
    }

    info!("Stopped");
    Ok(())
}
