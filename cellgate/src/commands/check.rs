use anyhow::{Context, Result};
use cellgate_protocol_ssh::{DaemonConnectionHandler, ProxyConnectionHandler};
use tracing::*;

use crate::config::load_config;

pub(crate) async fn command(cli: &crate::Cli) -> Result<()> {
    let config = load_config(&cli.config)?;

    if let Some(proxy) = &config.proxy {
        ProxyConnectionHandler::from_config(proxy).context("Invalid proxy config")?;
    }
    if let Some(daemon) = &config.daemon {
        DaemonConnectionHandler::from_config(daemon).context("Invalid daemon config")?;
    }
    if config.proxy.is_none() && config.daemon.is_none() {
        warn!("The config has neither a proxy nor a daemon section");
    }

    info!("No problems found");
    Ok(())
}
