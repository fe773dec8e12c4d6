use std::path::Path;

use anyhow::{Context, Result};
use cellgate_common::CellgateConfigStore;
use config::{Config, Environment, File};
use tracing::*;

pub fn load_config(path: &Path) -> Result<CellgateConfigStore> {
    let store: CellgateConfigStore = Config::builder()
        .add_source(File::from(path))
        .add_source(Environment::with_prefix("CELLGATE").separator("__"))
        .build()
        .context("Could not load config")?
        .try_deserialize()
        .context("Could not parse config")?;

    store.validate().context("Invalid config")?;

    info!(
        ?path,
        proxy = store.proxy.is_some(),
        daemon = store.daemon.is_some(),
        "Using config"
    );
    Ok(store)
}
