use std::net::SocketAddr;

use anyhow::{Context, Result};
use poem::http::StatusCode;
use poem::listener::TcpListener;
use poem::{get, handler, Route, Server};
use tokio_util::sync::CancellationToken;
use tracing::*;

#[handler]
fn healthy() -> StatusCode {
    StatusCode::OK
}

pub fn app() -> Route {
    Route::new().at("/", get(healthy))
}

/// Serves the health endpoint until `shutdown` fires.
pub async fn run(address: SocketAddr, shutdown: CancellationToken) -> Result<()> {
    info!(%address, "Health check listening");
    Server::new(TcpListener::bind(address))
        .run_with_graceful_shutdown(app(), async move { shutdown.cancelled().await }, None)
        .await
        .context("Health check server failed")
}
