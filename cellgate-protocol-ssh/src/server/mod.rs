mod ssh;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::*;
use uuid::Uuid;

pub use ssh::ssh_server_config;
pub(crate) use ssh::{reject, run_ssh_session};

use crate::IdleTimeoutStream;

pub type ServerStream = IdleTimeoutStream<TcpStream>;

/// Pause before accepting again after the process ran out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(250);

/// Per-connection protocol logic (proxy or daemon).
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle_connection(
        &self,
        id: Uuid,
        stream: ServerStream,
        remote_address: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()>;
}

pub struct ConnectionServer<H> {
    handler: Arc<H>,
    idle_timeout: Duration,
    shutdown_grace: Duration,
}

impl<H: ConnectionHandler> ConnectionServer<H> {
    pub fn new(handler: H, idle_timeout: Duration, shutdown_grace: Duration) -> Self {
        Self {
            handler: Arc::new(handler),
            idle_timeout,
            shutdown_grace,
        }
    }

    pub async fn bind(address: SocketAddr) -> Result<TcpListener> {
        TcpListener::bind(address)
            .await
            .with_context(|| format!("Failed to listen on {address}"))
    }

    /// Accepts connections until `shutdown` fires, then waits up to the grace
    /// period for open connections before cancelling them.
    ///
    /// Only listener failures are returned as errors.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let address = listener.local_addr()?;
        info!(%address, "Listening");

        let tracker = TaskTracker::new();
        let connections = CancellationToken::new();

        let result = loop {
            let (socket, remote_address) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => match accept_retry_delay(&error) {
                        Some(delay) => {
                            warn!(%error, "Failed to accept connection");
                            if !delay.is_zero() {
                                tokio::select! {
                                    _ = tokio::time::sleep(delay) => (),
                                    _ = shutdown.cancelled() => break Ok(()),
                                }
                            }
                            continue;
                        }
                        None => break Err(anyhow::Error::new(error).context("Listener failed")),
                    },
                },
                _ = shutdown.cancelled() => break Ok(()),
            };

            let _ = socket.set_nodelay(true);
            let id = Uuid::new_v4();
            let span = info_span!("Connection", %id, remote=%remote_address);
            let stream = IdleTimeoutStream::new(socket, self.idle_timeout);
            let handler = self.handler.clone();
            let cancel = connections.child_token();

            tracker.spawn(
                async move {
                    debug!("Accepted");
                    let guard = cancel.clone().drop_guard();
                    if let Err(error) = handler
                        .handle_connection(id, stream, remote_address, cancel)
                        .await
                    {
                        info!(%error, "Connection ended with an error");
                    }
                    drop(guard);
                    debug!("Closed");
                }
                .instrument(span),
            );
        };

        drop(listener);
        tracker.close();
        if !tracker.is_empty() {
            info!(
                connections = tracker.len(),
                grace = ?self.shutdown_grace,
                "Waiting for open connections"
            );
        }
        if tokio::time::timeout(self.shutdown_grace, tracker.wait())
            .await
            .is_err()
        {
            warn!("Grace period elapsed, closing remaining connections");
            connections.cancel();
            tracker.wait().await;
        }
        result
    }
}

/// How long to wait before the next `accept()` after `error`, or `None` if
/// the listener is unusable.
///
/// EMFILE/ENFILE leave the pending connection in the backlog, so accepting
/// again right away fails the same way.
fn accept_retry_delay(error: &std::io::Error) -> Option<Duration> {
    if error.raw_os_error().is_some_and(|code| code == 24 || code == 23) {
        return Some(ACCEPT_BACKOFF);
    }
    match error.kind() {
        std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::Interrupted
        | std::io::ErrorKind::WouldBlock => Some(Duration::ZERO),
        _ => None,
    }
}
