use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::*;

use super::{BoxedStream, ChannelContext, ChannelHandler, NewChannel};
use crate::forwarding::bridge;
use crate::{DirectTcpipParams, RejectReason};

#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream>;
}

pub struct TcpDialer {
    timeout: Duration,
}

impl TcpDialer {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("dial tcp {host}:{port}: i/o timeout"),
                )
            })??;
        stream.set_nodelay(true)?;
        Ok(Box::pin(stream))
    }
}

/// Services `direct-tcpip` channels by dialing the requested target and
/// forwarding bytes between it and the channel.
pub struct DirectTcpipHandler<D> {
    dialer: D,
}

impl<D: Dialer> DirectTcpipHandler<D> {
    pub fn new(dialer: D) -> Self {
        Self { dialer }
    }
}

#[async_trait]
impl<C, D> ChannelHandler<C> for DirectTcpipHandler<D>
where
    C: Send + Sync + 'static,
    D: Dialer + 'static,
{
    async fn handle_new_channel(&self, ctx: ChannelContext<C>, channel: NewChannel) {
        let params = match DirectTcpipParams::parse(channel.extra_data()) {
            Ok(params) => params,
            Err(error) => {
                warn!(%error, "Failed to parse open channel message");
                channel.reject(
                    RejectReason::ConnectFailed,
                    "Failed to parse open channel message",
                );
                return;
            }
        };

        let Ok(port) = u16::try_from(params.port_to_connect) else {
            warn!(target=%params, "Target port is out of range");
            channel.reject(
                RejectReason::ConnectFailed,
                format!("invalid port {}", params.port_to_connect),
            );
            return;
        };

        let target = match self.dialer.dial(&params.host_to_connect, port).await {
            Ok(target) => target,
            Err(error) => {
                info!(target=%params, %error, "Failed to connect to target");
                channel.reject(RejectReason::ConnectFailed, error.to_string());
                return;
            }
        };

        let accepted = match channel.accept() {
            Ok(accepted) => accepted,
            Err(error) => {
                debug!(%error, "Could not accept channel, dropping target connection");
                drop(target);
                return;
            }
        };

        debug!(target=%params, "Forwarding");
        let (stream, closer) = accepted.into_stream();
        let target_label = format!("{}:{}", params.host_to_connect, port);
        let (sent, received) =
            bridge("channel", stream, &target_label, target, ctx.cancel.clone()).await;
        closer.close().await;
        debug!(
            target=%params,
            sent=sent.bytes,
            received=received.bytes,
            "Forwarding finished"
        );
    }
}
