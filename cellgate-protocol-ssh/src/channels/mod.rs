mod direct_tcpip;
mod session;

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use russh::server::{Handle, Msg};
use russh::{Channel, ChannelId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

pub use direct_tcpip::{Dialer, DirectTcpipHandler, TcpDialer};
pub use session::{locate_shell, SessionChannelHandler};

use crate::{ChannelError, RejectReason};

pub const SESSION: &str = "session";
pub const DIRECT_TCPIP: &str = "direct-tcpip";

pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Sync {}
impl<T: AsyncRead + AsyncWrite + Send + Sync> DuplexStream for T {}

pub type BoxedStream = Pin<Box<dyn DuplexStream>>;

/// A server-side SSH channel together with the handle of its connection.
pub struct SshChannel {
    pub channel: Channel<Msg>,
    pub handle: Handle,
}

pub enum ChannelEndpoint {
    Ssh(SshChannel),
    Stream(BoxedStream),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelDecision {
    Accept,
    Reject {
        reason: RejectReason,
        message: String,
    },
}

/// A channel-open request waiting for its handler to accept or reject it.
///
/// Dropping it without a decision rejects the channel.
pub struct NewChannel {
    channel_type: String,
    extra_data: Bytes,
    endpoint: ChannelEndpoint,
    decision: oneshot::Sender<ChannelDecision>,
}

impl NewChannel {
    pub fn new(
        channel_type: impl Into<String>,
        extra_data: Bytes,
        endpoint: ChannelEndpoint,
    ) -> (Self, oneshot::Receiver<ChannelDecision>) {
        let (decision, decision_rx) = oneshot::channel();
        (
            Self {
                channel_type: channel_type.into(),
                extra_data,
                endpoint,
                decision,
            },
            decision_rx,
        )
    }

    pub fn channel_type(&self) -> &str {
        &self.channel_type
    }

    pub fn extra_data(&self) -> &[u8] {
        &self.extra_data
    }

    pub fn accept(self) -> Result<AcceptedChannel, ChannelError> {
        self.decision
            .send(ChannelDecision::Accept)
            .map_err(|_| ChannelError::AcceptFailed)?;
        Ok(AcceptedChannel {
            endpoint: self.endpoint,
        })
    }

    pub fn reject(self, reason: RejectReason, message: impl Into<String>) {
        let _ = self.decision.send(ChannelDecision::Reject {
            reason,
            message: message.into(),
        });
    }
}

pub struct AcceptedChannel {
    endpoint: ChannelEndpoint,
}

impl AcceptedChannel {
    pub fn into_stream(self) -> (BoxedStream, ChannelCloser) {
        match self.endpoint {
            ChannelEndpoint::Ssh(SshChannel { channel, handle }) => {
                let id = channel.id();
                (
                    Box::pin(channel.into_stream()),
                    ChannelCloser(Some((handle, id))),
                )
            }
            ChannelEndpoint::Stream(stream) => (stream, ChannelCloser(None)),
        }
    }

    pub fn into_ssh(self) -> Result<SshChannel, Self> {
        match self.endpoint {
            ChannelEndpoint::Ssh(channel) => Ok(channel),
            endpoint => Err(Self { endpoint }),
        }
    }
}

/// Sends the final close for a channel whose stream has been released.
pub struct ChannelCloser(Option<(Handle, ChannelId)>);

impl ChannelCloser {
    pub async fn close(self) {
        if let Some((handle, id)) = self.0 {
            if handle.close(id).await.is_err() {
                debug!(channel=%id, "Connection already gone while closing channel");
            }
        }
    }
}

/// Per-connection data every channel handler sees.
pub struct ChannelContext<C> {
    pub connection_id: Uuid,
    pub cancel: CancellationToken,
    pub state: Arc<C>,
}

impl<C> Clone for ChannelContext<C> {
    fn clone(&self) -> Self {
        Self {
            connection_id: self.connection_id,
            cancel: self.cancel.clone(),
            state: self.state.clone(),
        }
    }
}

#[async_trait]
pub trait ChannelHandler<C>: Send + Sync {
    async fn handle_new_channel(&self, ctx: ChannelContext<C>, channel: NewChannel);
}

/// Channel type name to handler. Built once at startup and shared read-only
/// by every connection.
pub struct ChannelHandlerRegistry<C> {
    handlers: HashMap<String, Arc<dyn ChannelHandler<C>>>,
}

impl<C: Send + Sync + 'static> Default for ChannelHandlerRegistry<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C: Send + Sync + 'static> ChannelHandlerRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, channel_type: &str, handler: Arc<dyn ChannelHandler<C>>) -> Self {
        self.handlers.insert(channel_type.to_owned(), handler);
        self
    }

    pub fn channel_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Hands the request to its handler on a task of its own. Unknown types
    /// are rejected right away.
    pub fn dispatch(&self, ctx: &ChannelContext<C>, channel: NewChannel) {
        let Some(handler) = self.handlers.get(channel.channel_type()).cloned() else {
            let message = format!("unknown channel type: {}", channel.channel_type());
            channel.reject(RejectReason::UnknownChannelType, message);
            return;
        };

        let span = info_span!("Channel", kind=%channel.channel_type());
        let ctx = ctx.clone();
        tokio::spawn(async move { handler.handle_new_channel(ctx, channel).await }.instrument(span));
    }

    /// Dispatches a channel-open request and waits for the handler's
    /// decision. Returns whether the channel was accepted.
    ///
    /// Called from the russh channel-open callback, which holds the
    /// connection's event loop until this returns. Every other channel on
    /// the connection stalls for as long as the handler takes to decide, so
    /// handlers must bound their pre-decision work: the direct-tcpip dial by
    /// `dial_timeout`, the first backend connect by `communication_timeout`.
    pub async fn open(
        &self,
        ctx: &ChannelContext<C>,
        channel_type: &str,
        extra_data: Bytes,
        endpoint: ChannelEndpoint,
    ) -> bool {
        let (channel, decision) = NewChannel::new(channel_type, extra_data, endpoint);
        self.dispatch(ctx, channel);
        match decision.await {
            Ok(ChannelDecision::Accept) => true,
            Ok(ChannelDecision::Reject { reason, message }) => {
                info!(kind=%channel_type, %reason, %message, "Rejected channel");
                false
            }
            Err(_) => {
                warn!(kind=%channel_type, "Channel handler gave up without a decision");
                false
            }
        }
    }
}
