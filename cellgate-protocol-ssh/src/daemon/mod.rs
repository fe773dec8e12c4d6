use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use cellgate_common::{ConfigError, DaemonConfig};
use russh::keys::PublicKey;
use russh::server::{Auth, Msg, Session};
use russh::{Channel, MethodKind};
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

use crate::channels::{
    ChannelContext, ChannelEndpoint, ChannelHandlerRegistry, DirectTcpipHandler,
    SessionChannelHandler, SshChannel, TcpDialer, DIRECT_TCPIP, SESSION,
};
use crate::keys::{load_host_key, parse_authorized_key};
use crate::server::{reject, run_ssh_session, ssh_server_config, ConnectionHandler, ServerStream};
use crate::DirectTcpipParams;

const SERVER_ID: &str = "SSH-2.0-cellgate-daemon";

struct DaemonAuth {
    authorized_key: Option<PublicKey>,
    allow_unauthenticated: bool,
}

/// The in-container SSH server. Runs commands for `session` channels and
/// dials out for `direct-tcpip` channels.
pub struct DaemonConnectionHandler {
    config: Arc<russh::server::Config>,
    auth: Arc<DaemonAuth>,
    registry: Arc<ChannelHandlerRegistry<()>>,
}

impl DaemonConnectionHandler {
    pub fn from_config(config: &DaemonConfig) -> Result<Self, ConfigError> {
        let registry = ChannelHandlerRegistry::new()
            .with(
                SESSION,
                Arc::new(SessionChannelHandler::new(config.inherit_daemon_env)),
            )
            .with(
                DIRECT_TCPIP,
                Arc::new(DirectTcpipHandler::new(TcpDialer::new(config.dial_timeout))),
            );
        Self::with_registry(config, registry)
    }

    pub fn with_registry(
        config: &DaemonConfig,
        registry: ChannelHandlerRegistry<()>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let authorized_key = match config.authorized_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Some(parse_authorized_key(key)?),
            _ => None,
        };

        let mut methods = vec![];
        if authorized_key.is_some() {
            methods.push(MethodKind::PublicKey);
        }
        if config.allow_unauthenticated_clients {
            methods.push(MethodKind::None);
        }

        let host_key = load_host_key(config.host_key()?)?;
        let ssh_config = ssh_server_config(SERVER_ID, host_key, &config.algorithms, &methods)?;

        Ok(Self {
            config: Arc::new(ssh_config),
            auth: Arc::new(DaemonAuth {
                authorized_key,
                allow_unauthenticated: config.allow_unauthenticated_clients,
            }),
            registry: Arc::new(registry),
        })
    }
}

#[async_trait]
impl ConnectionHandler for DaemonConnectionHandler {
    async fn handle_connection(
        &self,
        id: Uuid,
        stream: ServerStream,
        _remote_address: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        let session = DaemonSession {
            ctx: ChannelContext {
                connection_id: id,
                cancel: cancel.clone(),
                state: Arc::new(()),
            },
            auth: self.auth.clone(),
            registry: self.registry.clone(),
        };
        run_ssh_session(self.config.clone(), stream, session, cancel).await
    }
}

struct DaemonSession {
    ctx: ChannelContext<()>,
    auth: Arc<DaemonAuth>,
    registry: Arc<ChannelHandlerRegistry<()>>,
}

impl DaemonSession {
    async fn open(
        &self,
        channel_type: &str,
        extra_data: Bytes,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> bool {
        let endpoint = ChannelEndpoint::Ssh(SshChannel {
            channel,
            handle: session.handle(),
        });
        self.registry
            .open(&self.ctx, channel_type, extra_data, endpoint)
            .await
    }
}

impl russh::server::Handler for DaemonSession {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        if self.auth.allow_unauthenticated {
            info!(%user, "Accepted client without authentication");
            return Ok(Auth::Accept);
        }
        Ok(reject())
    }

    async fn auth_publickey(&mut self, user: &str, key: &PublicKey) -> Result<Auth, Self::Error> {
        match &self.auth.authorized_key {
            Some(authorized) if authorized.key_data() == key.key_data() => {
                info!(%user, "Accepted public key");
                Ok(Auth::Accept)
            }
            _ => {
                warn!(%user, "Public key is not authorized");
                Ok(reject())
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open(SESSION, Bytes::new(), channel, session).await)
    }

    async fn channel_open_direct_tcpip(
        &mut self,
        channel: Channel<Msg>,
        host_to_connect: &str,
        port_to_connect: u32,
        originator_address: &str,
        originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let params = DirectTcpipParams {
            host_to_connect: host_to_connect.to_owned(),
            port_to_connect,
            originator_address: originator_address.to_owned(),
            originator_port,
        };
        Ok(self
            .open(DIRECT_TCPIP, params.encode(), channel, session)
            .await)
    }

    async fn channel_open_x11(
        &mut self,
        channel: Channel<Msg>,
        _originator_address: &str,
        _originator_port: u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(self.open("x11", Bytes::new(), channel, session).await)
    }
}
