mod backend;
mod relay;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use cellgate_common::{CellgateError, ConfigError, ProxyConfig};
use cellgate_core::auth::{CfAuthenticator, DiegoAuthenticator};
use cellgate_core::placement::HttpPlacementService;
use cellgate_core::{
    CompositeAuthenticator, Identity, PasswordAuthenticator, PermissionsBuilder,
    PermissionsResolver, TracingAuditSink,
};
use russh::server::{Auth, Msg, Session};
use russh::{Channel, MethodKind};
use tokio_util::sync::CancellationToken;
use tracing::*;
use uuid::Uuid;

pub use backend::{connect_backend, BackendConnection, BackendHandler, ProxyState};
pub use relay::ProxyChannelHandler;

use crate::channels::{
    ChannelContext, ChannelEndpoint, ChannelHandlerRegistry, SshChannel, DIRECT_TCPIP, SESSION,
};
use crate::keys::load_host_key;
use crate::server::{reject, run_ssh_session, ssh_server_config, ConnectionHandler, ServerStream};
use crate::DirectTcpipParams;

const SERVER_ID: &str = "SSH-2.0-cellgate-proxy";

struct ProxyShared {
    authenticator: CompositeAuthenticator,
    registry: ChannelHandlerRegistry<ProxyState>,
    backend_timeout: Duration,
}

/// The public facing SSH proxy. Authenticates clients with the composite
/// authenticator and relays their channels to the resolved backend.
pub struct ProxyConnectionHandler {
    config: Arc<russh::server::Config>,
    shared: Arc<ProxyShared>,
}

impl ProxyConnectionHandler {
    /// Builds the placement client and every enabled authenticator.
    pub fn from_config(config: &ProxyConfig) -> Result<Self, CellgateError> {
        config.validate()?;

        let placement =
            HttpPlacementService::new(config.placement_url()?, config.communication_timeout)
                .map_err(CellgateError::other)?;
        let resolver: Arc<dyn PermissionsResolver> =
            Arc::new(PermissionsBuilder::new(Arc::new(placement)));

        let mut authenticators: Vec<Arc<dyn PasswordAuthenticator>> = vec![];
        if config.diego_auth.enable {
            authenticators.push(Arc::new(DiegoAuthenticator::new(
                config.diego_auth.credentials.clone(),
                resolver.clone(),
                config.connect_to_instance_address,
            )));
        }
        if config.cf_auth.enable {
            authenticators.push(Arc::new(CfAuthenticator::from_config(
                &config.cf_auth,
                config.communication_timeout,
                resolver.clone(),
                config.connect_to_instance_address,
            )?));
        }

        let authenticator = CompositeAuthenticator::new(authenticators, Arc::new(TracingAuditSink))?;
        Ok(Self::new(config, authenticator)?)
    }

    pub fn new(
        config: &ProxyConfig,
        authenticator: CompositeAuthenticator,
    ) -> Result<Self, ConfigError> {
        let host_key = load_host_key(config.host_key()?)?;
        let ssh_config = ssh_server_config(
            SERVER_ID,
            host_key,
            &config.algorithms,
            &[MethodKind::Password],
        )?;

        let relay = Arc::new(ProxyChannelHandler);
        let registry = ChannelHandlerRegistry::new()
            .with(SESSION, relay.clone())
            .with(DIRECT_TCPIP, relay);

        Ok(Self {
            config: Arc::new(ssh_config),
            shared: Arc::new(ProxyShared {
                authenticator,
                registry,
                backend_timeout: config.communication_timeout,
            }),
        })
    }
}

#[async_trait]
impl ConnectionHandler for ProxyConnectionHandler {
    async fn handle_connection(
        &self,
        id: Uuid,
        stream: ServerStream,
        remote_address: SocketAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        let session = ProxySession {
            id,
            remote_address,
            cancel: cancel.clone(),
            shared: self.shared.clone(),
            authenticated: None,
        };
        run_ssh_session(self.config.clone(), stream, session, cancel).await
    }
}

struct ProxySession {
    id: Uuid,
    remote_address: SocketAddr,
    cancel: CancellationToken,
    shared: Arc<ProxyShared>,
    authenticated: Option<ChannelContext<ProxyState>>,
}

impl ProxySession {
    async fn open(
        &self,
        channel_type: &str,
        extra_data: Bytes,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> bool {
        let Some(ctx) = &self.authenticated else {
            warn!(kind=%channel_type, "Channel opened before authentication");
            return false;
        };
        let endpoint = ChannelEndpoint::Ssh(SshChannel {
            channel,
            handle: session.handle(),
        });
        self.shared
            .registry
            .open(ctx, channel_type, extra_data, endpoint)
            .await
    }
}

impl russh::server::Handler for ProxySession {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        let identity = Identity::new(user, password).with_remote_address(self.remote_address);
        let permissions = match self.shared.authenticator.authenticate(&identity).await {
            Ok(permissions) => permissions,
            Err(_) => return Ok(reject()),
        };

        info!(
            %user,
            app = %permissions.log_message.guid,
            index = permissions.log_message.index,
            target = %permissions.target.address,
            "Authenticated"
        );
        self.authenticated = Some(ChannelContext {
            connection_id: self.id,
            cancel: self.cancel.clone(),
            state: Arc::new(ProxyState::new(permissions, self.shared.backend_timeout)),
        });
        Ok(Auth::Accept)
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

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cellgate_common::{
        CfAuthConfig, DiegoAuthConfig, LogMessage, Permissions, PlacementConfig, Secret,
        TargetConfig,
    };
    use cellgate_core::{AuthOutcome, AuthenticatorKind};
    use russh::server::Handler;

    use super::*;
    use crate::keys::tests::HOST_KEY;

    fn config() -> ProxyConfig {
        ProxyConfig {
            host_key: Some(Secret::new(HOST_KEY.to_owned())),
            placement: PlacementConfig {
                url: Some("http://127.0.0.1:1".to_owned()),
            },
            diego_auth: DiegoAuthConfig {
                enable: true,
                credentials: Secret::new("shared".to_owned()),
            },
            ..Default::default()
        }
    }

    struct CountingAuthenticator(Arc<AtomicUsize>);

    #[async_trait]
    impl PasswordAuthenticator for CountingAuthenticator {
        fn kind(&self) -> AuthenticatorKind {
            AuthenticatorKind::Diego
        }

        async fn try_authenticate(&self, identity: &Identity) -> AuthOutcome {
            self.0.fetch_add(1, Ordering::SeqCst);
            if identity.credential.expose_secret() != "good" {
                return AuthOutcome::Reject(cellgate_core::AuthError::InvalidCredentials);
            }
            AuthOutcome::Success(Permissions {
                target: TargetConfig {
                    address: "127.0.0.1:1".to_owned(),
                    tls_address: None,
                    server_cert_domain_san: String::new(),
                    host_fingerprint: String::new(),
                    user: "vcap".to_owned(),
                    password: None,
                    private_key: None,
                },
                log_message: LogMessage {
                    guid: "app".to_owned(),
                    index: 0,
                },
                connect_via_instance_address: false,
            })
        }
    }

    fn session(calls: Arc<AtomicUsize>) -> ProxySession {
        let authenticator = CompositeAuthenticator::new(
            vec![Arc::new(CountingAuthenticator(calls))],
            Arc::new(TracingAuditSink),
        )
        .unwrap();
        let handler = ProxyConnectionHandler::new(&config(), authenticator).unwrap();
        ProxySession {
            id: Uuid::new_v4(),
            remote_address: "127.0.0.1:50000".parse().unwrap(),
            cancel: CancellationToken::new(),
            shared: handler.shared,
            authenticated: None,
        }
    }

    #[test]
    fn test_from_config_builds_enabled_authenticators() {
        assert!(ProxyConnectionHandler::from_config(&config()).is_ok());
    }

    #[test]
    fn test_cf_auth_requires_endpoints() {
        let config = ProxyConfig {
            cf_auth: CfAuthConfig {
                enable: true,
                ..Default::default()
            },
            ..config()
        };
        assert!(matches!(
            ProxyConnectionHandler::from_config(&config),
            Err(CellgateError::Config(ConfigError::Missing(_)))
        ));
    }

    #[tokio::test]
    async fn test_password_auth_goes_through_authenticator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut session = session(calls.clone());

        assert!(matches!(
            session.auth_password("diego:app/0", "bad").await.unwrap(),
            Auth::Reject { .. }
        ));
        assert!(session.authenticated.is_none());

        assert!(matches!(
            session.auth_password("diego:app/0", "good").await.unwrap(),
            Auth::Accept
        ));
        let ctx = session.authenticated.as_ref().unwrap();
        assert_eq!(ctx.state.permissions().log_message.guid, "app");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
