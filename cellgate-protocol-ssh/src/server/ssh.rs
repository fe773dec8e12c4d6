use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cellgate_common::{AlgorithmsConfig, ConfigError};
use russh::keys::PrivateKey;
use russh::server::{Auth, Config, Handler};
use russh::{MethodKind, MethodSet, SshId};
use tokio_util::sync::CancellationToken;
use tracing::*;

use super::ServerStream;
use crate::keys::preferred_algorithms;

/// Server side transport settings shared by the proxy and the daemon.
pub fn ssh_server_config(
    server_id: &str,
    host_key: PrivateKey,
    algorithms: &AlgorithmsConfig,
    methods: &[MethodKind],
) -> Result<Config, ConfigError> {
    let mut config = Config::default();
    config.keys.push(host_key);
    config.server_id = SshId::Standard(server_id.to_owned());
    config.methods = MethodSet::from(methods);
    config.preferred = preferred_algorithms(algorithms)?;
    config.auth_rejection_time = Duration::from_secs(1);
    config.auth_rejection_time_initial = Some(Duration::from_secs(0));
    // Idle connections are detected on the socket.
    config.inactivity_timeout = None;
    Ok(config)
}

pub(crate) fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

/// Runs the SSH protocol over an accepted stream until the peer goes away
/// or `cancel` fires.
pub(crate) async fn run_ssh_session<H>(
    config: Arc<Config>,
    stream: ServerStream,
    handler: H,
    cancel: CancellationToken,
) -> Result<()>
where
    H: Handler<Error = anyhow::Error> + Send + 'static,
{
    let session = russh::server::run_stream(config, stream, handler).await?;
    let handle = session.handle();
    tokio::pin!(session);

    tokio::select! {
        result = &mut session => result,
        _ = cancel.cancelled() => {
            debug!("Disconnecting");
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "shutting down".into(), "en".into())
                .await;
            let _ = session.await;
            Ok(())
        }
    }
}
