use std::sync::Arc;
use std::time::Duration;

use cellgate_common::helpers::fingerprint::matches_fingerprint;
use cellgate_common::{Permissions, TargetConfig};
use russh::client::{self, AuthResult, Handle};
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::PublicKey;
use tokio::sync::OnceCell;
use tracing::*;

use crate::keys::load_private_key;
use crate::BackendError;

/// Client side of the proxy's connection to the backend SSH server.
pub struct BackendHandler {
    address: String,
    expected_fingerprint: String,
}

impl BackendHandler {
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            address: target.address.clone(),
            expected_fingerprint: target.host_fingerprint.clone(),
        }
    }
}

impl client::Handler for BackendHandler {
    type Error = BackendError;

    async fn check_server_key(&mut self, key: &PublicKey) -> Result<bool, Self::Error> {
        if self.expected_fingerprint.is_empty() {
            return Ok(true);
        }
        match matches_fingerprint(key, &self.expected_fingerprint) {
            Ok(true) => Ok(true),
            Ok(false) => {
                warn!(address=%self.address, "Backend host key does not match the expected fingerprint");
                Ok(false)
            }
            Err(error) => {
                warn!(address=%self.address, %error, "Cannot verify backend host key");
                Ok(false)
            }
        }
    }
}

pub type BackendConnection = Handle<BackendHandler>;

/// Connects and authenticates to the backend named by `target`.
///
/// Password authentication is tried first, then the private key. A target
/// without credentials is tried with the `none` method.
pub async fn connect_backend(
    target: &TargetConfig,
    timeout: Duration,
) -> Result<BackendConnection, BackendError> {
    let config = Arc::new(client::Config {
        inactivity_timeout: None,
        ..Default::default()
    });

    let connect = client::connect(config, target.address.as_str(), BackendHandler::new(target));
    let mut handle = match tokio::time::timeout(timeout, connect).await {
        Err(_) => return Err(BackendError::Timeout(target.address.clone())),
        Ok(Err(BackendError::Russh(russh::Error::UnknownKey))) => {
            return Err(BackendError::HostKeyRejected)
        }
        Ok(result) => result?,
    };
    debug!(address=%target.address, "Connected to backend");

    if target.password.is_none() && target.private_key.is_none() {
        let result = handle.authenticate_none(&target.user).await?;
        return authenticated(handle, result, target);
    }

    if let Some(password) = &target.password {
        let result = handle
            .authenticate_password(&target.user, password.expose_secret())
            .await?;
        if matches!(result, AuthResult::Success) {
            return Ok(handle);
        }
        debug!(user=%target.user, "Backend rejected the password");
    }

    if let Some(key) = &target.private_key {
        let key = load_private_key(key).map_err(|e| BackendError::InvalidKey(e.to_string()))?;
        let result = handle
            .authenticate_publickey(
                &target.user,
                PrivateKeyWithHashAlg::new(Arc::new(key), None),
            )
            .await?;
        return authenticated(handle, result, target);
    }

    Err(BackendError::AuthenticationFailed(target.address.clone()))
}

fn authenticated(
    handle: BackendConnection,
    result: AuthResult,
    target: &TargetConfig,
) -> Result<BackendConnection, BackendError> {
    match result {
        AuthResult::Success => Ok(handle),
        _ => Err(BackendError::AuthenticationFailed(target.address.clone())),
    }
}

/// Per-connection proxy state, created once authentication succeeds.
pub struct ProxyState {
    permissions: Permissions,
    timeout: Duration,
    backend: OnceCell<Arc<BackendConnection>>,
}

impl ProxyState {
    pub fn new(permissions: Permissions, timeout: Duration) -> Self {
        Self {
            permissions,
            timeout,
            backend: OnceCell::new(),
        }
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    /// The backend connection, established by the first channel that needs it.
    pub async fn backend(&self) -> Result<Arc<BackendConnection>, BackendError> {
        self.backend
            .get_or_try_init(|| async {
                let target = &self.permissions.target;
                info!(address=%target.address, user=%target.user, "Connecting to backend");
                connect_backend(target, self.timeout).await.map(Arc::new)
            })
            .await
            .cloned()
    }
}
