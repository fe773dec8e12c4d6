mod audit;
mod cf;
mod composite;
mod diego;

use std::fmt::{Debug, Display};
use std::net::SocketAddr;

pub use audit::{AuditSink, AuthAttempt, TracingAuditSink};
use async_trait::async_trait;
pub use cf::CfAuthenticator;
use cellgate_common::{Permissions, Secret};
pub use composite::CompositeAuthenticator;
pub use diego::DiegoAuthenticator;

use crate::placement::PlacementError;

/// A username/password pair presented during SSH password authentication.
/// Lives only for the duration of one attempt.
pub struct Identity {
    pub username: String,
    pub credential: Secret<String>,
    pub remote_address: Option<SocketAddr>,
}

impl Identity {
    pub fn new(username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            credential: Secret::new(credential.into()),
            remote_address: None,
        }
    }

    pub fn with_remote_address(mut self, remote_address: SocketAddr) -> Self {
        self.remote_address = Some(remote_address);
        self
    }
}

impl Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{}>", self.username)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("invalid username: {0}")]
    InvalidUsername(String),
    #[error("no matching authenticator")]
    NoMatchingAuthenticator,
    #[error("credential rejected by identity provider: {0}")]
    IdentityRejected(String),
    #[error("target instance not found")]
    NotFound,
    #[error("dependency unavailable: {0}")]
    Unavailable(String),
    #[error("invalid placement data: {0}")]
    InvalidPlacement(String),
}

impl AuthError {
    /// True when the attempt failed because a dependency is down rather
    /// than because of what the peer presented.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<PlacementError> for AuthError {
    fn from(error: PlacementError) -> Self {
        match error {
            PlacementError::NotFound => Self::NotFound,
            PlacementError::Unavailable(message) => Self::Unavailable(message),
            PlacementError::Invalid(message) => Self::InvalidPlacement(message),
        }
    }
}

#[derive(Debug)]
pub enum AuthOutcome {
    Success(Permissions),
    Reject(AuthError),
    /// The credential is not of a shape this strategy handles.
    NotApplicable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthenticatorKind {
    Diego,
    CloudFoundry,
}

impl Display for AuthenticatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Diego => write!(f, "diego"),
            Self::CloudFoundry => write!(f, "cf"),
        }
    }
}

#[async_trait]
pub trait PasswordAuthenticator: Send + Sync {
    fn kind(&self) -> AuthenticatorKind;

    async fn try_authenticate(&self, identity: &Identity) -> AuthOutcome;
}

/// Splits `<guid>/<index>` out of the part of a username after its prefix.
pub(crate) fn parse_instance_selector(
    selector: &str,
    pattern: &regex::Regex,
) -> Result<(String, u32), AuthError> {
    let invalid = || AuthError::InvalidUsername(selector.to_owned());
    let captures = pattern.captures(selector).ok_or_else(invalid)?;
    let guid = captures.get(1).ok_or_else(invalid)?.as_str().to_owned();
    let index = captures
        .get(2)
        .ok_or_else(invalid)?
        .as_str()
        .parse::<u32>()
        .map_err(|_| invalid())?;
    Ok((guid, index))
}
