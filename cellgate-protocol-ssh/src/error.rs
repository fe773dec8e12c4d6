use std::error::Error;

use cellgate_common::CellgateError;

#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("malformed channel open payload: {0}")]
    MalformedOpenPayload(&'static str),
    #[error("channel open was abandoned before it could be accepted")]
    AcceptFailed,
    #[error("russh error: {0}")]
    Russh(#[from] russh::Error),
    #[error(transparent)]
    Cellgate(#[from] CellgateError),
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
}

impl ChannelError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("russh error: {0}")]
    Russh(#[from] russh::Error),
    #[error("timed out connecting to {0}")]
    Timeout(String),
    #[error("backend rejected the credentials for {0}")]
    AuthenticationFailed(String),
    #[error("backend host key was not accepted")]
    HostKeyRejected,
    #[error("invalid backend private key: {0}")]
    InvalidKey(String),
}
