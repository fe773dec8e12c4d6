use std::error::Error;

#[derive(thiserror::Error, Debug)]
pub enum CellgateError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to parse URL: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("deserialization failed: {0}")]
    DeserializeJson(#[from] serde_json::Error),
    #[error("fingerprint of length {0} does not match any supported algorithm")]
    UnsupportedFingerprint(usize),
    #[error(transparent)]
    Other(Box<dyn Error + Send + Sync>),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl CellgateError {
    pub fn other<E: Error + Send + Sync + 'static>(err: E) -> Self {
        Self::Other(Box::new(err))
    }
}

/// Problems that must stop the process before it accepts any connection.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{field} is not a valid URL: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("more than one {0} authenticator registered")]
    DuplicateAuthenticator(String),
    #[error("at least one authentication method must be enabled")]
    NoAuthenticators,
    #[error("either authorized_key or allow_unauthenticated_clients must be set")]
    NoDaemonAuthentication,
    #[error("unknown {kind} algorithm: {name}")]
    UnknownAlgorithm { kind: &'static str, name: String },
    #[error("invalid key material in {field}: {message}")]
    InvalidKey { field: &'static str, message: String },
}
