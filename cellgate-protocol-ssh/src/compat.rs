use std::fmt::Display;

use cellgate_common::ConfigError;

/// russh reports unknown algorithm names as `Err(())`.
pub trait ContextExt<T> {
    fn algorithm_context(self, kind: &'static str, name: &str) -> Result<T, ConfigError>;
}

impl<T> ContextExt<T> for Result<T, ()> {
    fn algorithm_context(self, kind: &'static str, name: &str) -> Result<T, ConfigError> {
        self.map_err(|_| ConfigError::UnknownAlgorithm {
            kind,
            name: name.to_owned(),
        })
    }
}

pub trait AnyhowContextExt<T, C> {
    fn context(self, context: C) -> anyhow::Result<T>;
}

impl<T, C> AnyhowContextExt<T, C> for Result<T, ()>
where
    C: Display + Send + Sync + 'static,
{
    fn context(self, context: C) -> anyhow::Result<T> {
        self.map_err(|_| anyhow::anyhow!("unspecified error").context(context))
    }
}
