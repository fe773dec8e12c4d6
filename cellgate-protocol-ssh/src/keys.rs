use std::borrow::Cow;

use cellgate_common::{AlgorithmsConfig, ConfigError, Secret};
use russh::keys::{decode_secret_key, PrivateKey, PublicKey};
use russh::{cipher, kex, mac, Preferred};
use tracing::*;

use crate::compat::ContextExt;

pub fn load_host_key(pem: &Secret<String>) -> Result<PrivateKey, ConfigError> {
    decode_secret_key(pem.expose_secret(), None).map_err(|e| ConfigError::InvalidKey {
        field: "host_key",
        message: e.to_string(),
    })
}

pub fn load_private_key(pem: &Secret<String>) -> Result<PrivateKey, russh::keys::Error> {
    decode_secret_key(pem.expose_secret(), None)
}

/// Parses a single `authorized_keys` style line.
pub fn parse_authorized_key(line: &str) -> Result<PublicKey, ConfigError> {
    PublicKey::from_openssh(line.trim()).map_err(|e| ConfigError::InvalidKey {
        field: "authorized_key",
        message: e.to_string(),
    })
}

fn algorithm_names<N>(
    kind: &'static str,
    configured: &str,
    names: Vec<&str>,
    parse: impl Fn(&str) -> Result<N, ()>,
) -> Result<Vec<N>, ConfigError> {
    let explicit = !configured.trim().is_empty();
    let mut result = vec![];
    for name in names {
        let parsed = parse(name);
        if explicit {
            result.push(parsed.algorithm_context(kind, name)?);
            continue;
        }
        match parsed {
            Ok(parsed) => result.push(parsed),
            Err(()) => warn!(%kind, %name, "Default algorithm is not supported, skipping"),
        }
    }
    if result.is_empty() {
        return Err(ConfigError::UnknownAlgorithm {
            kind,
            name: configured.to_owned(),
        });
    }
    Ok(result)
}

/// Translates the configured allow-lists into transport preferences.
pub fn preferred_algorithms(config: &AlgorithmsConfig) -> Result<Preferred, ConfigError> {
    let cipher = algorithm_names("cipher", &config.allowed_ciphers, config.ciphers(), |n| {
        cipher::Name::try_from(n)
    })?;
    let mac = algorithm_names("MAC", &config.allowed_macs, config.macs(), |n| {
        mac::Name::try_from(n)
    })?;
    let kex = algorithm_names(
        "key exchange",
        &config.allowed_key_exchanges,
        config.key_exchanges(),
        |n| kex::Name::try_from(n),
    )?;

    Ok(Preferred {
        kex: Cow::Owned(kex),
        cipher: Cow::Owned(cipher),
        mac: Cow::Owned(mac),
        ..Default::default()
    })
}
