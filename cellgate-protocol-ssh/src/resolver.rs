use std::net::SocketAddr;

use serde::Deserialize;
use tracing::*;

pub const INSTANCE_PORTS_ENV: &str = "CF_INSTANCE_PORTS";

/// Picks the address a listener actually binds to.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, address: SocketAddr) -> SocketAddr;
}

pub struct PassthroughResolver;

impl AddressResolver for PassthroughResolver {
    fn resolve(&self, address: SocketAddr) -> SocketAddr {
        address
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PortMapping {
    pub internal: u16,
    pub external: u16,
}

/// Rewrites the listen port through the platform's published port mappings.
#[derive(Debug, Default)]
pub struct PortMappingResolver {
    mappings: Vec<PortMapping>,
}

impl PortMappingResolver {
    pub fn new(mappings: Vec<PortMapping>) -> Self {
        Self { mappings }
    }

    pub fn parse(value: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(value)?))
    }

    pub fn from_env() -> Self {
        let Ok(value) = std::env::var(INSTANCE_PORTS_ENV) else {
            return Self::default();
        };
        match Self::parse(&value) {
            Ok(resolver) => resolver,
            Err(error) => {
                warn!(%error, variable = INSTANCE_PORTS_ENV, "Ignoring malformed port mappings");
                Self::default()
            }
        }
    }
}

impl AddressResolver for PortMappingResolver {
    fn resolve(&self, mut address: SocketAddr) -> SocketAddr {
        if let Some(mapping) = self
            .mappings
            .iter()
            .find(|m| m.internal == address.port())
        {
            debug!(internal = mapping.internal, external = mapping.external, "Using mapped port");
            address.set_port(mapping.external);
        }
        address
    }
}

#[cfg(not(windows))]
pub fn default_address_resolver() -> Box<dyn AddressResolver> {
    Box::new(PassthroughResolver)
}

#[cfg(windows)]
pub fn default_address_resolver() -> Box<dyn AddressResolver> {
    Box::new(PortMappingResolver::from_env())
}
