mod http;

use async_trait::async_trait;
use cellgate_common::Secret;
pub use http::HttpPlacementService;
use serde::Deserialize;

#[derive(thiserror::Error, Debug)]
pub enum PlacementError {
    #[error("process or instance not found")]
    NotFound,
    #[error("placement service unavailable: {0}")]
    Unavailable(String),
    #[error("invalid placement data: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    #[serde(default)]
    pub container_tls_proxy_port: u16,
    #[serde(default)]
    pub host_tls_proxy_port: u16,
}

/// Per-process SSH access policy published alongside the desired state.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SshRoute {
    pub container_port: u16,
    #[serde(default)]
    pub host_fingerprint: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: Option<Secret<String>>,
    #[serde(default)]
    pub private_key: Option<Secret<String>>,
}

/// Where a single instance of a process currently runs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct InstancePlacement {
    pub instance_guid: String,
    pub index: u32,
    #[serde(default)]
    pub log_guid: Option<String>,
    /// Host address, reachable through `ports[].host_port`.
    pub address: String,
    /// Overlay address of the container itself.
    #[serde(default)]
    pub instance_address: String,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    #[serde(default)]
    pub ssh_route: Option<SshRoute>,
}

#[async_trait]
pub trait PlacementService: Send + Sync {
    async fn resolve_instance(
        &self,
        process_guid: &str,
        index: u32,
    ) -> Result<InstancePlacement, PlacementError>;
}
