use serde::{Deserialize, Serialize};

use crate::Secret;

/// Where and how the proxy reaches the backend for an authenticated connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_address: Option<String>,

    #[serde(default)]
    pub server_cert_domain_san: String,

    #[serde(default)]
    pub host_fingerprint: String,

    #[serde(default)]
    pub user: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<Secret<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<Secret<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMessage {
    pub guid: String,
    pub index: u32,
}

/// Outcome of a successful authentication. Owned by a single connection and
/// never mutated after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permissions {
    pub target: TargetConfig,
    pub log_message: LogMessage,
    pub connect_via_instance_address: bool,
}
