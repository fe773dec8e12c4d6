mod defaults;

use std::time::Duration;

use defaults::*;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ConfigError, ListenEndpoint, Secret};

pub const DEFAULT_CIPHERS: &[&str] = &[
    "aes128-gcm@openssh.com",
    "aes256-ctr",
    "aes192-ctr",
    "aes128-ctr",
];
pub const DEFAULT_MACS: &[&str] = &["hmac-sha2-256-etm@openssh.com", "hmac-sha2-256"];
pub const DEFAULT_KEY_EXCHANGES: &[&str] = &["curve25519-sha256@libssh.org"];

/// Comma separated overrides of the transport algorithm lists.
/// Empty values keep the built-in defaults.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AlgorithmsConfig {
    #[serde(default)]
    pub allowed_ciphers: String,
    #[serde(default)]
    pub allowed_macs: String,
    #[serde(default)]
    pub allowed_key_exchanges: String,
}

fn split_list<'a>(value: &'a str, defaults: &[&'a str]) -> Vec<&'a str> {
    if value.trim().is_empty() {
        return defaults.to_vec();
    }
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

impl AlgorithmsConfig {
    pub fn ciphers(&self) -> Vec<&str> {
        split_list(&self.allowed_ciphers, DEFAULT_CIPHERS)
    }

    pub fn macs(&self) -> Vec<&str> {
        split_list(&self.allowed_macs, DEFAULT_MACS)
    }

    pub fn key_exchanges(&self) -> Vec<&str> {
        split_list(&self.allowed_key_exchanges, DEFAULT_KEY_EXCHANGES)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PlacementConfig {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DiegoAuthConfig {
    #[serde(default = "_default_false")]
    pub enable: bool,

    #[serde(default)]
    pub credentials: Secret<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CfAuthConfig {
    #[serde(default = "_default_false")]
    pub enable: bool,

    #[serde(default)]
    pub cc_api_url: Option<String>,

    #[serde(default)]
    pub uaa_token_url: Option<String>,

    #[serde(default)]
    pub uaa_username: Option<String>,

    #[serde(default)]
    pub uaa_password: Option<Secret<String>>,

    #[serde(default)]
    pub skip_cert_verify: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HealthCheckConfig {
    #[serde(default = "_default_true")]
    pub enable: bool,

    #[serde(default = "_default_health_check_listen")]
    pub listen: ListenEndpoint,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enable: true,
            listen: _default_health_check_listen(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProxyConfig {
    #[serde(default = "_default_proxy_listen")]
    pub listen: ListenEndpoint,

    #[serde(default)]
    pub host_key: Option<Secret<String>>,

    #[serde(default = "_default_idle_connection_timeout", with = "humantime_serde")]
    pub idle_connection_timeout: Duration,

    #[serde(default = "_default_communication_timeout", with = "humantime_serde")]
    pub communication_timeout: Duration,

    #[serde(default = "_default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,

    #[serde(default)]
    pub algorithms: AlgorithmsConfig,

    #[serde(default = "_default_false")]
    pub connect_to_instance_address: bool,

    #[serde(default)]
    pub placement: PlacementConfig,

    #[serde(default)]
    pub diego_auth: DiegoAuthConfig,

    #[serde(default)]
    pub cf_auth: CfAuthConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: _default_proxy_listen(),
            host_key: None,
            idle_connection_timeout: _default_idle_connection_timeout(),
            communication_timeout: _default_communication_timeout(),
            shutdown_grace: _default_shutdown_grace(),
            algorithms: Default::default(),
            connect_to_instance_address: false,
            placement: Default::default(),
            diego_auth: Default::default(),
            cf_auth: Default::default(),
            health_check: Default::default(),
        }
    }
}

fn require<'a>(value: &'a Option<String>, field: &'static str) -> Result<&'a str, ConfigError> {
    match value.as_deref() {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(field)),
    }
}

fn require_url(value: &Option<String>, field: &'static str) -> Result<Url, ConfigError> {
    Url::parse(require(value, field)?).map_err(|source| ConfigError::InvalidUrl { field, source })
}

fn require_secret<'a>(
    value: &'a Option<Secret<String>>,
    field: &'static str,
) -> Result<&'a Secret<String>, ConfigError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(field)),
    }
}

impl ProxyConfig {
    pub fn host_key(&self) -> Result<&Secret<String>, ConfigError> {
        require_secret(&self.host_key, "host_key")
    }

    pub fn placement_url(&self) -> Result<Url, ConfigError> {
        require_url(&self.placement.url, "placement.url")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.host_key()?;
        self.placement_url()?;
        if !self.diego_auth.enable && !self.cf_auth.enable {
            return Err(ConfigError::NoAuthenticators);
        }
        if self.diego_auth.enable && self.diego_auth.credentials.expose_secret().is_empty() {
            return Err(ConfigError::Missing("diego_auth.credentials"));
        }
        if self.cf_auth.enable {
            self.cf_auth.validate()?;
        }
        Ok(())
    }
}

/// Validated view of the CF authentication settings.
pub struct CfAuthEndpoints<'a> {
    pub cc_api_url: Url,
    pub uaa_token_url: Url,
    pub uaa_username: &'a str,
    pub uaa_password: &'a Secret<String>,
}

impl CfAuthConfig {
    pub fn validate(&self) -> Result<CfAuthEndpoints<'_>, ConfigError> {
        let cc_api_url = require_url(&self.cc_api_url, "cf_auth.cc_api_url")?;
        let uaa_password = require_secret(&self.uaa_password, "cf_auth.uaa_password")?;
        let uaa_username = require(&self.uaa_username, "cf_auth.uaa_username")?;
        let uaa_token_url = require_url(&self.uaa_token_url, "cf_auth.uaa_token_url")?;
        Ok(CfAuthEndpoints {
            cc_api_url,
            uaa_token_url,
            uaa_username,
            uaa_password,
        })
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DaemonConfig {
    #[serde(default = "_default_daemon_listen")]
    pub listen: ListenEndpoint,

    #[serde(default)]
    pub host_key: Option<Secret<String>>,

    /// OpenSSH formatted public key allowed to log in.
    #[serde(default)]
    pub authorized_key: Option<String>,

    #[serde(default = "_default_false")]
    pub allow_unauthenticated_clients: bool,

    #[serde(default = "_default_false")]
    pub inherit_daemon_env: bool,

    #[serde(default = "_default_idle_connection_timeout", with = "humantime_serde")]
    pub idle_connection_timeout: Duration,

    #[serde(default = "_default_dial_timeout", with = "humantime_serde")]
    pub dial_timeout: Duration,

    #[serde(default = "_default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,

    #[serde(default)]
    pub algorithms: AlgorithmsConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: _default_daemon_listen(),
            host_key: None,
            authorized_key: None,
            allow_unauthenticated_clients: false,
            inherit_daemon_env: false,
            idle_connection_timeout: _default_idle_connection_timeout(),
            dial_timeout: _default_dial_timeout(),
            shutdown_grace: _default_shutdown_grace(),
            algorithms: Default::default(),
        }
    }
}

impl DaemonConfig {
    pub fn host_key(&self) -> Result<&Secret<String>, ConfigError> {
        require_secret(&self.host_key, "host_key")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.host_key()?;
        let has_key = self
            .authorized_key
            .as_deref()
            .is_some_and(|k| !k.trim().is_empty());
        if !has_key && !self.allow_unauthenticated_clients {
            return Err(ConfigError::NoDaemonAuthentication);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct CellgateConfigStore {
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,

    #[serde(default)]
    pub daemon: Option<DaemonConfig>,
}

impl CellgateConfigStore {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(proxy) = &self.proxy {
            proxy.validate()?;
        }
        if let Some(daemon) = &self.daemon {
            daemon.validate()?;
        }
        Ok(())
    }
}
