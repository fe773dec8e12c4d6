use std::net::SocketAddr;

use cellgate_common::Permissions;
use tracing::*;

use super::AuthError;

pub struct AuthAttempt<'a> {
    pub username: &'a str,
    pub method: &'static str,
    pub remote_address: Option<SocketAddr>,
    pub result: Result<&'a Permissions, &'a AuthError>,
}

/// Receives one record per authentication attempt. Records never carry the
/// credential itself.
pub trait AuditSink: Send + Sync {
    fn record(&self, attempt: &AuthAttempt<'_>);
}

pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, attempt: &AuthAttempt<'_>) {
        let user = attempt.username;
        let method = attempt.method;
        let remote = attempt.remote_address.map(|a| a.to_string());
        match attempt.result {
            Ok(permissions) => info!(
                %user,
                %method,
                ?remote,
                guid = %permissions.log_message.guid,
                index = permissions.log_message.index,
                "authentication-attempted"
            ),
            Err(error) if error.is_infrastructure() => error!(
                %user,
                %method,
                ?remote,
                %error,
                "authentication-failed: dependency unavailable"
            ),
            Err(error) => warn!(%user, %method, ?remote, %error, "authentication-failed"),
        }
    }
}
