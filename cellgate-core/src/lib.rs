pub mod auth;
pub mod identity;
mod permissions;
pub mod placement;

pub use auth::{
    AuditSink, AuthError, AuthOutcome, AuthenticatorKind, CompositeAuthenticator, Identity,
    PasswordAuthenticator, TracingAuditSink,
};
pub use permissions::{PermissionsBuilder, PermissionsResolver};

#[cfg(test)]
mod test_http;
