use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cellgate_common::{CellgateError, CfAuthConfig};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::*;

use super::{parse_instance_selector, AuthOutcome, AuthenticatorKind, Identity, PasswordAuthenticator};
use crate::identity::{AppInstance, IdentityProvider, UaaIdentityProvider};
use crate::PermissionsResolver;

const USERNAME_PREFIX: &str = "cf:";

#[allow(clippy::unwrap_used)]
static SELECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\w{8}-\w{4}-\w{4}-\w{4}-\w{12})/(\d+)$").unwrap()
});

/// Accepts `cf:<app-guid>/<index>` users presenting a one-time code issued by
/// the platform identity provider.
pub struct CfAuthenticator {
    identity_provider: Arc<dyn IdentityProvider>,
    resolver: Arc<dyn PermissionsResolver>,
    connect_via_instance_address: bool,
}

impl CfAuthenticator {
    pub fn new(
        identity_provider: Arc<dyn IdentityProvider>,
        resolver: Arc<dyn PermissionsResolver>,
        connect_via_instance_address: bool,
    ) -> Self {
        Self {
            identity_provider,
            resolver,
            connect_via_instance_address,
        }
    }

    /// Builds the authenticator against UAA and the Cloud Controller.
    /// Missing or unparsable endpoints fail here, before anything listens.
    pub fn from_config(
        config: &CfAuthConfig,
        communication_timeout: Duration,
        resolver: Arc<dyn PermissionsResolver>,
        connect_via_instance_address: bool,
    ) -> Result<Self, CellgateError> {
        let endpoints = config.validate()?;
        let provider =
            UaaIdentityProvider::new(endpoints, communication_timeout, config.skip_cert_verify)
                .map_err(CellgateError::other)?;
        Ok(Self::new(
            Arc::new(provider),
            resolver,
            connect_via_instance_address,
        ))
    }
}

#[async_trait]
impl PasswordAuthenticator for CfAuthenticator {
    fn kind(&self) -> AuthenticatorKind {
        AuthenticatorKind::CloudFoundry
    }

    async fn try_authenticate(&self, identity: &Identity) -> AuthOutcome {
        let Some(selector) = identity.username.strip_prefix(USERNAME_PREFIX) else {
            return AuthOutcome::NotApplicable;
        };

        let (app_guid, index) = match parse_instance_selector(selector, &SELECTOR) {
            Ok(parsed) => parsed,
            Err(error) => return AuthOutcome::Reject(error),
        };
        let app = AppInstance { app_guid, index };

        let principal = match self
            .identity_provider
            .validate(&identity.credential, &app)
            .await
        {
            Ok(principal) => principal,
            Err(error) => return AuthOutcome::Reject(error),
        };

        debug!(app_guid = %app.app_guid, process_guid = %principal.process_guid, index, "Resolving target");
        match self
            .resolver
            .resolve(
                &principal.process_guid,
                index,
                self.connect_via_instance_address,
            )
            .await
        {
            Ok(permissions) => AuthOutcome::Success(permissions),
            Err(error) => AuthOutcome::Reject(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cellgate_common::{ConfigError, LogMessage, Permissions, Secret, TargetConfig};

    use super::*;
    use crate::identity::Principal;
    use crate::placement::PlacementError;
    use crate::AuthError;

    const APP_GUID: &str = "2f6b1d2e-7a4c-4d1e-9c55-0d0b8f1a2b3c";

    struct FakeProvider {
        calls: AtomicUsize,
        reject: bool,
    }

    #[async_trait]
    impl IdentityProvider for FakeProvider {
        async fn validate(
            &self,
            token: &Secret<String>,
            app: &AppInstance,
        ) -> Result<Principal, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject || token.expose_secret() != "good-code" {
                return Err(AuthError::IdentityRejected("401".to_owned()));
            }
            Ok(Principal {
                process_guid: format!("{}-process", app.app_guid),
            })
        }
    }

    struct EchoResolver;

    #[async_trait]
    impl PermissionsResolver for EchoResolver {
        async fn resolve(
            &self,
            process_guid: &str,
            index: u32,
            connect_via_instance_address: bool,
        ) -> Result<Permissions, PlacementError> {
            Ok(Permissions {
                target: TargetConfig {
                    address: "10.0.0.5:61002".to_owned(),
                    tls_address: None,
                    server_cert_domain_san: String::new(),
                    host_fingerprint: String::new(),
                    user: String::new(),
                    password: None,
                    private_key: None,
                },
                log_message: LogMessage {
                    guid: process_guid.to_owned(),
                    index,
                },
                connect_via_instance_address,
            })
        }
    }

    fn authenticator(reject: bool) -> (CfAuthenticator, Arc<FakeProvider>) {
        let provider = Arc::new(FakeProvider {
            calls: AtomicUsize::new(0),
            reject,
        });
        (
            CfAuthenticator::new(provider.clone(), Arc::new(EchoResolver), false),
            provider,
        )
    }

    #[tokio::test]
    async fn test_valid_code_resolves_process() {
        let (auth, _) = authenticator(false);
        let outcome = auth
            .try_authenticate(&Identity::new(format!("cf:{APP_GUID}/2"), "good-code"))
            .await;
        let AuthOutcome::Success(permissions) = outcome else {
            panic!("expected success");
        };
        assert_eq!(permissions.log_message.guid, format!("{APP_GUID}-process"));
        assert_eq!(permissions.log_message.index, 2);
    }

    #[tokio::test]
    async fn test_rejected_code() {
        let (auth, _) = authenticator(true);
        let outcome = auth
            .try_authenticate(&Identity::new(format!("cf:{APP_GUID}/0"), "good-code"))
            .await;
        assert!(matches!(
            outcome,
            AuthOutcome::Reject(AuthError::IdentityRejected(_))
        ));
    }

    #[tokio::test]
    async fn test_malformed_app_guid_fails_without_provider_call() {
        let (auth, provider) = authenticator(false);
        let outcome = auth
            .try_authenticate(&Identity::new("cf:not-a-guid/0", "good-code"))
            .await;
        assert!(matches!(
            outcome,
            AuthOutcome::Reject(AuthError::InvalidUsername(_))
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_diego_users_are_not_applicable() {
        let (auth, provider) = authenticator(false);
        let outcome = auth
            .try_authenticate(&Identity::new("diego:guid/0", "good-code"))
            .await;
        assert!(matches!(outcome, AuthOutcome::NotApplicable));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_construction_requires_endpoints() {
        let config = CfAuthConfig {
            enable: true,
            cc_api_url: Some("https://api.example.com".to_owned()),
            ..Default::default()
        };
        let result = CfAuthenticator::from_config(
            &config,
            Duration::from_secs(1),
            Arc::new(EchoResolver),
            false,
        );
        assert!(matches!(
            result,
            Err(CellgateError::Config(ConfigError::Missing(_)))
        ));
    }
}
