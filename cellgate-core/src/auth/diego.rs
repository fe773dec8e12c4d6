use std::sync::Arc;

use async_trait::async_trait;
use cellgate_common::Secret;
use once_cell::sync::Lazy;
use regex::Regex;
use subtle::ConstantTimeEq;
use tracing::*;

use super::{
    parse_instance_selector, AuthError, AuthOutcome, AuthenticatorKind, Identity,
    PasswordAuthenticator,
};
use crate::PermissionsResolver;

const USERNAME_PREFIX: &str = "diego:";

#[allow(clippy::unwrap_used)]
static SELECTOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.+)/(\d+)$").unwrap());

/// Accepts `diego:<process-guid>/<index>` users presenting the shared proxy secret.
pub struct DiegoAuthenticator {
    credentials: Secret<String>,
    resolver: Arc<dyn PermissionsResolver>,
    connect_via_instance_address: bool,
}

impl DiegoAuthenticator {
    pub fn new(
        credentials: Secret<String>,
        resolver: Arc<dyn PermissionsResolver>,
        connect_via_instance_address: bool,
    ) -> Self {
        Self {
            credentials,
            resolver,
            connect_via_instance_address,
        }
    }

    fn credential_matches(&self, presented: &Secret<String>) -> bool {
        let expected = self.credentials.expose_secret().as_bytes();
        let presented = presented.expose_secret().as_bytes();
        !expected.is_empty()
            && expected.len() == presented.len()
            && bool::from(expected.ct_eq(presented))
    }
}

#[async_trait]
impl PasswordAuthenticator for DiegoAuthenticator {
    fn kind(&self) -> AuthenticatorKind {
        AuthenticatorKind::Diego
    }

    async fn try_authenticate(&self, identity: &Identity) -> AuthOutcome {
        let Some(selector) = identity.username.strip_prefix(USERNAME_PREFIX) else {
            return AuthOutcome::NotApplicable;
        };

        let (process_guid, index) = match parse_instance_selector(selector, &SELECTOR) {
            Ok(parsed) => parsed,
            Err(error) => return AuthOutcome::Reject(error),
        };

        if !self.credential_matches(&identity.credential) {
            return AuthOutcome::Reject(AuthError::InvalidCredentials);
        }

        debug!(%process_guid, index, "Resolving target");
        match self
            .resolver
            .resolve(&process_guid, index, self.connect_via_instance_address)
            .await
        {
            Ok(permissions) => AuthOutcome::Success(permissions),
            Err(error) => AuthOutcome::Reject(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use cellgate_common::{LogMessage, Permissions, TargetConfig};

    use super::*;
    use crate::placement::PlacementError;

    #[derive(Default)]
    struct FakeResolver {
        calls: Mutex<Vec<(String, u32, bool)>>,
        missing: bool,
    }

    #[async_trait]
    impl PermissionsResolver for FakeResolver {
        async fn resolve(
            &self,
            process_guid: &str,
            index: u32,
            connect_via_instance_address: bool,
        ) -> Result<Permissions, PlacementError> {
            self.calls.lock().unwrap().push((
                process_guid.to_owned(),
                index,
                connect_via_instance_address,
            ));
            if self.missing {
                return Err(PlacementError::NotFound);
            }
            Ok(Permissions {
                target: TargetConfig {
                    address: "10.0.16.4:61001".to_owned(),
                    tls_address: None,
                    server_cert_domain_san: String::new(),
                    host_fingerprint: String::new(),
                    user: "vcap".to_owned(),
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

    fn authenticator(resolver: Arc<FakeResolver>) -> DiegoAuthenticator {
        DiegoAuthenticator::new(Secret::new("shared-secret".to_owned()), resolver, true)
    }

    #[tokio::test]
    async fn test_accepts_shared_secret() {
        let resolver = Arc::new(FakeResolver::default());
        let outcome = authenticator(resolver.clone())
            .try_authenticate(&Identity::new("diego:some-guid/3", "shared-secret"))
            .await;
        let AuthOutcome::Success(permissions) = outcome else {
            panic!("expected success");
        };
        assert_eq!(permissions.target.address, "10.0.16.4:61001");
        assert_eq!(
            *resolver.calls.lock().unwrap(),
            vec![("some-guid".to_owned(), 3, true)]
        );
    }

    #[tokio::test]
    async fn test_other_usernames_are_not_applicable() {
        let resolver = Arc::new(FakeResolver::default());
        let outcome = authenticator(resolver.clone())
            .try_authenticate(&Identity::new("cf:some-guid/3", "shared-secret"))
            .await;
        assert!(matches!(outcome, AuthOutcome::NotApplicable));
        assert!(resolver.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected_before_lookup() {
        let resolver = Arc::new(FakeResolver::default());
        let outcome = authenticator(resolver.clone())
            .try_authenticate(&Identity::new("diego:some-guid/3", "shared-secreT"))
            .await;
        assert!(matches!(
            outcome,
            AuthOutcome::Reject(AuthError::InvalidCredentials)
        ));
        assert!(resolver.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_shared_secret_accepts_nothing() {
        let resolver = Arc::new(FakeResolver::default());
        let authenticator =
            DiegoAuthenticator::new(Secret::new(String::new()), resolver.clone(), true);
        let outcome = authenticator
            .try_authenticate(&Identity::new("diego:any-guid/0", ""))
            .await;
        assert!(matches!(
            outcome,
            AuthOutcome::Reject(AuthError::InvalidCredentials)
        ));
        assert!(resolver.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_username_is_rejected() {
        let resolver = Arc::new(FakeResolver::default());
        for user in ["diego:", "diego:guid", "diego:guid/", "diego:guid/abc", "diego:/1"] {
            let outcome = authenticator(resolver.clone())
                .try_authenticate(&Identity::new(user, "shared-secret"))
                .await;
            assert!(
                matches!(outcome, AuthOutcome::Reject(AuthError::InvalidUsername(_))),
                "{user}"
            );
        }
    }

    #[tokio::test]
    async fn test_unknown_instance_is_rejected() {
        let resolver = Arc::new(FakeResolver {
            missing: true,
            ..Default::default()
        });
        let outcome = authenticator(resolver)
            .try_authenticate(&Identity::new("diego:some-guid/9", "shared-secret"))
            .await;
        assert!(matches!(outcome, AuthOutcome::Reject(AuthError::NotFound)));
    }
}
