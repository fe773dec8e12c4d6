use std::collections::HashSet;
use std::sync::Arc;

use cellgate_common::{ConfigError, Permissions};

use super::{AuditSink, AuthAttempt, AuthError, AuthOutcome, Identity, PasswordAuthenticator};

/// Tries each strategy in registration order and returns the first
/// conclusive answer.
pub struct CompositeAuthenticator {
    authenticators: Vec<Arc<dyn PasswordAuthenticator>>,
    audit: Arc<dyn AuditSink>,
}

impl CompositeAuthenticator {
    pub fn new(
        authenticators: Vec<Arc<dyn PasswordAuthenticator>>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        for authenticator in &authenticators {
            if !seen.insert(authenticator.kind()) {
                return Err(ConfigError::DuplicateAuthenticator(
                    authenticator.kind().to_string(),
                ));
            }
        }
        Ok(Self {
            authenticators,
            audit,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.authenticators.is_empty()
    }

    pub async fn authenticate(&self, identity: &Identity) -> Result<Permissions, AuthError> {
        let result = self.dispatch(identity).await;
        self.audit.record(&AuthAttempt {
            username: &identity.username,
            method: "password",
            remote_address: identity.remote_address,
            result: result.as_ref(),
        });
        result
    }

    async fn dispatch(&self, identity: &Identity) -> Result<Permissions, AuthError> {
        for authenticator in &self.authenticators {
            match authenticator.try_authenticate(identity).await {
                AuthOutcome::Success(permissions) => return Ok(permissions),
                AuthOutcome::Reject(error) => return Err(error),
                AuthOutcome::NotApplicable => continue,
            }
        }
        Err(AuthError::NoMatchingAuthenticator)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use cellgate_common::{LogMessage, TargetConfig};

    use super::*;
    use crate::AuthenticatorKind;

    struct PrefixAuthenticator {
        kind: AuthenticatorKind,
        prefix: &'static str,
        accept: bool,
        validations: AtomicUsize,
    }

    impl PrefixAuthenticator {
        fn new(kind: AuthenticatorKind, prefix: &'static str, accept: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                prefix,
                accept,
                validations: AtomicUsize::new(0),
            })
        }

        fn validations(&self) -> usize {
            self.validations.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PasswordAuthenticator for PrefixAuthenticator {
        fn kind(&self) -> AuthenticatorKind {
            self.kind
        }

        async fn try_authenticate(&self, identity: &Identity) -> AuthOutcome {
            if !identity.username.starts_with(self.prefix) {
                return AuthOutcome::NotApplicable;
            }
            self.validations.fetch_add(1, Ordering::SeqCst);
            if self.accept {
                AuthOutcome::Success(permissions(self.prefix))
            } else {
                AuthOutcome::Reject(AuthError::InvalidCredentials)
            }
        }
    }

    fn strategies(list: &[&Arc<PrefixAuthenticator>]) -> Vec<Arc<dyn PasswordAuthenticator>> {
        list.iter()
            .map(|s| Arc::clone(s) as Arc<dyn PasswordAuthenticator>)
            .collect()
    }

    fn permissions(guid: &str) -> Permissions {
        Permissions {
            target: TargetConfig {
                address: "10.0.0.1:2222".to_owned(),
                tls_address: None,
                server_cert_domain_san: String::new(),
                host_fingerprint: String::new(),
                user: String::new(),
                password: None,
                private_key: None,
            },
            log_message: LogMessage {
                guid: guid.to_owned(),
                index: 0,
            },
            connect_via_instance_address: false,
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        records: Mutex<Vec<(String, bool)>>,
    }

    impl AuditSink for RecordingSink {
        fn record(&self, attempt: &AuthAttempt<'_>) {
            self.records
                .lock()
                .unwrap()
                .push((attempt.username.to_owned(), attempt.result.is_ok()));
        }
    }

    #[tokio::test]
    async fn test_only_matching_strategy_is_validated() {
        let diego = PrefixAuthenticator::new(AuthenticatorKind::Diego, "diego:", true);
        let cf = PrefixAuthenticator::new(AuthenticatorKind::CloudFoundry, "cf:", true);
        let composite = CompositeAuthenticator::new(
            strategies(&[&diego, &cf]),
            Arc::new(RecordingSink::default()),
        )
        .unwrap();

        let permissions = composite
            .authenticate(&Identity::new("cf:app/0", "code"))
            .await
            .unwrap();
        assert_eq!(permissions.log_message.guid, "cf:");
        assert_eq!(diego.validations(), 0);
        assert_eq!(cf.validations(), 1);
    }

    #[tokio::test]
    async fn test_reject_stops_the_chain() {
        let diego = PrefixAuthenticator::new(AuthenticatorKind::Diego, "", false);
        let cf = PrefixAuthenticator::new(AuthenticatorKind::CloudFoundry, "", true);
        let composite = CompositeAuthenticator::new(
            strategies(&[&diego, &cf]),
            Arc::new(RecordingSink::default()),
        )
        .unwrap();

        let result = composite
            .authenticate(&Identity::new("anyone", "secret"))
            .await;
        assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        assert_eq!(cf.validations(), 0);
    }

    #[tokio::test]
    async fn test_no_strategy_registered() {
        let composite =
            CompositeAuthenticator::new(vec![], Arc::new(RecordingSink::default())).unwrap();
        for user in ["diego:guid/0", "cf:guid/1", ""] {
            let result = composite.authenticate(&Identity::new(user, "x")).await;
            assert!(matches!(result, Err(AuthError::NoMatchingAuthenticator)));
        }
    }

    #[tokio::test]
    async fn test_no_strategy_applies() {
        let diego = PrefixAuthenticator::new(AuthenticatorKind::Diego, "diego:", true);
        let composite =
            CompositeAuthenticator::new(strategies(&[&diego]), Arc::new(RecordingSink::default()))
                .unwrap();
        let result = composite.authenticate(&Identity::new("root", "x")).await;
        assert!(matches!(result, Err(AuthError::NoMatchingAuthenticator)));
        assert_eq!(diego.validations(), 0);
    }

    #[tokio::test]
    async fn test_every_attempt_is_audited() {
        let sink = Arc::new(RecordingSink::default());
        let diego = PrefixAuthenticator::new(AuthenticatorKind::Diego, "diego:", true);
        let composite = CompositeAuthenticator::new(strategies(&[&diego]), sink.clone()).unwrap();

        let _ = composite
            .authenticate(&Identity::new("diego:guid/0", "hunter2"))
            .await;
        let _ = composite
            .authenticate(&Identity::new("nobody", "hunter2"))
            .await;

        let records = sink.records.lock().unwrap().clone();
        assert_eq!(
            records,
            vec![
                ("diego:guid/0".to_owned(), true),
                ("nobody".to_owned(), false)
            ]
        );
    }

    #[test]
    fn test_duplicate_kind_is_rejected() {
        let a = PrefixAuthenticator::new(AuthenticatorKind::Diego, "a", true);
        let b = PrefixAuthenticator::new(AuthenticatorKind::Diego, "b", true);
        let result =
            CompositeAuthenticator::new(strategies(&[&a, &b]), Arc::new(RecordingSink::default()));
        assert!(matches!(
            result,
            Err(ConfigError::DuplicateAuthenticator(_))
        ));
    }
}
