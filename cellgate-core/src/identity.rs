use std::time::Duration;

use async_trait::async_trait;
use cellgate_common::{CfAuthEndpoints, Secret};
use serde::Deserialize;
use tracing::*;
use url::Url;

use crate::AuthError;

/// Application instance named by a `cf:` username.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInstance {
    pub app_guid: String,
    pub index: u32,
}

/// Principal the identity provider vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub process_guid: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn validate(
        &self,
        token: &Secret<String>,
        app: &AppInstance,
    ) -> Result<Principal, AuthError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_owned()
}

#[derive(Deserialize)]
struct SshAccessResponse {
    process_guid: String,
}

/// Exchanges one-time codes at UAA and checks SSH access with the Cloud Controller.
pub struct UaaIdentityProvider {
    client: reqwest::Client,
    cc_api_url: Url,
    uaa_token_url: Url,
    uaa_username: String,
    uaa_password: Secret<String>,
}

fn transport_error(error: reqwest::Error) -> AuthError {
    AuthError::Unavailable(error.to_string())
}

fn status_error(service: &str, status: reqwest::StatusCode) -> AuthError {
    if status.is_server_error() {
        AuthError::Unavailable(format!("{service} returned {status}"))
    } else {
        AuthError::IdentityRejected(format!("{service} returned {status}"))
    }
}

impl UaaIdentityProvider {
    pub fn new(
        endpoints: CfAuthEndpoints<'_>,
        timeout: Duration,
        skip_cert_verify: bool,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(skip_cert_verify)
            .build()?;
        Ok(Self {
            client,
            cc_api_url: endpoints.cc_api_url,
            uaa_token_url: endpoints.uaa_token_url,
            uaa_username: endpoints.uaa_username.to_owned(),
            uaa_password: endpoints.uaa_password.clone(),
        })
    }

    fn ssh_access_url(&self, app: &AppInstance) -> String {
        format!(
            "{}/internal/apps/{}/ssh_access/{}",
            self.cc_api_url.as_str().trim_end_matches('/'),
            app.app_guid,
            app.index
        )
    }

    async fn exchange_code(&self, code: &Secret<String>) -> Result<TokenResponse, AuthError> {
        let response = self
            .client
            .post(self.uaa_token_url.clone())
            .basic_auth(&self.uaa_username, Some(self.uaa_password.expose_secret()))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.expose_secret().as_str()),
            ])
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error("UAA", status));
        }
        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::IdentityRejected(format!("malformed UAA response: {e}")))
    }
}

#[async_trait]
impl IdentityProvider for UaaIdentityProvider {
    async fn validate(
        &self,
        token: &Secret<String>,
        app: &AppInstance,
    ) -> Result<Principal, AuthError> {
        let grant = self.exchange_code(token).await?;

        let url = self.ssh_access_url(app);
        debug!(%url, "Checking SSH access");
        let response = self
            .client
            .get(url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("{} {}", grant.token_type, grant.access_token),
            )
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error("Cloud Controller", status));
        }
        let access = response.json::<SshAccessResponse>().await.map_err(|e| {
            AuthError::IdentityRejected(format!("malformed Cloud Controller response: {e}"))
        })?;
        Ok(Principal {
            process_guid: access.process_guid,
        })
    }
}
