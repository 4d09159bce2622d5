use async_trait::async_trait;
use oauth2::{reqwest, AuthorizationCode, PkceCodeVerifier, TokenResponse};
use serde_json::Value;

use crate::chat::{AuthFailure, DisplayName, Identity, IdentityProvider};

use super::clients::{ClientProvider, HappyClient};

/// Finishes an OAuth authorization-code login: trades the code for a token
/// and asks the provider who it belongs to.
pub(crate) struct OAuthExchange {
    client: HappyClient,
    provider: ClientProvider,
    code: AuthorizationCode,
    pkce_verifier: String,
    http_client: reqwest::Client,
}

impl OAuthExchange {
    pub(crate) fn new(
        client: HappyClient,
        provider: ClientProvider,
        code: AuthorizationCode,
        pkce_verifier: String,
    ) -> Result<Self, reqwest::Error> {
        let http_client = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            provider,
            code,
            pkce_verifier,
            http_client,
        })
    }
}

fn rejected(stage: &str) -> impl Fn(reqwest::Error) -> AuthFailure + '_ {
    move |err| AuthFailure::Rejected(format!("{stage}: {err}"))
}

#[async_trait]
impl IdentityProvider for OAuthExchange {
    async fn authenticate(&self) -> Result<Identity, AuthFailure> {
        let token_result = self
            .client
            .exchange_code(self.code.clone())
            .set_pkce_verifier(PkceCodeVerifier::new(self.pkce_verifier.clone()))
            .request_async(&self.http_client)
            .await
            .map_err(|err| AuthFailure::Rejected(format!("token exchange: {err}")))?;

        let body: Value = self
            .http_client
            .get(self.provider.userinfo_url())
            .bearer_auth(token_result.access_token().secret())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(rejected("user info"))?
            .json()
            .await
            .map_err(rejected("user info body"))?;

        self.provider.identity(&body)
    }

    // names are kept in the roster, the provider profile is never written
    async fn set_display_name(&self, _name: &DisplayName) -> Result<(), AuthFailure> {
        Ok(())
    }

    async fn sign_out(&self) {}
}
