use async_trait::async_trait;
use tower_sessions::Session;
use tracing::warn;

use crate::{
    chat::{AuthFailure, DisplayName, Identity, IdentityProvider},
    session::IDENTITY,
};

/// The identity remembered in the browser's cookie session after an OAuth
/// login. Every later request signs in through this.
#[derive(Clone)]
pub struct CookieIdentity {
    session: Session,
}

impl CookieIdentity {
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    pub async fn remember(&self, identity: &Identity) -> Result<(), tower_sessions::session::Error> {
        self.session.insert(IDENTITY, identity).await
    }

    async fn current(&self) -> Result<Identity, AuthFailure> {
        self.session
            .get::<Identity>(IDENTITY)
            .await
            .map_err(|err| AuthFailure::Rejected(err.to_string()))?
            .ok_or_else(|| AuthFailure::Rejected("not signed in".to_owned()))
    }
}

#[async_trait]
impl IdentityProvider for CookieIdentity {
    async fn authenticate(&self) -> Result<Identity, AuthFailure> {
        self.current().await
    }

    async fn set_display_name(&self, name: &DisplayName) -> Result<(), AuthFailure> {
        let mut identity = self.current().await?;
        identity.display_name = Some(name.as_str().to_owned());
        self.remember(&identity)
            .await
            .map_err(|err| AuthFailure::Rejected(err.to_string()))
    }

    async fn sign_out(&self) {
        if let Err(err) = self.session.flush().await {
            warn!(%err, "failed to drop the cookie session");
        }
    }
}
