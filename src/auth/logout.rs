use axum::{debug_handler, extract::Query, response::Redirect};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{chat::IdentityProvider, AppResult};

use super::{local_path, CookieIdentity};

#[derive(Deserialize)]
pub(crate) struct LogoutQuery {
    pub(crate) return_url: Option<String>,
}

#[debug_handler]
pub(crate) async fn logout(
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    session: Session
) -> AppResult<Redirect> {
    CookieIdentity::new(session).sign_out().await;
    Ok(Redirect::to(return_url.as_deref().and_then(local_path).unwrap_or("/")))
}
