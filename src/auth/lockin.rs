use axum::{debug_handler, extract::{Path, Query, State}, response::{IntoResponse, Redirect, Response}};
use oauth2::{AuthorizationCode, CsrfToken};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

use crate::{chat::{Chat, ChatSession, Identity, SessionState}, session::{CSRF_STATE, PKCE_VERIFIER, RETURN_URL}, AppResult, AppState};

use super::{clients::ClientProvider, exchange::OAuthExchange, local_path, Clients, CookieIdentity};

#[derive(Deserialize)]
pub struct LockinQuery {
    pub state: Option<String>,
    pub code: Option<String>,
}

/// OAuth callback. Signs the user in, remembers them in the cookie session
/// and sends them on; users without a username land on `/` to pick one.
#[debug_handler(state = AppState)]
pub(crate) async fn lockin(
    Path(provider): Path<ClientProvider>,
    Query(LockinQuery { state, code }): Query<LockinQuery>,
    State(chat): State<Chat>,
    State(clients): State<Clients>,
    session: Session,
) -> AppResult<Response> {
    let state = CsrfToken::new(state.ok_or("OAuth: without state")?);
    let code = AuthorizationCode::new(code.ok_or("OAuth: without code")?);

    let Some(stored_state) = session.remove::<String>(CSRF_STATE).await? else {
        return Err("no csrf_state")?;
    };

    if state.secret().as_str() != stored_state.as_str() {
        return Err("csrf tokens don't match")?;
    }

    let Some(pkce_verifier) = session.remove::<String>(PKCE_VERIFIER).await? else {
        return Err("no pkce_verifier")?;
    };

    let exchange = OAuthExchange::new(clients.get_client(provider)?, provider, code, pkce_verifier)?;
    let mut chat_session = ChatSession::new(chat, |_| {});
    let user = match chat_session.login(&exchange).await? {
        SessionState::Active(user) | SessionState::NeedsProfile(user) => user.clone(),
        SessionState::Anonymous | SessionState::Authenticating => return Err("login did not complete")?,
    };
    let needs_profile = matches!(chat_session.state(), SessionState::NeedsProfile(_));

    CookieIdentity::new(session.clone()).remember(&Identity::from(&user)).await?;
    info!(user = %user.id, %provider, "welcome");

    let return_url = session.remove::<String>(RETURN_URL).await?;
    let return_url = match return_url.as_deref().and_then(local_path) {
        Some(path) if !needs_profile => path.to_owned(),
        _ => "/".to_owned(),
    };
    Ok(Redirect::to(&return_url).into_response())
}
