use axum::{routing::get, Router};
use tower_sessions::Session;

use crate::{chat::{Chat, ChatError, ChatSession, Phase}, AppResult, AppState};

mod clients;
mod cookie;
mod exchange;
mod login;
mod lockin;
mod logout;
mod profile;

pub use clients::{ClientProvider, Clients};
pub use cookie::CookieIdentity;
pub(crate) use profile::me;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login/{provider}", get(login::login))
        .route("/lockin/{provider}", get(lockin::lockin))
        .route("/logout", get(logout::logout))
        .route("/me", get(profile::me))
        .route("/profile", axum::routing::post(profile::set_profile))
}

/// A chat session for one request, signed in from the cookie. Fails unless
/// the user has a username.
pub(crate) async fn active_session(chat: Chat, session: Session) -> AppResult<ChatSession> {
    let mut chat_session = ChatSession::new(chat, |_| {});
    if chat_session.login(&CookieIdentity::new(session)).await?.phase() != Phase::Active {
        return Err(ChatError::Unauthenticated)?;
    }
    Ok(chat_session)
}

/// Only same-site paths are followed after login and logout.
pub(crate) fn local_path(url: &str) -> Option<&str> {
    (url.starts_with('/') && !url.starts_with("//") && !url.contains('\\')).then_some(url)
}
