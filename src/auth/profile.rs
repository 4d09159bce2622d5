use axum::{debug_handler, extract::State, Json};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{chat::{Chat, ChatError, ChatSession, Phase, User}, AppResult};

use super::CookieIdentity;

#[derive(Serialize)]
pub(crate) struct Me {
    phase: Phase,
    user: Option<User>,
}

#[derive(Deserialize)]
pub(crate) struct ProfileForm {
    username: String,
}

/// Who the cookie belongs to, and whether they still need a username.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn me(
    State(chat): State<Chat>,
    session: Session,
) -> AppResult<Json<Me>> {
    let mut chat_session = ChatSession::new(chat, |_| {});
    match chat_session.login(&CookieIdentity::new(session)).await {
        Ok(_) | Err(ChatError::AuthFailed(_)) => {}
        Err(err) => return Err(err.into()),
    }

    let state = chat_session.state();
    Ok(Json(Me { phase: state.phase(), user: state.user().cloned() }))
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn set_profile(
    State(chat): State<Chat>,
    session: Session,
    Json(ProfileForm { username }): Json<ProfileForm>,
) -> AppResult<Json<User>> {
    let identity = CookieIdentity::new(session);
    let mut chat_session = ChatSession::new(chat, |_| {});
    chat_session.login(&identity).await?;
    Ok(Json(chat_session.set_username(&identity, &username).await?))
}
