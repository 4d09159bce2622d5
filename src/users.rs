use axum::{debug_handler, extract::State, Json};
use tower_sessions::Session;

use crate::{auth, chat::{Chat, User}, AppResult};

/// Everyone who has signed in, for picking a direct conversation.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn list(
    State(chat): State<Chat>,
    session: Session,
) -> AppResult<Json<Vec<User>>> {
    auth::active_session(chat.clone(), session).await?;
    Ok(Json(chat.roster.list_users().await?))
}
