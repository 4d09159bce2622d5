use axum::{debug_handler, extract::State, http::StatusCode, Json};
use tower_sessions::Session;

use crate::{auth, chat::{Chat, Room}, AppResult};

#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(chat): State<Chat>,
    session: Session,
) -> AppResult<(StatusCode, Json<Room>)> {
    let mut chat_session = auth::active_session(chat, session).await?;
    let room = chat_session.create_room().await?;
    Ok((StatusCode::CREATED, Json(room)))
}
