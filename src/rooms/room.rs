use axum::{debug_handler, extract::{Path, State}, Json};
use tower_sessions::Session;

use crate::{auth, chat::{Chat, Context, Room, RoomKey}, AppResult};

use super::msg::MessageView;

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room(
    State(chat): State<Chat>,
    session: Session,
    Path(key): Path<String>,
) -> AppResult<Json<Room>> {
    let key = RoomKey::parse(&key)?;
    auth::active_session(chat.clone(), session).await?;
    Ok(Json(chat.rooms.get_room(&key).await?))
}

/// Room history, oldest first.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn messages(
    State(chat): State<Chat>,
    session: Session,
    Path(key): Path<String>,
) -> AppResult<Json<Vec<MessageView>>> {
    let key = RoomKey::parse(&key)?;
    auth::active_session(chat.clone(), session).await?;
    let room = chat.rooms.get_room(&key).await?;

    let messages = chat.log.read_ordered(&Context::Room(room.key)).await?;
    Ok(Json(messages.into_iter().map(MessageView::from).collect()))
}
