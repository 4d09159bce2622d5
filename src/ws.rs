use axum::{
    debug_handler,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message as Frame, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};
use tower_sessions::Session;
use tracing::{debug, warn};

use crate::{
    auth::CookieIdentity,
    chat::{
        Chat, ChatError, ChatSession, Context, FeedEvent, IdentityProvider, Phase, Room, RoomKey, Roster, SessionState,
        User, UserId,
    },
    rooms::MessageView,
};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    /// Create a room and move into it.
    Create,
    Join { room: String },
    Direct { peer: UserId },
    Close,
    Send { body: String },
    Resubscribe,
    Username { name: String },
    Logout,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerEvent {
    Session { phase: Phase, user: Option<User> },
    RoomCreated { room: Room },
    Joined { context: Context },
    Snapshot { context: Context, messages: Vec<MessageView> },
    Stale { context: Context, error: String },
    Sent { message: MessageView },
    /// Everyone who has signed in, resent on every sign-up or rename.
    Users { users: Vec<User> },
    Closed,
    Error { error: String },
}

impl ServerEvent {
    fn session(state: &SessionState) -> Self {
        ServerEvent::Session { phase: state.phase(), user: state.user().cloned() }
    }
}

impl From<FeedEvent> for ServerEvent {
    fn from(event: FeedEvent) -> Self {
        match event {
            FeedEvent::Snapshot { context, messages } => ServerEvent::Snapshot {
                context,
                messages: messages.into_iter().map(MessageView::from).collect(),
            },
            FeedEvent::Stale { context, error } => ServerEvent::Stale { context, error: error.to_string() },
        }
    }
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn chat_ws(
    State(chat): State<Chat>,
    session: Session,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve(socket, chat, CookieIdentity::new(session)))
}

async fn serve(socket: WebSocket, chat: Chat, identity: CookieIdentity) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%err, "unserializable event");
                    continue;
                }
            };
            if sender.send(Frame::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let roster = chat.roster.clone();
    let mut roster_feed = None;

    let feed_tx = tx.clone();
    let mut chat_session = ChatSession::new(chat, move |event| {
        let _ = feed_tx.send(ServerEvent::from(event));
    });

    if let Err(err) = chat_session.login(&identity).await {
        debug!(%err, "websocket opened without a signed-in user");
    }
    let _ = tx.send(ServerEvent::session(chat_session.state()));
    sync_roster(&mut roster_feed, chat_session.state(), &roster, &tx);

    loop {
        tokio::select! {
            frame = receiver.next() => {
                let text = match frame {
                    Some(Ok(Frame::Text(text))) => text,
                    Some(Ok(Frame::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let event = match serde_json::from_str::<ClientCommand>(text.as_str()) {
                    Ok(command) => handle(&mut chat_session, &identity, command)
                        .await
                        .unwrap_or_else(|err| ServerEvent::Error { error: err.to_string() }),
                    Err(err) => ServerEvent::Error { error: format!("malformed command: {err}") },
                };
                if tx.send(event).is_err() {
                    break;
                }
                sync_roster(&mut roster_feed, chat_session.state(), &roster, &tx);
            }
            _ = &mut forward_task => break,
        }
    }

    chat_session.close();
    if let Some(task) = roster_feed {
        task.abort();
    }
    forward_task.abort();
}

/// Follow the roster while someone is signed in, and only then.
fn sync_roster(
    feed: &mut Option<JoinHandle<()>>,
    state: &SessionState,
    roster: &Roster,
    tx: &mpsc::UnboundedSender<ServerEvent>,
) {
    match (state.user().is_some(), feed.take()) {
        (true, Some(task)) => *feed = Some(task),
        (true, None) => *feed = Some(follow_roster(roster.clone(), tx.clone())),
        (false, Some(task)) => task.abort(),
        (false, None) => {}
    }
}

fn follow_roster(roster: Roster, tx: mpsc::UnboundedSender<ServerEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut listings = match roster.watch().await {
            Ok(listings) => listings,
            Err(err) => {
                let _ = tx.send(ServerEvent::Error { error: err.to_string() });
                return;
            }
        };
        while let Some(next) = listings.next().await {
            let event = match next {
                Ok(users) => ServerEvent::Users { users },
                Err(err) => {
                    warn!(%err, "roster feed stopped");
                    let _ = tx.send(ServerEvent::Error { error: err.to_string() });
                    return;
                }
            };
            if tx.send(event).is_err() {
                return;
            }
        }
    })
}

async fn handle(
    chat_session: &mut ChatSession,
    identity: &dyn IdentityProvider,
    command: ClientCommand,
) -> Result<ServerEvent, ChatError> {
    use ClientCommand::*;
    Ok(match command {
        Create => {
            let room = chat_session.create_room().await?;
            chat_session.join_room(&room.key).await?;
            ServerEvent::RoomCreated { room }
        }
        Join { room } => {
            let room = chat_session.join_room(&RoomKey::parse(&room)?).await?;
            ServerEvent::Joined { context: Context::Room(room.key) }
        }
        Direct { peer } => {
            chat_session.open_direct(&peer).await?;
            ServerEvent::Joined { context: chat_session.context().cloned().ok_or(ChatError::NoContext)? }
        }
        Close => {
            chat_session.close();
            ServerEvent::Closed
        }
        Send { body } => ServerEvent::Sent { message: chat_session.send(&body).await?.into() },
        Resubscribe => {
            chat_session.resubscribe().await?;
            ServerEvent::Joined { context: chat_session.context().cloned().ok_or(ChatError::NoContext)? }
        }
        Username { name } => {
            chat_session.set_username(identity, &name).await?;
            ServerEvent::session(chat_session.state())
        }
        Logout => {
            chat_session.logout(identity).await;
            ServerEvent::session(chat_session.state())
        }
    })
}
