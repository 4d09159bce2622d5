use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use super::{
    Chat, ChatError, Context, DirectPair, DisplayName, FeedEvent, Identity, IdentityProvider, Message, Room, RoomKey,
    Subscription, User, UserId,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Anonymous,
    Authenticating,
    /// Signed in, but a username has to be picked before chatting.
    NeedsProfile(User),
    Active(User),
}

impl SessionState {
    pub fn phase(&self) -> Phase {
        match self {
            SessionState::Anonymous => Phase::Anonymous,
            SessionState::Authenticating => Phase::Authenticating,
            SessionState::NeedsProfile(_) => Phase::NeedsProfile,
            SessionState::Active(_) => Phase::Active,
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            SessionState::NeedsProfile(user) | SessionState::Active(user) => Some(user),
            SessionState::Anonymous | SessionState::Authenticating => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Anonymous,
    Authenticating,
    NeedsProfile,
    Active,
}

pub type FeedSink = Arc<dyn Fn(FeedEvent) + Send + Sync>;

/// One connected client: who they are and which context they are looking at.
///
/// At most one feed subscription exists at a time. Every context switch
/// cancels the current one before the next is created.
pub struct ChatSession {
    chat: Chat,
    state: SessionState,
    sink: FeedSink,
    feed: Option<Subscription>,
}

impl ChatSession {
    pub fn new(chat: Chat, sink: impl Fn(FeedEvent) + Send + Sync + 'static) -> Self {
        Self {
            chat,
            state: SessionState::Anonymous,
            sink: Arc::new(sink),
            feed: None,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn context(&self) -> Option<&Context> {
        self.feed.as_ref().map(Subscription::context)
    }

    pub async fn login(&mut self, provider: &dyn IdentityProvider) -> Result<&SessionState, ChatError> {
        if !matches!(self.state, SessionState::Anonymous) {
            return Err(ChatError::AlreadyAuthenticated);
        }
        self.state = SessionState::Authenticating;

        let admitted = match provider.authenticate().await {
            Ok(identity) => self.admit(identity).await,
            Err(failure) => {
                info!(%failure, "login rejected");
                Err(ChatError::AuthFailed(failure))
            }
        };
        match admitted {
            Ok(state) => {
                if let Some(user) = state.user() {
                    info!(user = %user.id, phase = ?state.phase(), "signed in");
                }
                self.state = state;
                Ok(&self.state)
            }
            Err(error) => {
                self.state = SessionState::Anonymous;
                Err(error)
            }
        }
    }

    async fn admit(&self, identity: Identity) -> Result<SessionState, ChatError> {
        let user = identity.into_user();
        self.chat.roster.upsert_user(&user).await?;
        let stored = self.chat.roster.get_user(&user.id).await?.unwrap_or(user);
        Ok(match stored.display_name {
            Some(_) => SessionState::Active(stored),
            None => SessionState::NeedsProfile(stored),
        })
    }

    /// Pick or change the username. Completes sign-in for sessions that were
    /// waiting on one.
    pub async fn set_username(&mut self, provider: &dyn IdentityProvider, name: &str) -> Result<User, ChatError> {
        let name = DisplayName::parse(name)?;
        let id = match &self.state {
            SessionState::NeedsProfile(user) | SessionState::Active(user) => user.id.clone(),
            SessionState::Anonymous | SessionState::Authenticating => return Err(ChatError::Unauthenticated),
        };

        provider.set_display_name(&name).await?;
        let user = self.chat.roster.update_display_name(&id, name).await?;
        info!(user = %user.id, "username set");
        self.state = SessionState::Active(user.clone());
        Ok(user)
    }

    pub async fn logout(&mut self, provider: &dyn IdentityProvider) {
        self.close();
        provider.sign_out().await;
        if let Some(user) = self.state.user() {
            info!(user = %user.id, "signed out");
        }
        self.state = SessionState::Anonymous;
    }

    pub async fn create_room(&mut self) -> Result<Room, ChatError> {
        let creator = self.active_user()?.id.clone();
        self.chat.rooms.create_room(&creator).await
    }

    /// Switch to the room behind `key`. An unknown key leaves the session, and
    /// its current feed, untouched.
    pub async fn join_room(&mut self, key: &RoomKey) -> Result<Room, ChatError> {
        self.active_user()?;
        let room = self.chat.rooms.join_room(key).await?;
        self.switch_to(Context::Room(room.key.clone())).await?;
        Ok(room)
    }

    pub async fn open_direct(&mut self, peer: &UserId) -> Result<User, ChatError> {
        let me = self.active_user()?.id.clone();
        let peer = self
            .chat
            .roster
            .get_user(peer)
            .await?
            .ok_or_else(|| ChatError::UnknownUser(peer.clone()))?;
        self.switch_to(Context::Direct(DirectPair::new(me, peer.id.clone()))).await?;
        Ok(peer)
    }

    /// Follow the current context again, typically after a stale feed.
    pub async fn resubscribe(&mut self) -> Result<(), ChatError> {
        self.active_user()?;
        let context = self.context().cloned().ok_or(ChatError::NoContext)?;
        self.switch_to(context).await
    }

    /// Leave the current context, if any.
    pub fn close(&mut self) {
        if let Some(subscription) = self.feed.take() {
            subscription.unsubscribe();
        }
    }

    pub async fn send(&mut self, body: &str) -> Result<Message, ChatError> {
        let sender = self.active_user()?.id.clone();
        let context = self.context().cloned().ok_or(ChatError::NoContext)?;
        self.chat.log.append(&context, &sender, body).await
    }

    fn active_user(&self) -> Result<&User, ChatError> {
        match &self.state {
            SessionState::Active(user) => Ok(user),
            _ => Err(ChatError::Unauthenticated),
        }
    }

    async fn switch_to(&mut self, context: Context) -> Result<(), ChatError> {
        self.close();
        let sink = Arc::clone(&self.sink);
        let subscription = self.chat.feed.subscribe(&context, move |event| sink(event)).await?;
        self.feed = Some(subscription);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        chat::AuthFailure,
        store::MemoryStore,
        test_support::{ScriptedIdentity, assert_quiet, feed_channel, key, next_event},
    };

    use super::*;

    fn chat() -> Chat {
        Chat::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn named_users_go_straight_to_active() {
        let mut session = ChatSession::new(chat(), |_| {});
        let provider = ScriptedIdentity::signed_in("google:ada", Some("Ada"));

        let state = session.login(&provider).await.unwrap();

        assert_eq!(state.phase(), Phase::Active);
    }

    #[tokio::test]
    async fn nameless_users_must_pick_a_username() {
        let mut session = ChatSession::new(chat(), |_| {});
        let provider = ScriptedIdentity::signed_in("github:42", None);

        assert_eq!(session.login(&provider).await.unwrap().phase(), Phase::NeedsProfile);
        assert_eq!(session.set_username(&provider, "").await, Err(ChatError::EmptyUsername));
        assert_eq!(session.state().phase(), Phase::NeedsProfile);
        assert!(provider.names().is_empty());

        let user = session.set_username(&provider, "Ada").await.unwrap();
        assert_eq!(user.display_name.as_ref().map(DisplayName::as_str), Some("Ada"));
        assert_eq!(session.state().phase(), Phase::Active);
        assert_eq!(provider.names(), ["Ada"]);
    }

    #[tokio::test]
    async fn a_stored_username_wins_over_the_provider_profile() {
        let chat = chat();
        let nameless = ScriptedIdentity::signed_in("github:42", None);
        let mut first = ChatSession::new(chat.clone(), |_| {});
        first.login(&nameless).await.unwrap();
        first.set_username(&nameless, "Ada").await.unwrap();

        let mut second = ChatSession::new(chat, |_| {});
        let state = second.login(&nameless).await.unwrap();

        assert_eq!(state.phase(), Phase::Active);
    }

    #[tokio::test]
    async fn failed_logins_stay_anonymous() {
        let mut session = ChatSession::new(chat(), |_| {});
        let provider = ScriptedIdentity::failing(AuthFailure::Cancelled);

        let err = session.login(&provider).await.unwrap_err();

        assert_eq!(err, ChatError::AuthFailed(AuthFailure::Cancelled));
        assert_eq!(session.state(), &SessionState::Anonymous);
    }

    #[tokio::test]
    async fn logging_in_twice_is_refused() {
        let mut session = ChatSession::new(chat(), |_| {});
        let provider = ScriptedIdentity::signed_in("google:ada", Some("Ada"));
        session.login(&provider).await.unwrap();

        assert_eq!(session.login(&provider).await.unwrap_err(), ChatError::AlreadyAuthenticated);
        assert_eq!(session.state().phase(), Phase::Active);
    }

    #[tokio::test]
    async fn anonymous_sessions_cannot_chat() {
        let mut session = ChatSession::new(chat(), |_| {});

        assert_eq!(session.create_room().await.unwrap_err(), ChatError::Unauthenticated);
        assert_eq!(session.join_room(&key("a1b2c3")).await.unwrap_err(), ChatError::Unauthenticated);
        assert_eq!(session.send("hi").await.unwrap_err(), ChatError::Unauthenticated);
        assert_eq!(
            session.set_username(&ScriptedIdentity::failing(AuthFailure::Cancelled), "Ada").await,
            Err(ChatError::Unauthenticated)
        );
    }

    #[tokio::test]
    async fn sending_needs_a_context() {
        let mut session = ChatSession::new(chat(), |_| {});
        session.login(&ScriptedIdentity::signed_in("google:ada", Some("Ada"))).await.unwrap();

        assert_eq!(session.send("hi").await.unwrap_err(), ChatError::NoContext);
    }

    #[tokio::test]
    async fn joining_an_unknown_room_keeps_the_current_feed() {
        let chat = chat();
        let (sink, mut events) = feed_channel();
        let mut session = ChatSession::new(chat.clone(), sink);
        session.login(&ScriptedIdentity::signed_in("google:ada", Some("Ada"))).await.unwrap();
        let room = session.create_room().await.unwrap();
        session.join_room(&room.key).await.unwrap();
        next_event(&mut events).await;

        let err = session.join_room(&key("zzzzzz")).await.unwrap_err();

        assert_eq!(err, ChatError::RoomNotFound(key("zzzzzz")));
        assert_eq!(session.context(), Some(&Context::Room(room.key.clone())));
        assert_eq!(chat.feed.active_subscriptions(), 1);
        session.send("still here").await.unwrap();
        assert_eq!(next_event(&mut events).await.context(), &Context::Room(room.key));
    }

    #[tokio::test]
    async fn a_failed_first_join_creates_no_subscription() {
        let chat = chat();
        let (sink, mut events) = feed_channel();
        let mut session = ChatSession::new(chat.clone(), sink);
        session.login(&ScriptedIdentity::signed_in("google:ada", Some("Ada"))).await.unwrap();

        session.join_room(&key("zzzzzz")).await.unwrap_err();

        assert_eq!(session.context(), None);
        assert_eq!(chat.feed.active_subscriptions(), 0);
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn switching_rooms_cancels_the_old_feed_first() {
        let chat = chat();
        let (sink, mut events) = feed_channel();
        let mut session = ChatSession::new(chat.clone(), sink);
        session.login(&ScriptedIdentity::signed_in("google:ada", Some("Ada"))).await.unwrap();
        let first = session.create_room().await.unwrap();
        let second = session.create_room().await.unwrap();

        session.join_room(&first.key).await.unwrap();
        next_event(&mut events).await;
        session.join_room(&second.key).await.unwrap();
        assert_eq!(next_event(&mut events).await.context(), &Context::Room(second.key.clone()));
        assert_eq!(chat.feed.active_subscriptions(), 1);

        chat.log
            .append(&Context::Room(first.key), &UserId::new("google:ada"), "to the old room")
            .await
            .unwrap();
        assert_quiet(&mut events).await;
    }

    #[tokio::test]
    async fn direct_conversations_need_a_known_peer() {
        let mut session = ChatSession::new(chat(), |_| {});
        session.login(&ScriptedIdentity::signed_in("google:ada", Some("Ada"))).await.unwrap();

        let err = session.open_direct(&UserId::new("google:ghost")).await.unwrap_err();

        assert_eq!(err, ChatError::UnknownUser(UserId::new("google:ghost")));
        assert_eq!(session.context(), None);
    }

    #[tokio::test]
    async fn logout_tears_the_feed_down() {
        let chat = chat();
        let (sink, mut events) = feed_channel();
        let mut session = ChatSession::new(chat.clone(), sink);
        let provider = ScriptedIdentity::signed_in("google:ada", Some("Ada"));
        session.login(&provider).await.unwrap();
        let room = session.create_room().await.unwrap();
        session.join_room(&room.key).await.unwrap();
        next_event(&mut events).await;

        session.logout(&provider).await;

        assert_eq!(session.state(), &SessionState::Anonymous);
        assert_eq!(session.context(), None);
        assert_eq!(chat.feed.active_subscriptions(), 0);
        assert_eq!(provider.sign_outs(), 1);
    }
}
