//! Rooms, direct conversations and the live feeds that follow them.
//!
//! Everything here talks to the outside world through two ports: a
//! [`DocumentStore`] for persistence and change notification, and an
//! [`IdentityProvider`] for sign-in.

mod error;
mod feed;
mod identity;
mod messages;
mod model;
mod rooms;
mod roster;
mod session;

use std::sync::Arc;

pub use error::ChatError;
pub use feed::{FeedEvent, LiveFeed, Subscription};
pub use identity::{AuthFailure, Identity, IdentityProvider};
pub use messages::MessageLog;
pub use model::{Context, DirectPair, DisplayName, Message, Room, RoomKey, Sender, User, UserId};
pub use rooms::{KeySource, RandomKeys, RoomRegistry};
pub use roster::Roster;
pub use session::{ChatSession, FeedSink, Phase, SessionState};

pub(crate) use model::{MessageDoc, RoomDoc, UserDoc};

use crate::store::DocumentStore;

/// The shared services every session works against.
#[derive(Clone)]
pub struct Chat {
    pub rooms: RoomRegistry,
    pub log: MessageLog,
    pub roster: Roster,
    pub feed: LiveFeed,
}

impl Chat {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_keys(store, Arc::new(RandomKeys))
    }

    pub fn with_keys(store: Arc<dyn DocumentStore>, keys: Arc<dyn KeySource>) -> Self {
        let roster = Roster::new(Arc::clone(&store));
        Self {
            rooms: RoomRegistry::with_keys(Arc::clone(&store), keys),
            log: MessageLog::new(Arc::clone(&store), roster.clone()),
            roster,
            feed: LiveFeed::new(store),
        }
    }
}
