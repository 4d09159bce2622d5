use std::sync::Arc;

use tracing::{debug, info};

use crate::store::{Collection, DocumentStore, StoreError, decode, encode};

use super::{ChatError, Room, RoomDoc, RoomKey, UserId};

/// Consecutive key collisions tolerated before `create_room` gives up.
const MAX_KEY_ATTEMPTS: usize = 16;

pub trait KeySource: Send + Sync {
    fn next_key(&self) -> RoomKey;
}

pub struct RandomKeys;

impl KeySource for RandomKeys {
    fn next_key(&self) -> RoomKey {
        RoomKey::random(&mut rand::rng())
    }
}

#[derive(Clone)]
pub struct RoomRegistry {
    store: Arc<dyn DocumentStore>,
    keys: Arc<dyn KeySource>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self::with_keys(store, Arc::new(RandomKeys))
    }

    pub fn with_keys(store: Arc<dyn DocumentStore>, keys: Arc<dyn KeySource>) -> Self {
        Self { store, keys }
    }

    pub async fn create_room(&self, creator: &UserId) -> Result<Room, ChatError> {
        let rooms = Collection::rooms();
        let document = encode(&RoomDoc { creator: creator.clone() }).map_err(ChatError::WriteFailed)?;

        for attempt in 1..=MAX_KEY_ATTEMPTS {
            let key = self.keys.next_key();
            let inserted = self
                .store
                .insert(&rooms, key.as_str(), document.clone())
                .await
                .map_err(ChatError::WriteFailed)?;
            match inserted {
                Some(created_at) => {
                    info!(room = %key, %creator, "room created");
                    return Ok(Room {
                        key,
                        creator: creator.clone(),
                        created_at,
                    });
                }
                None => debug!(room = %key, attempt, "room key taken"),
            }
        }

        Err(ChatError::WriteFailed(StoreError::backend(format!(
            "no free room key after {MAX_KEY_ATTEMPTS} attempts"
        ))))
    }

    pub async fn get_room(&self, key: &RoomKey) -> Result<Room, ChatError> {
        let rooms = Collection::rooms();
        let Some(stored) = self.store.get(&rooms, key.as_str()).await.map_err(ChatError::Store)? else {
            return Err(ChatError::RoomNotFound(key.clone()));
        };
        let doc: RoomDoc = decode(&rooms, &stored).map_err(ChatError::Store)?;
        Ok(Room {
            key: key.clone(),
            creator: doc.creator,
            created_at: stored.stamp,
        })
    }

    /// Look the room up for joining. Nothing is recorded about the joiner.
    pub async fn join_room(&self, key: &RoomKey) -> Result<Room, ChatError> {
        let room = self.get_room(key).await?;
        debug!(room = %key, "join");
        Ok(room)
    }
}
