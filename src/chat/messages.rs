use std::sync::Arc;

use tracing::debug;

use crate::store::{Collection, DocumentStore, Query, StoreError, StoredDocument, decode, encode};

use super::{ChatError, Context, Message, MessageDoc, Roster, Sender, UserId};

/// Append-only message history, one ordered log per context.
#[derive(Clone)]
pub struct MessageLog {
    store: Arc<dyn DocumentStore>,
    roster: Roster,
}

impl MessageLog {
    pub fn new(store: Arc<dyn DocumentStore>, roster: Roster) -> Self {
        Self { store, roster }
    }

    /// Store `body` from `sender` in `context`. The sender must be a known user
    /// who has picked a display name, and a participant when `context` is a
    /// direct conversation.
    pub async fn append(&self, context: &Context, sender: &UserId, body: &str) -> Result<Message, ChatError> {
        if body.trim().is_empty() {
            return Err(ChatError::EmptyBody);
        }
        if matches!(context, Context::Direct(pair) if !pair.contains(sender)) {
            return Err(ChatError::Unauthenticated);
        }

        let Some(user) = self.roster.get_user(sender).await? else {
            return Err(ChatError::Unauthenticated);
        };
        let Some(display_name) = user.display_name else {
            return Err(ChatError::Unauthenticated);
        };

        let doc = MessageDoc {
            context: context.clone(),
            sender: Sender {
                id: user.id,
                display_name,
                avatar_url: user.avatar_url,
            },
            body: body.to_owned(),
        };
        let stored = self
            .store
            .append(&context.messages(), encode(&doc).map_err(ChatError::WriteFailed)?)
            .await
            .map_err(ChatError::WriteFailed)?;
        debug!(%context, message = %stored.key, seq = stored.stamp.seq, "message stored");

        Ok(Message {
            id: stored.key,
            context: doc.context,
            sender: doc.sender,
            body: doc.body,
            sent_at: stored.stamp,
        })
    }

    pub async fn read_ordered(&self, context: &Context) -> Result<Vec<Message>, ChatError> {
        let query = Query::new(context.messages());
        let documents = self.store.query(&query).await.map_err(ChatError::Store)?;
        decode_messages(&query.collection, &documents).map_err(ChatError::Store)
    }
}

pub(crate) fn decode_messages(collection: &Collection, documents: &[StoredDocument]) -> Result<Vec<Message>, StoreError> {
    documents
        .iter()
        .map(|stored| {
            let doc: MessageDoc = decode(collection, stored)?;
            Ok(Message {
                id: stored.key.clone(),
                context: doc.context,
                sender: doc.sender,
                body: doc.body,
                sent_at: stored.stamp,
            })
        })
        .collect()
}
