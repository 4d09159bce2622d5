use std::sync::Arc;

use futures_util::{StreamExt, stream::BoxStream};
use tracing::{debug, info};

use crate::store::{Collection, DocumentStore, Query, StoredDocument, StoreError, decode, encode};

use super::{ChatError, DisplayName, User, UserDoc, UserId};

/// Everyone who has ever signed in, for DM addressing.
#[derive(Clone)]
pub struct Roster {
    store: Arc<dyn DocumentStore>,
}

impl Roster {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Insert `user` unless the id is already known. Existing records are left
    /// exactly as they are; returns whether anything was written.
    pub async fn upsert_user(&self, user: &User) -> Result<bool, ChatError> {
        let document = encode(&UserDoc::from_user(user)).map_err(ChatError::WriteFailed)?;
        let inserted = self
            .store
            .insert(&Collection::users(), user.id.as_str(), document)
            .await
            .map_err(ChatError::WriteFailed)?
            .is_some();
        if inserted {
            info!(user = %user.id, "new user");
        }
        Ok(inserted)
    }

    pub async fn get_user(&self, id: &UserId) -> Result<Option<User>, ChatError> {
        let users = Collection::users();
        let Some(stored) = self.store.get(&users, id.as_str()).await.map_err(ChatError::Store)? else {
            return Ok(None);
        };
        let doc: UserDoc = decode(&users, &stored).map_err(ChatError::Store)?;
        Ok(Some(doc.into_user(id.clone())))
    }

    pub async fn update_display_name(&self, id: &UserId, name: DisplayName) -> Result<User, ChatError> {
        let mut user = self.get_user(id).await?.ok_or_else(|| ChatError::UnknownUser(id.clone()))?;
        user.display_name = Some(name);

        let document = encode(&UserDoc::from_user(&user)).map_err(ChatError::WriteFailed)?;
        self.store
            .put(&Collection::users(), id.as_str(), document)
            .await
            .map_err(ChatError::WriteFailed)?;
        debug!(user = %id, "display name updated");
        Ok(user)
    }

    /// All users by display name; users still choosing a name come first.
    pub async fn list_users(&self) -> Result<Vec<User>, ChatError> {
        let query = Query::new(Collection::users());
        let documents = self.store.query(&query).await.map_err(ChatError::Store)?;
        sorted_users(&query.collection, &documents).map_err(ChatError::Store)
    }

    /// The listing of [`Self::list_users`], again after every sign-up or
    /// rename. Nothing useful follows an error.
    pub async fn watch(&self) -> Result<BoxStream<'static, Result<Vec<User>, ChatError>>, ChatError> {
        let query = Query::new(Collection::users());
        let snapshots = self
            .store
            .watch(query.clone())
            .await
            .map_err(ChatError::SubscriptionError)?;
        let collection = query.collection;
        Ok(snapshots
            .map(move |next| {
                next.and_then(|documents| sorted_users(&collection, &documents))
                    .map_err(ChatError::SubscriptionError)
            })
            .boxed())
    }
}

fn sorted_users(collection: &Collection, documents: &[StoredDocument]) -> Result<Vec<User>, StoreError> {
    let mut users = documents
        .iter()
        .map(|stored| decode::<UserDoc>(collection, stored).map(|doc| doc.into_user(UserId::new(stored.key.clone()))))
        .collect::<Result<Vec<_>, _>>()?;
    users.sort_by(|a, b| a.display_name.cmp(&b.display_name).then_with(|| a.id.cmp(&b.id)));
    Ok(users)
}
