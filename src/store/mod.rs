//! Document store port.
//!
//! Collections hold loosely structured JSON documents addressed by key. The
//! store stamps every write, hands back query results in stamp order and can
//! watch a query, yielding a fresh full snapshot each time the collection
//! changes. Schemas live with the entities that own them; the store only
//! moves `serde_json::Value`s around.

mod memory;
mod notify;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

pub type Document = Value;

/// Ordered snapshots produced by [`DocumentStore::watch`].
pub type Snapshots = BoxStream<'static, Result<Vec<StoredDocument>, StoreError>>;

/// Server-assigned write position.
///
/// `at` never goes backwards inside one collection and `seq` grows with every
/// write to the store, so comparing stamps gives write order even when two
/// writes land on the same clock tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub seq: u64,
}

impl Stamp {
    pub(crate) fn assign(now: OffsetDateTime, floor: Option<OffsetDateTime>, seq: u64) -> Self {
        let at = match floor {
            Some(floor) if floor > now => floor,
            _ => now,
        };
        Self { at, seq }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Collection(String);

impl Collection {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn users() -> Self {
        Self::new("users")
    }

    pub fn rooms() -> Self {
        Self::new("rooms")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub key: String,
    pub stamp: Stamp,
    pub body: Document,
}

/// Every document of a collection, ascending by stamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub collection: Collection,
}

impl Query {
    pub fn new(collection: Collection) -> Self {
        Self { collection }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("document store failed: {message}")]
    Backend { message: String },
    #[error("malformed document {collection}/{key}: {reason}")]
    Malformed {
        collection: String,
        key: String,
        reason: String,
    },
    #[error("document stream closed")]
    Closed,
}

impl StoreError {
    pub fn backend(message: impl fmt::Display) -> Self {
        Self::Backend {
            message: message.to_string(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::backend(err)
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or replace `collection/key`.
    async fn put(&self, collection: &Collection, key: &str, document: Document) -> Result<Stamp, StoreError>;

    /// Create `collection/key` unless it exists. `None` means the key was taken
    /// and nothing was written.
    async fn insert(&self, collection: &Collection, key: &str, document: Document) -> Result<Option<Stamp>, StoreError>;

    async fn get(&self, collection: &Collection, key: &str) -> Result<Option<StoredDocument>, StoreError>;

    /// Add a document under a store-generated key.
    async fn append(&self, collection: &Collection, document: Document) -> Result<StoredDocument, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError>;

    /// Start with the current result of `query`, then yield it again after
    /// every change to the collection, until the stream is dropped.
    async fn watch(&self, query: Query) -> Result<Snapshots, StoreError>;
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    serde_json::to_value(value).map_err(StoreError::backend)
}

pub(crate) fn decode<T: DeserializeOwned>(collection: &Collection, document: &StoredDocument) -> Result<T, StoreError> {
    serde_json::from_value(document.body.clone()).map_err(|err| StoreError::Malformed {
        collection: collection.to_string(),
        key: document.key.clone(),
        reason: err.to_string(),
    })
}

fn sort_by_stamp(documents: &mut [StoredDocument]) {
    documents.sort_by_key(|document| document.stamp);
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn stamp_never_goes_behind_the_floor() {
        let now = datetime!(2024-01-01 12:00 UTC);
        let later = datetime!(2024-01-01 12:05 UTC);

        assert_eq!(Stamp::assign(now, Some(later), 7).at, later);
        assert_eq!(Stamp::assign(later, Some(now), 8).at, later);
        assert_eq!(Stamp::assign(now, None, 9).at, now);
    }

    #[test]
    fn stamps_on_the_same_tick_order_by_seq() {
        let now = datetime!(2024-01-01 12:00 UTC);
        let first = Stamp::assign(now, None, 1);
        let second = Stamp::assign(now, Some(now), 2);
        assert!(first < second);
    }

    #[test]
    fn decode_reports_the_offending_document() {
        let collection = Collection::rooms();
        let document = StoredDocument {
            key: "abc123".to_owned(),
            stamp: Stamp::assign(OffsetDateTime::now_utc(), None, 1),
            body: serde_json::json!({ "creator": 5 }),
        };

        let err = decode::<std::collections::HashMap<String, String>>(&collection, &document).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { ref key, .. } if key == "abc123"));
    }
}
