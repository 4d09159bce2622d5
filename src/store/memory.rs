use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::lock;

use super::{
    Collection, Document, DocumentStore, Query, Snapshots, Stamp, StoreError, StoredDocument, notify::ChangeNotifier,
    sort_by_stamp,
};

/// Process-local document store. Everything is lost when the last clone drops.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    changes: ChangeNotifier,
}

#[derive(Default)]
struct State {
    collections: HashMap<Collection, BTreeMap<String, StoredDocument>>,
    latest: HashMap<Collection, OffsetDateTime>,
    seq: u64,
}

impl State {
    fn stamp(&mut self, collection: &Collection) -> Stamp {
        self.seq += 1;
        let stamp = Stamp::assign(OffsetDateTime::now_utc(), self.latest.get(collection).copied(), self.seq);
        self.latest.insert(collection.clone(), stamp.at);
        stamp
    }

    fn write(&mut self, collection: &Collection, key: &str, body: Document) -> StoredDocument {
        let stored = StoredDocument {
            key: key.to_owned(),
            stamp: self.stamp(collection),
            body,
        };
        self.collections
            .entry(collection.clone())
            .or_default()
            .insert(key.to_owned(), stored.clone());
        stored
    }

    fn contains(&self, collection: &Collection, key: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|documents| documents.contains_key(key))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn changed(&self, collection: &Collection) {
        self.inner.changes.notify(collection.as_str());
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn put(&self, collection: &Collection, key: &str, document: Document) -> Result<Stamp, StoreError> {
        let stamp = lock(&self.inner.state).write(collection, key, document).stamp;
        debug!(%collection, key, seq = stamp.seq, "put");
        self.changed(collection);
        Ok(stamp)
    }

    async fn insert(&self, collection: &Collection, key: &str, document: Document) -> Result<Option<Stamp>, StoreError> {
        let stamp = {
            let mut state = lock(&self.inner.state);
            if state.contains(collection, key) {
                None
            } else {
                Some(state.write(collection, key, document).stamp)
            }
        };
        if stamp.is_some() {
            debug!(%collection, key, "insert");
            self.changed(collection);
        }
        Ok(stamp)
    }

    async fn get(&self, collection: &Collection, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        Ok(lock(&self.inner.state)
            .collections
            .get(collection)
            .and_then(|documents| documents.get(key))
            .cloned())
    }

    async fn append(&self, collection: &Collection, document: Document) -> Result<StoredDocument, StoreError> {
        let key = Uuid::now_v7().simple().to_string();
        let stored = lock(&self.inner.state).write(collection, &key, document);
        debug!(%collection, key = %stored.key, seq = stored.stamp.seq, "append");
        self.changed(collection);
        Ok(stored)
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        let mut documents: Vec<_> = lock(&self.inner.state)
            .collections
            .get(&query.collection)
            .map(|documents| documents.values().cloned().collect())
            .unwrap_or_default();
        sort_by_stamp(&mut documents);
        Ok(documents)
    }

    async fn watch(&self, query: Query) -> Result<Snapshots, StoreError> {
        let changes = self.inner.changes.subscribe(query.collection.as_str());
        Ok(super::notify::snapshots(self.clone(), query, changes))
    }
}
