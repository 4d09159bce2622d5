//! Fakes shared by unit tests and the integration suites under `tests/`.
//!
//! Compiled for `cfg(test)` and behind the `test-support` feature.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};

use crate::{
    chat::{AuthFailure, DisplayName, FeedEvent, Identity, IdentityProvider, KeySource, RoomKey, User, UserId},
    lock,
    store::{Collection, Document, DocumentStore, MemoryStore, Query, Snapshots, Stamp, StoreError, StoredDocument},
};

/// How long [`next_event`] waits, and how long [`assert_quiet`] listens.
const PATIENCE: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(100);

pub fn user(id: &str, display_name: Option<&str>) -> User {
    User {
        id: UserId::new(id),
        display_name: display_name.map(|name| DisplayName::parse(name).expect("valid display name")),
        avatar_url: Some(format!("https://avatars.example/{id}.png")),
        email: None,
    }
}

pub fn key(raw: &str) -> RoomKey {
    RoomKey::parse(raw).expect("valid room key")
}

/// Identity provider with a fixed answer.
pub struct ScriptedIdentity {
    outcome: Result<Identity, AuthFailure>,
    names: Mutex<Vec<String>>,
    sign_outs: AtomicUsize,
}

impl ScriptedIdentity {
    pub fn signed_in(id: &str, display_name: Option<&str>) -> Self {
        Self::with_outcome(Ok(Identity {
            user_id: UserId::new(id),
            display_name: display_name.map(str::to_owned),
            avatar_url: Some(format!("https://avatars.example/{id}.png")),
            email: Some(format!("{id}@example.com")),
        }))
    }

    pub fn failing(failure: AuthFailure) -> Self {
        Self::with_outcome(Err(failure))
    }

    fn with_outcome(outcome: Result<Identity, AuthFailure>) -> Self {
        Self {
            outcome,
            names: Mutex::new(Vec::new()),
            sign_outs: AtomicUsize::new(0),
        }
    }

    /// Names passed to `set_display_name`, in order.
    pub fn names(&self) -> Vec<String> {
        lock(&self.names).clone()
    }

    pub fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for ScriptedIdentity {
    async fn authenticate(&self) -> Result<Identity, AuthFailure> {
        self.outcome.clone()
    }

    async fn set_display_name(&self, name: &DisplayName) -> Result<(), AuthFailure> {
        lock(&self.names).push(name.as_str().to_owned());
        Ok(())
    }

    async fn sign_out(&self) {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the given keys in order, then random ones.
pub struct FixedKeys {
    keys: Mutex<VecDeque<RoomKey>>,
}

impl FixedKeys {
    pub fn new<'a>(keys: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            keys: Mutex::new(keys.into_iter().map(key).collect()),
        }
    }
}

impl KeySource for FixedKeys {
    fn next_key(&self) -> RoomKey {
        lock(&self.keys)
            .pop_front()
            .unwrap_or_else(|| RoomKey::random(&mut rand::rng()))
    }
}

/// A feed sink that forwards into a channel the test can read.
pub fn feed_channel() -> (impl Fn(FeedEvent) + Send + Sync + 'static, mpsc::UnboundedReceiver<FeedEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |event| {
            let _ = tx.send(event);
        },
        rx,
    )
}

pub async fn next_event(events: &mut mpsc::UnboundedReceiver<FeedEvent>) -> FeedEvent {
    tokio::time::timeout(PATIENCE, events.recv())
        .await
        .expect("feed event in time")
        .expect("feed channel open")
}

pub async fn assert_quiet(events: &mut mpsc::UnboundedReceiver<FeedEvent>) {
    if let Ok(Some(event)) = tokio::time::timeout(QUIET, events.recv()).await {
        panic!("expected no feed events, got {event:?}");
    }
}

/// Memory store whose writes can be made to fail and whose watch streams can
/// be cut on demand.
pub struct FlakyStore {
    inner: MemoryStore,
    fail_writes: AtomicBool,
    cut: watch::Sender<bool>,
}

impl Default for FlakyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            fail_writes: AtomicBool::new(false),
            cut: watch::channel(false).0,
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// End every open watch stream, and every one opened until [`Self::heal`].
    pub fn cut_watches(&self) {
        self.cut.send_replace(true);
    }

    pub fn heal(&self) {
        self.cut.send_replace(false);
    }

    fn check_write(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::backend("write refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn put(&self, collection: &Collection, key: &str, document: Document) -> Result<Stamp, StoreError> {
        self.check_write()?;
        self.inner.put(collection, key, document).await
    }

    async fn insert(&self, collection: &Collection, key: &str, document: Document) -> Result<Option<Stamp>, StoreError> {
        self.check_write()?;
        self.inner.insert(collection, key, document).await
    }

    async fn get(&self, collection: &Collection, key: &str) -> Result<Option<StoredDocument>, StoreError> {
        self.inner.get(collection, key).await
    }

    async fn append(&self, collection: &Collection, document: Document) -> Result<StoredDocument, StoreError> {
        self.check_write()?;
        self.inner.append(collection, document).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<StoredDocument>, StoreError> {
        self.inner.query(query).await
    }

    async fn watch(&self, query: Query) -> Result<Snapshots, StoreError> {
        let snapshots = self.inner.watch(query).await?;
        let mut cut = self.cut.subscribe();
        Ok(snapshots
            .take_until(async move {
                let _ = cut.wait_for(|cut| *cut).await;
            })
            .boxed())
    }
}
