//! Live message feeds.
//!
//! A subscription owns a task that follows the store's watch stream for one
//! context and hands every snapshot, complete and in order, to a callback.
//! Cancelling takes the callback out from under the task, so once
//! [`Subscription::unsubscribe`] returns nothing more is delivered, even if the
//! store still has a snapshot in flight.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{
    lock,
    store::{DocumentStore, Query, StoreError},
};

use super::{ChatError, Context, Message, messages::decode_messages};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    /// Every message of `context`, oldest first.
    Snapshot { context: Context, messages: Vec<Message> },
    /// The feed stopped; nothing more arrives until the session resubscribes.
    Stale { context: Context, error: ChatError },
}

impl FeedEvent {
    pub fn context(&self) -> &Context {
        match self {
            FeedEvent::Snapshot { context, .. } | FeedEvent::Stale { context, .. } => context,
        }
    }
}

type Callback = Box<dyn FnMut(FeedEvent) + Send>;
type Slot = Arc<Mutex<Option<Callback>>>;

#[derive(Clone)]
pub struct LiveFeed {
    store: Arc<dyn DocumentStore>,
    active: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

impl LiveFeed {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            active: Arc::new(AtomicUsize::new(0)),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Follow `context`. The first snapshot reflects the log as it is now.
    ///
    /// `on_update` runs on a runtime worker while the subscription's lock is
    /// held; it must not call back into the same subscription.
    pub async fn subscribe<F>(&self, context: &Context, on_update: F) -> Result<Subscription, ChatError>
    where
        F: FnMut(FeedEvent) + Send + 'static,
    {
        let query = Query::new(context.messages());
        let mut snapshots = self
            .store
            .watch(query.clone())
            .await
            .map_err(ChatError::SubscriptionError)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot: Slot = Arc::new(Mutex::new(Some(Box::new(on_update))));
        self.active.fetch_add(1, Ordering::SeqCst);

        let task = tokio::spawn({
            let slot = Arc::clone(&slot);
            let context = context.clone();
            async move {
                while let Some(next) = snapshots.next().await {
                    let event = match next.and_then(|documents| decode_messages(&query.collection, &documents)) {
                        Ok(messages) => FeedEvent::Snapshot {
                            context: context.clone(),
                            messages,
                        },
                        Err(error) => {
                            warn!(subscription = id, %context, %error, "feed went stale");
                            FeedEvent::Stale {
                                context: context.clone(),
                                error: ChatError::SubscriptionError(error),
                            }
                        }
                    };
                    let stale = matches!(event, FeedEvent::Stale { .. });
                    if !deliver(&slot, event) || stale {
                        return;
                    }
                }

                warn!(subscription = id, %context, "feed stream ended");
                deliver(
                    &slot,
                    FeedEvent::Stale {
                        context,
                        error: ChatError::SubscriptionError(StoreError::Closed),
                    },
                );
            }
        });
        debug!(subscription = id, %context, "subscribed");

        Ok(Subscription {
            id,
            context: context.clone(),
            slot,
            task,
            active: Arc::clone(&self.active),
        })
    }

    pub fn active_subscriptions(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Returns false once the subscription has been cancelled.
fn deliver(slot: &Slot, event: FeedEvent) -> bool {
    match lock(slot).as_mut() {
        Some(callback) => {
            callback(event);
            true
        }
        None => false,
    }
}

/// Handle for one live feed. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    context: Context,
    slot: Slot,
    task: JoinHandle<()>,
    active: Arc<AtomicUsize>,
}

impl Subscription {
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Stop delivery. Safe to call any number of times; only the first call
    /// returns true.
    pub fn unsubscribe(&self) -> bool {
        let callback = lock(&self.slot).take();
        self.task.abort();
        if callback.is_none() {
            return false;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        debug!(subscription = self.id, context = %self.context, "unsubscribed");
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
