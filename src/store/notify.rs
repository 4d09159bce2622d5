use std::{collections::HashMap, sync::Mutex};

use futures_util::{StreamExt, stream};
use tokio::sync::watch;

use crate::lock;

use super::{DocumentStore, Query, Snapshots};

/// Per-collection change counters that watch streams wait on.
#[derive(Debug, Default)]
pub(crate) struct ChangeNotifier {
    channels: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl ChangeNotifier {
    pub(crate) fn subscribe(&self, collection: &str) -> watch::Receiver<u64> {
        let mut channels = lock(&self.channels);
        channels.retain(|_, sender| sender.receiver_count() > 0);
        channels
            .entry(collection.to_owned())
            .or_insert_with(|| watch::channel(0).0)
            .subscribe()
    }

    pub(crate) fn notify(&self, collection: &str) {
        let mut channels = lock(&self.channels);
        let Some(sender) = channels.get(collection) else {
            return;
        };
        if sender.receiver_count() == 0 {
            channels.remove(collection);
            return;
        }
        sender.send_modify(|version| *version += 1);
    }
}

/// Re-run `query` against `store` once up front and again whenever `changes`
/// ticks. Changes that land while a query runs collapse into one extra pass.
pub(crate) fn snapshots<S>(store: S, query: Query, mut changes: watch::Receiver<u64>) -> Snapshots
where
    S: DocumentStore + 'static,
{
    changes.mark_unchanged();
    stream::unfold(
        (store, query, changes, true),
        |(store, query, mut changes, first)| async move {
            if !first && changes.changed().await.is_err() {
                return None;
            }
            let snapshot = store.query(&query).await;
            Some((snapshot, (store, query, changes, false)))
        },
    )
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abandoned_channels_are_dropped_on_subscribe() {
        let notifier = ChangeNotifier::default();
        for n in 0..8 {
            drop(notifier.subscribe(&format!("rooms/r{n}/messages")));
        }
        let live = notifier.subscribe("users");
        assert_eq!(lock(&notifier.channels).len(), 1);

        notifier.notify("users");
        assert!(live.has_changed().unwrap());
    }

    #[test]
    fn watched_collections_share_one_channel() {
        let notifier = ChangeNotifier::default();
        let first = notifier.subscribe("users");
        let _second = notifier.subscribe("users");
        assert_eq!(lock(&notifier.channels).len(), 1);
        drop(first);

        notifier.notify("users");
        assert_eq!(lock(&notifier.channels).len(), 1);
    }
}
