use std::{sync::Arc, time::Duration};

use futures_util::StreamExt;
use rstest::rstest;
use tokio::sync::mpsc::UnboundedReceiver;

use superchat::{
    chat::{Chat, ChatError, ChatSession, Context, FeedEvent, Message, Phase, UserId},
    store::{DocumentStore, MemoryStore, SqliteStore, StoreError},
    test_support::{FixedKeys, FlakyStore, ScriptedIdentity, assert_quiet, feed_channel, key, next_event},
};

async fn store(backend: &str) -> Arc<dyn DocumentStore> {
    match backend {
        "sqlite" => Arc::new(SqliteStore::connect("sqlite::memory:").await.unwrap()),
        _ => Arc::new(MemoryStore::new()),
    }
}

async fn signed_in(chat: &Chat, identity: &ScriptedIdentity) -> (ChatSession, UnboundedReceiver<FeedEvent>) {
    let (sink, events) = feed_channel();
    let mut session = ChatSession::new(chat.clone(), sink);
    session.login(identity).await.unwrap();
    (session, events)
}

/// Waits for a snapshot holding `count` messages, skipping older ones.
async fn snapshot_of(events: &mut UnboundedReceiver<FeedEvent>, count: usize) -> (Context, Vec<Message>) {
    loop {
        match next_event(events).await {
            FeedEvent::Snapshot { context, messages } if messages.len() == count => return (context, messages),
            FeedEvent::Snapshot { .. } => continue,
            stale => panic!("expected a snapshot, got {stale:?}"),
        }
    }
}

fn bodies(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|message| message.body.as_str()).collect()
}

#[rstest]
#[case::memory("memory")]
#[case::sqlite("sqlite")]
#[tokio::test]
async fn room_members_see_each_others_messages(#[case] backend: &str) {
    let chat = Chat::with_keys(store(backend).await, Arc::new(FixedKeys::new(["a1b2c3"])));
    let ada_id = ScriptedIdentity::signed_in("github:1", Some("Ada"));
    let bob_id = ScriptedIdentity::signed_in("google:2", Some("Bob"));
    let (mut ada, _ada_events) = signed_in(&chat, &ada_id).await;
    let (mut bob, mut bob_events) = signed_in(&chat, &bob_id).await;

    let room = ada.create_room().await.unwrap();
    assert_eq!(room.key, key("a1b2c3"));
    assert_eq!(room.creator, UserId::new("github:1"));
    ada.join_room(&room.key).await.unwrap();

    bob.join_room(&key("A1B2C3")).await.unwrap();
    let (_, messages) = snapshot_of(&mut bob_events, 0).await;
    assert!(messages.is_empty());

    ada.send("hi").await.unwrap();
    let (context, messages) = snapshot_of(&mut bob_events, 1).await;
    assert_eq!(context, Context::Room(key("a1b2c3")));
    assert_eq!(bodies(&messages), ["hi"]);
    assert_eq!(messages[0].sender.id, UserId::new("github:1"));
    assert_eq!(messages[0].sender.display_name.as_str(), "Ada");

    bob.send("hello").await.unwrap();
    ada.send("how are you").await.unwrap();
    let (_, messages) = snapshot_of(&mut bob_events, 3).await;
    assert_eq!(bodies(&messages), ["hi", "hello", "how are you"]);
    assert!(messages.windows(2).all(|pair| pair[0].sent_at < pair[1].sent_at));
}

#[rstest]
#[case::empty("")]
#[case::blank("   ")]
#[tokio::test]
async fn first_login_waits_for_a_username(#[case] blank: &str) {
    let chat = Chat::new(Arc::new(MemoryStore::new()));
    let identity = ScriptedIdentity::signed_in("github:7", None);
    let (mut session, _events) = signed_in(&chat, &identity).await;
    assert_eq!(session.state().phase(), Phase::NeedsProfile);

    assert_eq!(session.create_room().await.unwrap_err(), ChatError::Unauthenticated);
    assert_eq!(session.set_username(&identity, blank).await.unwrap_err(), ChatError::EmptyUsername);
    assert_eq!(session.state().phase(), Phase::NeedsProfile);

    let user = session.set_username(&identity, "Ada").await.unwrap();
    assert_eq!(session.state().phase(), Phase::Active);
    assert_eq!(identity.names(), ["Ada"]);

    let stored = chat.roster.get_user(&user.id).await.unwrap().unwrap();
    assert_eq!(stored.display_name.unwrap().as_str(), "Ada");
}

#[tokio::test]
async fn returning_users_keep_their_username() {
    let chat = Chat::new(Arc::new(MemoryStore::new()));
    let first = ScriptedIdentity::signed_in("github:7", None);
    let (mut session, _events) = signed_in(&chat, &first).await;
    session.set_username(&first, "Ada").await.unwrap();
    session.logout(&first).await;

    let again = ScriptedIdentity::signed_in("github:7", None);
    let (session, _events) = signed_in(&chat, &again).await;
    assert_eq!(session.state().phase(), Phase::Active);
    assert_eq!(chat.roster.list_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn logout_silences_the_feed() {
    let chat = Chat::with_keys(Arc::new(MemoryStore::new()), Arc::new(FixedKeys::new(["room01"])));
    let ada_id = ScriptedIdentity::signed_in("github:1", Some("Ada"));
    let bob_id = ScriptedIdentity::signed_in("google:2", Some("Bob"));
    let (mut ada, mut ada_events) = signed_in(&chat, &ada_id).await;
    let (mut bob, _bob_events) = signed_in(&chat, &bob_id).await;

    let room = ada.create_room().await.unwrap();
    ada.join_room(&room.key).await.unwrap();
    bob.join_room(&room.key).await.unwrap();
    snapshot_of(&mut ada_events, 0).await;
    assert_eq!(chat.feed.active_subscriptions(), 2);

    ada.logout(&ada_id).await;
    assert_eq!(ada_id.sign_outs(), 1);
    assert_eq!(ada.state().phase(), Phase::Anonymous);
    assert_eq!(ada.context(), None);
    assert_eq!(chat.feed.active_subscriptions(), 1);

    bob.send("anyone?").await.unwrap();
    assert_quiet(&mut ada_events).await;
    assert_eq!(ada.send("still here").await.unwrap_err(), ChatError::Unauthenticated);
}

#[tokio::test]
async fn switching_rooms_moves_the_feed() {
    let chat = Chat::with_keys(Arc::new(MemoryStore::new()), Arc::new(FixedKeys::new(["aaaaaa", "bbbbbb"])));
    let ada_id = ScriptedIdentity::signed_in("github:1", Some("Ada"));
    let (mut ada, mut events) = signed_in(&chat, &ada_id).await;

    let first = ada.create_room().await.unwrap();
    let second = ada.create_room().await.unwrap();
    ada.join_room(&first.key).await.unwrap();
    snapshot_of(&mut events, 0).await;

    ada.join_room(&second.key).await.unwrap();
    let (context, _) = snapshot_of(&mut events, 0).await;
    assert_eq!(context, Context::Room(second.key.clone()));
    assert_eq!(chat.feed.active_subscriptions(), 1);

    assert_eq!(
        ada.join_room(&key("zzzzzz")).await.unwrap_err(),
        ChatError::RoomNotFound(key("zzzzzz"))
    );
    assert_eq!(ada.context(), Some(&Context::Room(second.key.clone())));

    ada.send("only here").await.unwrap();
    let (context, messages) = snapshot_of(&mut events, 1).await;
    assert_eq!(context, Context::Room(second.key));
    assert_eq!(bodies(&messages), ["only here"]);
    assert!(chat.log.read_ordered(&Context::Room(first.key)).await.unwrap().is_empty());
}

#[tokio::test]
async fn direct_conversations_are_shared_by_both_ends() {
    let chat = Chat::new(Arc::new(MemoryStore::new()));
    let ada_id = ScriptedIdentity::signed_in("github:1", Some("Ada"));
    let bob_id = ScriptedIdentity::signed_in("google:2", Some("Bob"));
    let carol_id = ScriptedIdentity::signed_in("google:3", Some("Carol"));
    let (mut ada, mut ada_events) = signed_in(&chat, &ada_id).await;
    let (mut bob, mut bob_events) = signed_in(&chat, &bob_id).await;
    signed_in(&chat, &carol_id).await;

    let peer = ada.open_direct(&UserId::new("google:2")).await.unwrap();
    assert_eq!(peer.display_name.unwrap().as_str(), "Bob");
    bob.open_direct(&UserId::new("github:1")).await.unwrap();
    assert_eq!(ada.context(), bob.context());

    ada.send("hey bob").await.unwrap();
    bob.send("hey ada").await.unwrap();
    let (ada_context, ada_view) = snapshot_of(&mut ada_events, 2).await;
    let (bob_context, bob_view) = snapshot_of(&mut bob_events, 2).await;
    assert_eq!(ada_context, bob_context);
    assert_eq!(ada_view, bob_view);
    assert_eq!(bodies(&ada_view), ["hey bob", "hey ada"]);

    let outsider = chat.log.append(&ada_context, &UserId::new("google:3"), "psst").await;
    assert_eq!(outsider.unwrap_err(), ChatError::Unauthenticated);

    assert_eq!(
        ada.open_direct(&UserId::new("github:404")).await.unwrap_err(),
        ChatError::UnknownUser(UserId::new("github:404"))
    );
}

#[tokio::test]
async fn stale_feeds_recover_on_resubscribe() {
    let store = Arc::new(FlakyStore::new());
    let chat = Chat::with_keys(store.clone(), Arc::new(FixedKeys::new(["f1f2f3"])));
    let ada_id = ScriptedIdentity::signed_in("github:1", Some("Ada"));
    let (mut ada, mut events) = signed_in(&chat, &ada_id).await;

    let room = ada.create_room().await.unwrap();
    ada.join_room(&room.key).await.unwrap();
    ada.send("before").await.unwrap();
    snapshot_of(&mut events, 1).await;

    store.cut_watches();
    let (context, error) = loop {
        match next_event(&mut events).await {
            FeedEvent::Stale { context, error } => break (context, error),
            FeedEvent::Snapshot { .. } => continue,
        }
    };
    assert_eq!(context, Context::Room(room.key.clone()));
    assert_eq!(error, ChatError::SubscriptionError(StoreError::Closed));

    ada.send("while stale").await.unwrap();
    assert_quiet(&mut events).await;

    store.heal();
    ada.resubscribe().await.unwrap();
    let (_, messages) = snapshot_of(&mut events, 2).await;
    assert_eq!(bodies(&messages), ["before", "while stale"]);
}

#[tokio::test]
async fn failed_writes_surface_and_leave_the_log_alone() {
    let store = Arc::new(FlakyStore::new());
    let chat = Chat::with_keys(store.clone(), Arc::new(FixedKeys::new(["f1f2f3"])));
    let ada_id = ScriptedIdentity::signed_in("github:1", Some("Ada"));
    let (mut ada, _events) = signed_in(&chat, &ada_id).await;
    let room = ada.create_room().await.unwrap();
    ada.join_room(&room.key).await.unwrap();

    store.fail_writes(true);
    assert!(matches!(ada.send("lost").await, Err(ChatError::WriteFailed(_))));
    assert!(matches!(ada.create_room().await, Err(ChatError::WriteFailed(_))));

    store.fail_writes(false);
    assert_eq!(ada.send("   ").await.unwrap_err(), ChatError::EmptyBody);
    ada.send("kept").await.unwrap();
    let messages = chat.log.read_ordered(&Context::Room(room.key)).await.unwrap();
    assert_eq!(bodies(&messages), ["kept"]);
}

#[tokio::test]
async fn open_roster_feeds_see_later_sign_ups() {
    let chat = Chat::new(Arc::new(MemoryStore::new()));
    let ada_id = ScriptedIdentity::signed_in("github:1", Some("Ada"));
    signed_in(&chat, &ada_id).await;

    let mut users = chat.roster.watch().await.unwrap();
    let names = |users: Vec<superchat::chat::User>| -> Vec<String> {
        users.into_iter().filter_map(|user| user.display_name).map(String::from).collect()
    };
    let first = tokio::time::timeout(Duration::from_secs(2), users.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(names(first), ["Ada"]);

    let bob_id = ScriptedIdentity::signed_in("google:2", Some("Bob"));
    signed_in(&chat, &bob_id).await;
    let second = tokio::time::timeout(Duration::from_secs(2), users.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(names(second), ["Ada", "Bob"]);
}
