//! Integration tests: room switching, live delivery and room management
//! against the embedded store, with two clients sharing one database.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use mirsal_client::{
    ChatClient, ChatError, CoordinatorConfig, ErrorKind, JoinOutcome, JoinPhase, JoinRoomError,
    SubscriptionState, ValidationError,
};
use mirsal_store::LocalBackend;
use mirsal_store::models::{MessageRow, format_ts};
use mirsal_types::api::NewMessage;
use mirsal_types::backend::Backend;
use mirsal_types::events::ChatEvent;
use mirsal_types::models::MessageWithSender;

use common::*;

fn contents(messages: &[MessageWithSender]) -> Vec<&str> {
    messages.iter().map(|m| m.message.content.as_str()).collect()
}

#[tokio::test]
async fn joining_twice_keeps_one_membership_and_one_subscription() {
    let alice = signed_up_client("alice").await;
    let room = create_room(&alice, "Oasis").await;

    alice.chat().join_room(room.id).await.unwrap();
    alice.chat().join_room(room.id).await.unwrap();

    alice.chat().refresh_rooms().await.unwrap();
    let listed = alice.chat().rooms().await;
    let entry = listed.iter().find(|r| r.room.id == room.id).unwrap();
    assert_eq!(entry.member_count, 1);

    assert_eq!(
        alice.chat().subscription_state().await,
        SubscriptionState::Active { room_id: room.id }
    );
    let feed = alice.backend().local.feed().clone();
    eventually(|| {
        let feed = feed.clone();
        async move { feed.subscriber_count() == 1 }
    })
    .await;
}

#[tokio::test]
async fn pushes_for_a_previous_room_are_never_appended() {
    let alice = signed_up_client("alice").await;
    let bob = second_client(&alice, "bob").await;
    let room_a = create_room(&alice, "Room A").await;
    let room_b = create_room(&alice, "Room B").await;

    alice.chat().join_room(room_a.id).await.unwrap();
    alice.chat().join_room(room_b.id).await.unwrap();
    let mut events = alice.chat().events();

    bob.chat().join_room(room_a.id).await.unwrap();
    bob.chat().send_message("stale").await.unwrap();
    bob.chat().join_room(room_b.id).await.unwrap();
    bob.chat().send_message("fresh").await.unwrap();

    let appended = next_appended(&mut events).await;
    assert_eq!(appended.message.content, "fresh");
    assert_eq!(contents(&alice.chat().messages().await), ["fresh"]);
}

#[tokio::test]
async fn back_to_back_joins_settle_on_the_last_room() {
    let alice = signed_up_client("alice").await;
    let bob = second_client(&alice, "bob").await;
    let room_a = create_room(&alice, "Room A").await;
    let room_b = create_room(&alice, "Room B").await;

    bob.chat().join_room(room_a.id).await.unwrap();
    bob.chat().send_message("from A").await.unwrap();
    bob.chat().join_room(room_b.id).await.unwrap();
    bob.chat().send_message("from B").await.unwrap();

    alice
        .backend()
        .delay_message_load(room_a.id, Duration::from_millis(300));

    let chat = alice.chat();
    let (first, second) = tokio::join!(chat.join_room(room_a.id), chat.join_room(room_b.id));

    assert_eq!(first.unwrap(), JoinOutcome::Superseded);
    assert!(matches!(second.unwrap(), JoinOutcome::Joined(room) if room.id == room_b.id));
    assert_eq!(chat.current_room().await.map(|r| r.id), Some(room_b.id));
    assert_eq!(contents(&chat.messages().await), ["from B"]);
    assert!(!chat.is_loading().await);
}

#[tokio::test]
async fn back_to_back_joins_settle_on_the_last_room_when_it_is_slower() {
    let alice = signed_up_client("alice").await;
    let room_a = create_room(&alice, "Room A").await;
    let room_b = create_room(&alice, "Room B").await;

    alice
        .backend()
        .delay_message_load(room_b.id, Duration::from_millis(300));

    let chat = alice.chat();
    let (first, second) = tokio::join!(chat.join_room(room_a.id), chat.join_room(room_b.id));

    assert!(first.is_ok());
    assert!(matches!(second.unwrap(), JoinOutcome::Joined(room) if room.id == room_b.id));
    assert_eq!(chat.current_room().await.map(|r| r.id), Some(room_b.id));
    assert_eq!(
        chat.subscription_state().await,
        SubscriptionState::Active { room_id: room_b.id }
    );
}

#[tokio::test]
async fn initial_load_is_in_ascending_creation_order() {
    let alice = signed_up_client("alice").await;
    let room = create_room(&alice, "Oasis").await;
    let user_id = alice.session().user_id().await.unwrap();
    let db = alice.backend().local.database().clone();

    let at = |minute| Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap();
    for (content, ts) in [("t3", at(30)), ("t1", at(10)), ("t2", at(20))] {
        db.insert_message(&MessageRow {
            id: Uuid::new_v4().to_string(),
            room_id: room.id.to_string(),
            user_id: user_id.to_string(),
            content: content.into(),
            created_at: format_ts(ts),
            updated_at: format_ts(ts),
        })
        .unwrap();
    }

    alice.chat().join_room(room.id).await.unwrap();
    assert_eq!(contents(&alice.chat().messages().await), ["t1", "t2", "t3"]);
}

#[tokio::test]
async fn initial_load_keeps_only_the_most_recent_window() {
    let local = LocalBackend::in_memory().unwrap();
    let config = CoordinatorConfig {
        message_window: 3,
        ..CoordinatorConfig::default()
    };
    let alice = ChatClient::new(Arc::new(ScriptedBackend::new(local)), config);
    alice.sign_up("alice", SECRET).await.unwrap();
    let room = create_room(&alice, "Oasis").await;

    alice.chat().join_room(room.id).await.unwrap();
    let mut events = alice.chat().events();
    for n in 1..=5 {
        let text = format!("m{}", n);
        alice.chat().send_message(&text).await.unwrap();
        assert_eq!(next_appended(&mut events).await.message.content, text);
    }

    alice.chat().join_room(room.id).await.unwrap();
    assert_eq!(contents(&alice.chat().messages().await), ["m3", "m4", "m5"]);
}

#[tokio::test]
async fn blank_message_is_rejected_without_an_insert() {
    let alice = signed_up_client("alice").await;
    let room = create_room(&alice, "Oasis").await;
    alice.chat().join_room(room.id).await.unwrap();

    let err = alice.chat().send_message("   ").await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(ValidationError::EmptyMessage)));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(alice.backend().message_inserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sending_without_a_room_is_a_no_op() {
    let alice = signed_up_client("alice").await;

    let sent = alice.chat().send_message("hello?").await.unwrap();
    assert!(sent.is_none());
    assert_eq!(alice.backend().message_inserts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sent_messages_are_trimmed() {
    let alice = signed_up_client("alice").await;
    let room = create_room(&alice, "Oasis").await;
    alice.chat().join_room(room.id).await.unwrap();

    let sent = alice.chat().send_message("  marhaba \n").await.unwrap().unwrap();
    assert_eq!(sent.content, "marhaba");
}

#[tokio::test]
async fn leaving_the_current_room_clears_local_state() {
    let alice = signed_up_client("alice").await;
    let bob = second_client(&alice, "bob").await;
    let room = create_room(&alice, "Oasis").await;
    let other = create_room(&alice, "Caravan").await;

    alice.chat().join_room(room.id).await.unwrap();
    let mut events = alice.chat().events();
    bob.chat().join_room(room.id).await.unwrap();
    bob.chat().send_message("welcome").await.unwrap();
    next_appended(&mut events).await;

    alice.chat().leave_room(other.id).await.unwrap();
    assert_eq!(alice.chat().current_room().await.map(|r| r.id), Some(room.id));
    assert_eq!(contents(&alice.chat().messages().await), ["welcome"]);

    alice.chat().leave_room(room.id).await.unwrap();
    assert!(alice.chat().current_room().await.is_none());
    assert!(alice.chat().messages().await.is_empty());
    assert_eq!(
        alice.chat().subscription_state().await,
        SubscriptionState::Unsubscribed
    );

    // Only bob is left in the room; the directory was refreshed.
    let listed = alice.chat().rooms().await;
    let oasis = listed.iter().find(|r| r.room.id == room.id).unwrap();
    assert_eq!(oasis.member_count, 1);
}

#[tokio::test]
async fn vanished_message_is_dropped_at_hydration() {
    let alice = signed_up_client("alice").await;
    let room = create_room(&alice, "Oasis").await;
    alice.chat().join_room(room.id).await.unwrap();
    alice.backend().vanish_on_hydrate("ghost");

    let mut events = alice.chat().events();
    alice.chat().send_message("ghost").await.unwrap();
    alice.chat().send_message("real").await.unwrap();

    assert_eq!(next_appended(&mut events).await.message.content, "real");
    assert_eq!(contents(&alice.chat().messages().await), ["real"]);
}

#[tokio::test]
async fn failed_creator_membership_keeps_the_room() {
    let alice = signed_up_client("alice").await;
    alice
        .backend()
        .fail_membership_insert
        .store(true, Ordering::SeqCst);

    let err = alice.chat().create_room("Mirage", None, false).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PartialFailure);
    let room = match err {
        ChatError::PartialFailure { room, .. } => room,
        other => panic!("expected a partial failure, got {:?}", other),
    };
    assert_eq!(room.name, "Mirage");

    let stored = alice.backend().rooms_with_member_count().await.unwrap();
    let mirage = stored.iter().find(|r| r.room.id == room.id).unwrap();
    assert_eq!(mirage.member_count, 0);
    assert!(alice.chat().rooms().await.iter().all(|r| r.room.id != room.id));
}

#[tokio::test]
async fn creating_a_room_needs_a_name_and_keeps_the_current_room() {
    let alice = signed_up_client("alice").await;
    let err = alice.chat().create_room("  ", None, false).await.unwrap_err();
    assert!(matches!(err, ChatError::Validation(ValidationError::EmptyRoomName)));

    let first = create_room(&alice, "Oasis").await;
    alice.chat().join_room(first.id).await.unwrap();

    let second = alice
        .chat()
        .create_room(" Caravan ", Some("  "), true)
        .await
        .unwrap();
    assert_eq!(second.name, "Caravan");
    assert_eq!(second.description, None);
    assert!(second.is_private);
    assert_eq!(alice.chat().current_room().await.map(|r| r.id), Some(first.id));

    let listed = alice.chat().rooms().await;
    assert_eq!(listed[0].room.id, second.id);
    assert_eq!(listed[0].member_count, 1);
}

#[tokio::test]
async fn failed_subscribe_leaves_the_previous_room_in_place() {
    let alice = signed_up_client("alice").await;
    let room_a = create_room(&alice, "Room A").await;
    let room_b = create_room(&alice, "Room B").await;
    alice.chat().join_room(room_a.id).await.unwrap();

    alice.backend().fail_subscribe.store(true, Ordering::SeqCst);
    let err = alice.chat().join_room(room_b.id).await.unwrap_err();
    assert_eq!(err.phase(), Some(JoinPhase::Subscribe));

    let chat = alice.chat();
    assert_eq!(chat.current_room().await.map(|r| r.id), Some(room_a.id));
    assert_eq!(
        chat.subscription_state().await,
        SubscriptionState::Active { room_id: room_a.id }
    );
    assert!(!chat.is_loading().await);
}

#[tokio::test]
async fn failed_message_load_closes_the_new_subscription() {
    let alice = signed_up_client("alice").await;
    let room_a = create_room(&alice, "Room A").await;
    let room_b = create_room(&alice, "Room B").await;
    alice.chat().join_room(room_a.id).await.unwrap();

    alice.backend().fail_message_load.store(true, Ordering::SeqCst);
    let err = alice.chat().join_room(room_b.id).await.unwrap_err();
    assert_eq!(err.phase(), Some(JoinPhase::MessageLoad));

    let chat = alice.chat();
    assert_eq!(chat.current_room().await.map(|r| r.id), Some(room_a.id));
    assert_eq!(
        chat.subscription_state().await,
        SubscriptionState::Active { room_id: room_a.id }
    );
    assert!(!chat.is_loading().await);

    let feed = alice.backend().local.feed().clone();
    eventually(|| {
        let feed = feed.clone();
        async move { feed.subscriber_count() == 1 }
    })
    .await;
}

#[tokio::test]
async fn superseded_join_leaves_the_loading_flag_to_the_winner() {
    let alice = signed_up_client("alice").await;
    let room_a = create_room(&alice, "Room A").await;
    let room_b = create_room(&alice, "Room B").await;
    alice
        .backend()
        .delay_message_load(room_a.id, Duration::from_millis(300));

    let chat = alice.chat();
    let mut events = chat.events();
    let (first, second) = tokio::join!(chat.join_room(room_a.id), chat.join_room(room_b.id));
    assert_eq!(first.unwrap(), JoinOutcome::Superseded);
    assert!(second.is_ok());

    let mut loading = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ChatEvent::Loading(flag) = event {
            loading.push(flag);
        }
    }
    assert_eq!(loading, [true, true, false]);
}

#[tokio::test]
async fn insert_landing_right_after_the_load_is_still_delivered() {
    let alice = signed_up_client("alice").await;
    let user_id = alice.session().user_id().await.unwrap();
    let room_a = create_room(&alice, "Room A").await;

    alice.backend().insert_during_load(
        NewMessage {
            room_id: room_a.id,
            user_id,
            content: "in between".into(),
        },
        true,
    );
    let mut events = alice.chat().events();
    alice.chat().join_room(room_a.id).await.unwrap();

    assert_eq!(next_appended(&mut events).await.message.content, "in between");
    assert_eq!(contents(&alice.chat().messages().await), ["in between"]);
}

#[tokio::test]
async fn insert_seen_by_both_load_and_push_appears_once() {
    let alice = signed_up_client("alice").await;
    let user_id = alice.session().user_id().await.unwrap();
    let room_a = create_room(&alice, "Room A").await;

    alice.backend().insert_during_load(
        NewMessage {
            room_id: room_a.id,
            user_id,
            content: "early".into(),
        },
        false,
    );
    let mut events = alice.chat().events();
    alice.chat().join_room(room_a.id).await.unwrap();
    assert_eq!(contents(&alice.chat().messages().await), ["early"]);

    alice.chat().send_message("after").await.unwrap();
    assert_eq!(next_appended(&mut events).await.message.content, "after");
    assert_eq!(contents(&alice.chat().messages().await), ["early", "after"]);
}

#[tokio::test]
async fn joining_unknown_room_or_signed_out_fails() {
    let alice = signed_up_client("alice").await;
    let missing = Uuid::new_v4();
    let err = alice.chat().join_room(missing).await.unwrap_err();
    assert!(matches!(err, JoinRoomError::NotFound(id) if id == missing));
    assert_eq!(err.phase(), Some(JoinPhase::Lookup));

    let stranger = client_on(alice.backend().local.sibling());
    let err = stranger.chat().join_room(missing).await.unwrap_err();
    assert!(matches!(err, JoinRoomError::NotAuthenticated));
    assert_eq!(alice.backend().subscribes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn end_to_end_conversation() {
    let alice = signed_up_client("alice_1").await;
    let session = alice.session().current().await.unwrap();
    assert_eq!(session.user.identity_key, "alice1@mirsal.com");

    let room = create_room(&alice, "Desert Travelers").await;
    let listed = alice.chat().rooms().await;
    let entry = listed.iter().find(|r| r.room.id == room.id).unwrap();
    assert_eq!(entry.member_count, 1);

    alice.chat().join_room(room.id).await.unwrap();
    let mut events = alice.chat().events();
    alice.chat().send_message("hello").await.unwrap();

    let appended = next_appended(&mut events).await;
    assert_eq!(appended.message.content, "hello");
    assert_eq!(appended.sender.username, "alice_1");

    let messages = alice.chat().messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].sender.username, "alice_1");
}
