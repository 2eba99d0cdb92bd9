//! End-to-end room scenarios over in-process connections.
//!
//! - duplicate connection for one user
//! - scrum master leaves
//! - vote masking until reveal
//! - session sweep eviction
//! - saturated outbound queue

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use chrono::{Duration as ChronoDuration, Utc};
use poker_service::errors::PokerError;
use poker_service::hub::connection::OUTBOUND_QUEUE_CAPACITY;
use poker_service::hub::ConnectionHandle;
use poker_service::protocol::{ActionType, OutboundMessage, DISCONNECT_NOTICE};
use poker_test_utils::{frame, seed_room, wait_until, TestApp};
use serde_json::json;

// ============================================================================
// Duplicate connection
// ============================================================================

#[tokio::test]
async fn test_second_connection_replaces_first() {
    let app = TestApp::new();
    let seeded = seed_room(&app.rooms, "Sprint 1", "alice", &["bob"]).await;
    let room_id = seeded.room.id;
    let alice = seeded.scrum_master.id;
    app.sessions.create_session(alice, room_id).await.unwrap();

    let mut first = app.connect(room_id, alice).await;
    let mut second = app.connect(room_id, alice).await;

    let frames = first.drain_until_closed().await;
    assert_eq!(frames.last().map(String::as_str), Some(DISCONNECT_NOTICE));
    first.finished().await;

    assert_eq!(app.registry.subscriber_count(room_id).await, 1);
    assert!(app.registry.is_connected(room_id, alice).await);

    // The replacement keeps receiving room traffic.
    app.rooms.rename(room_id, alice, "alice b").await.unwrap();
    let event = second.recv_action("rename").await;
    assert_eq!(event["payload"]["name"], "alice b");

    // The evicted connection does not mark the user offline.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let user = app.store.get_user(alice).await.unwrap();
    assert!(user.is_online);
}

// ============================================================================
// Scrum master leaves
// ============================================================================

#[tokio::test]
async fn test_holder_leave_reassigns_then_last_leave_deletes_room() {
    let app = TestApp::new();
    let seeded = seed_room(&app.rooms, "Sprint 2", "alice", &["bob", "carol"]).await;
    let room_id = seeded.room.id;
    let alice = seeded.scrum_master.id;
    let bob = seeded.user("bob").id;
    let carol = seeded.user("carol").id;

    let alice_client = app.connect(room_id, alice).await;
    let mut bob_client = app.connect(room_id, bob).await;
    let mut carol_client = app.connect(room_id, carol).await;

    alice_client.send_json(&frame("leave", json!({ "userId": alice })));

    let transfer = bob_client.recv_json().await.unwrap();
    assert_eq!(transfer["action"], "transfer");
    assert_eq!(transfer["payload"]["userId"], json!(alice));
    let successor = transfer["payload"]["newScrumMasterId"].clone();
    assert!(successor == json!(bob) || successor == json!(carol));

    let leave = bob_client.recv_json().await.unwrap();
    assert_eq!(leave, json!({ "action": "leave", "payload": { "userId": alice } }));

    let room = app.store.get_room(room_id).await.unwrap();
    assert_eq!(json!(room.scrum_master), successor);
    assert!(!room.is_participant(alice));
    assert!(matches!(
        app.store.get_user(alice).await,
        Err(PokerError::NotFound(_))
    ));

    // Whoever remains last leaves without any transfer.
    let (leaver, mut last) = if successor == json!(bob) {
        (bob_client, carol_client)
    } else {
        (carol_client, bob_client)
    };
    let leaver_id = leaver.user_id;
    leaver.send_json(&frame("leave", json!({ "userId": leaver_id })));
    loop {
        let event = last.recv_json().await.unwrap();
        if event["action"] == "leave" && event["payload"]["userId"] == json!(leaver_id) {
            break;
        }
    }

    let last_id = last.user_id;
    last.send_json(&frame("leave", json!({ "userId": last_id })));
    let event = last.recv_json().await.unwrap();
    assert_eq!(event, json!({ "action": "leave", "payload": { "userId": last_id } }));

    assert!(wait_until(|| async {
        matches!(app.store.get_room(room_id).await, Err(PokerError::NotFound(_)))
    })
    .await);
}

// ============================================================================
// Vote masking
// ============================================================================

#[tokio::test]
async fn test_votes_masked_until_reveal_then_reset() {
    let app = TestApp::new();
    let seeded = seed_room(&app.rooms, "Sprint 3", "alice", &["bob"]).await;
    let room_id = seeded.room.id;
    let alice = seeded.scrum_master.id;
    let bob = seeded.user("bob").id;

    let mut alice_client = app.connect(room_id, alice).await;
    let bob_client = app.connect(room_id, bob).await;

    bob_client.send_json(&frame("submit", json!({ "userId": bob, "vote": "8" })));
    let submit = alice_client.recv_action("submit").await;
    assert_eq!(submit["payload"], json!({ "userId": bob, "vote": "voted" }));

    let snapshot = app.rooms.get_room(room_id).await.unwrap().snapshot();
    assert_eq!(snapshot.votes.get(&bob.to_string()).map(String::as_str), Some("voted"));
    assert!(!snapshot.votes_revealed);

    // Only the holder may reveal.
    bob_client.send_json(&frame("reveal", json!({ "userId": bob })));
    alice_client.send_json(&frame("reveal", json!({ "userId": alice })));
    let reveal = alice_client.recv_action("reveal").await;
    let votes = reveal["payload"]["votes"].as_object().unwrap();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes.get(&bob.to_string()), Some(&json!("8")));

    let snapshot = app.rooms.get_room(room_id).await.unwrap().snapshot();
    assert_eq!(snapshot.votes.get(&bob.to_string()).map(String::as_str), Some("8"));

    alice_client.send_json(&frame("reset", json!({ "userId": alice })));
    let reset = alice_client.recv_action("reset").await;
    assert_eq!(reset["payload"], json!({}));

    let room = app.store.get_room(room_id).await.unwrap();
    assert!(room.votes.is_empty());
    assert!(!room.votes_revealed);
}

// ============================================================================
// Sweep eviction
// ============================================================================

#[tokio::test]
async fn test_sweep_evicts_only_users_who_are_gone() {
    let app = TestApp::new();
    let seeded = seed_room(&app.rooms, "Sprint 4", "alice", &["bob", "carol"]).await;
    let room_id = seeded.room.id;
    let alice = seeded.scrum_master.id;
    let bob = seeded.user("bob").id;
    let carol = seeded.user("carol").id;

    // alice: online flag set, no connection
    // bob: offline, no connection
    // carol: connected, flag cleared
    app.sessions.create_session(alice, room_id).await.unwrap();
    let bob_session = app.sessions.create_session(bob, room_id).await.unwrap();
    app.sessions.create_session(carol, room_id).await.unwrap();
    app.store.set_user_online(bob, false).await.unwrap();
    app.store.set_user_online(carol, false).await.unwrap();
    let mut carol_client = app.connect(room_id, carol).await;

    let later = Utc::now() + ChronoDuration::minutes(4);
    let report = app.sessions.sweep_at(later).await;

    assert_eq!(report.evicted, 1);
    assert_eq!(report.refreshed, 2);
    assert_eq!(report.errors, 0);

    let leave = carol_client.recv_action("leave").await;
    assert_eq!(leave["payload"]["userId"], json!(bob));

    let room = app.store.get_room(room_id).await.unwrap();
    assert!(room.is_participant(alice));
    assert!(room.is_participant(carol));
    assert!(!room.is_participant(bob));
    assert!(matches!(
        app.store.get_session(bob_session.id).await,
        Err(PokerError::NotFound(_))
    ));

    let alice_session = app.store.get_session_by_user(alice).await.unwrap().unwrap();
    assert!(!alice_session.is_expired(later));
}

#[tokio::test]
async fn test_sweep_deletes_room_once_everyone_is_evicted() {
    let app = TestApp::new();
    let seeded = seed_room(&app.rooms, "Sprint 5", "alice", &[]).await;
    let room_id = seeded.room.id;
    let alice = seeded.scrum_master.id;
    app.sessions.create_session(alice, room_id).await.unwrap();
    app.store.set_user_online(alice, false).await.unwrap();

    let report = app
        .sessions
        .sweep_at(Utc::now() + ChronoDuration::minutes(10))
        .await;

    assert_eq!(report.evicted, 1);
    assert_eq!(report.rooms_deleted, 1);
    assert!(app.store.list_rooms().await.unwrap().is_empty());
}

// ============================================================================
// Saturated queue
// ============================================================================

#[tokio::test]
async fn test_slow_consumer_dropped_without_blocking_others() {
    let app = TestApp::new();
    let seeded = seed_room(&app.rooms, "Sprint 6", "alice", &["bob"]).await;
    let room_id = seeded.room.id;
    let alice = seeded.scrum_master.id;
    let bob = seeded.user("bob").id;

    let mut alice_client = app.connect(room_id, alice).await;

    // bob's queue is never drained.
    let (bob_handle, _bob_queue) =
        ConnectionHandle::new(room_id, bob, app.registry.child_token());
    app.registry.register(bob_handle.clone()).await.unwrap();

    let total = OUTBOUND_QUEUE_CAPACITY + 10;
    for i in 0..total {
        app.rooms
            .publish(
                room_id,
                OutboundMessage::event(ActionType::Rename, json!({ "seq": i })),
            )
            .await
            .unwrap();
        tokio::task::yield_now().await;
    }

    // bob's removal also produces an offline event; only count the renames.
    let mut received = 0;
    while received < total {
        let event = alice_client.recv_json().await.expect("alice keeps up");
        if event["action"] != "rename" {
            continue;
        }
        assert_eq!(event["payload"]["seq"], json!(received));
        received += 1;
    }

    assert!(wait_until(|| async { bob_handle.is_closed() }).await);
    assert!(!app.registry.is_connected(room_id, bob).await);
    assert_eq!(app.registry.subscriber_count(room_id).await, 1);
}
