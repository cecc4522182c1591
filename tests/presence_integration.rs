//! Cross-component integration tests
//!
//! These tests drive the presence coordinator and broadcast dispatcher
//! directly, standing in for the WebSocket transport with per-connection
//! mpsc receivers. No server startup required.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_test::assert_ok;

use event_room_service::broadcast::BroadcastDispatcher;
use event_room_service::connection::ConnectionHandle;
use event_room_service::error::PresenceError;
use event_room_service::presence::PresenceCoordinator;
use event_room_service::websocket::ServerSignal;

struct TestEnvironment {
    coordinator: Arc<PresenceCoordinator>,
    dispatcher: Arc<BroadcastDispatcher>,
}

fn create_test_environment() -> TestEnvironment {
    let coordinator = Arc::new(PresenceCoordinator::new());
    let dispatcher = Arc::new(BroadcastDispatcher::new(coordinator.clone()));
    TestEnvironment {
        coordinator,
        dispatcher,
    }
}

/// A connected client: the registered handle plus the receiving end of
/// its outbound channel.
struct TestClient {
    handle: Arc<ConnectionHandle>,
    rx: mpsc::Receiver<ServerSignal>,
}

fn connect(env: &TestEnvironment, user_id: &str) -> TestClient {
    let (tx, rx) = mpsc::channel(32);
    let handle = env.coordinator.register(user_id.to_string(), tx).unwrap();
    TestClient { handle, rx }
}

/// Join a room the way the transport handler does: mutate membership,
/// then publish the snapshot if membership changed.
fn join(env: &TestEnvironment, client: &TestClient, event_id: &str) {
    if env.coordinator.join(client.handle.id, event_id).unwrap() {
        env.dispatcher.publish_membership(event_id);
    }
}

fn leave(env: &TestEnvironment, client: &TestClient, event_id: &str) {
    if env.coordinator.leave(client.handle.id, event_id).unwrap() {
        env.dispatcher.publish_membership(event_id);
    }
}

fn disconnect(env: &TestEnvironment, client: &TestClient) {
    for event_id in env.coordinator.disconnect(client.handle.id).unwrap() {
        env.dispatcher.publish_membership(&event_id);
    }
}

/// Drain all signals currently queued for a client.
fn drain(client: &mut TestClient) -> Vec<ServerSignal> {
    let mut signals = Vec::new();
    while let Ok(signal) = client.rx.try_recv() {
        signals.push(signal);
    }
    signals
}

fn active_users_snapshots(signals: &[ServerSignal], event_id: &str) -> Vec<Vec<String>> {
    signals
        .iter()
        .filter_map(|signal| match signal {
            ServerSignal::ActiveUsers {
                event_id: id,
                users,
            } if id == event_id => Some(users.clone()),
            _ => None,
        })
        .collect()
}

// =============================================================================
// End-to-end scenario
// =============================================================================

#[tokio::test]
async fn test_two_users_join_chat_and_disconnect() {
    let env = create_test_environment();
    let mut alice = connect(&env, "alice");
    let mut bob = connect(&env, "bob");

    // Alice joins: room is created with her alone, snapshot fires
    join(&env, &alice, "evt1");
    assert_eq!(
        active_users_snapshots(&drain(&mut alice), "evt1"),
        vec![vec!["alice".to_string()]]
    );

    // Bob joins: both present, snapshot fires to both
    join(&env, &bob, "evt1");
    let expected = vec!["alice".to_string(), "bob".to_string()];
    assert_eq!(
        active_users_snapshots(&drain(&mut alice), "evt1"),
        vec![expected.clone()]
    );
    assert_eq!(
        active_users_snapshots(&drain(&mut bob), "evt1"),
        vec![expected]
    );

    // Alice sends a chat message: both receive the authoritative copy
    let result = env
        .dispatcher
        .publish_chat_message(&alice.handle, "evt1", "hi".to_string())
        .unwrap();
    assert_eq!(result.delivered_to, 2);

    for client in [&mut alice, &mut bob] {
        let signals = drain(client);
        assert_eq!(signals.len(), 1);
        match &signals[0] {
            ServerSignal::Chat { message } => {
                assert_eq!(message.event_id, "evt1");
                assert_eq!(message.sender_user_id, "alice");
                assert_eq!(message.body, "hi");
            }
            other => panic!("unexpected signal: {:?}", other),
        }
    }

    // Alice disconnects: bob gets exactly one updated snapshot
    disconnect(&env, &alice);
    assert_eq!(
        active_users_snapshots(&drain(&mut bob), "evt1"),
        vec![vec!["bob".to_string()]]
    );
    assert_eq!(env.coordinator.members_of("evt1"), vec!["bob".to_string()]);
}

// =============================================================================
// Multi-tab reference counting
// =============================================================================

#[tokio::test]
async fn test_two_tabs_same_user_broadcast_once() {
    let env = create_test_environment();
    let mut tab1 = connect(&env, "alice");
    let mut tab2 = connect(&env, "alice");

    join(&env, &tab1, "evt1");
    join(&env, &tab2, "evt1");

    // Exactly one snapshot, showing alice once
    let snapshots = active_users_snapshots(&drain(&mut tab1), "evt1");
    assert_eq!(snapshots, vec![vec!["alice".to_string()]]);

    // The second tab joined after the only broadcast, so it saw nothing
    assert!(active_users_snapshots(&drain(&mut tab2), "evt1").is_empty());

    // Closing one tab changes nothing visible
    leave(&env, &tab1, "evt1");
    assert!(drain(&mut tab2).is_empty());
    assert_eq!(env.coordinator.members_of("evt1"), vec!["alice".to_string()]);

    // Closing the last tab empties and deletes the room
    leave(&env, &tab2, "evt1");
    assert!(!env.coordinator.has_room("evt1"));
}

#[tokio::test]
async fn test_unbalanced_leaves_never_go_negative() {
    let env = create_test_environment();
    let alice = connect(&env, "alice");

    // Duplicate and late leave signals are no-ops
    leave(&env, &alice, "evt1");
    join(&env, &alice, "evt1");
    leave(&env, &alice, "evt1");
    leave(&env, &alice, "evt1");
    assert!(!env.coordinator.has_room("evt1"));

    // A fresh join still works after the noise
    join(&env, &alice, "evt1");
    assert_eq!(env.coordinator.members_of("evt1"), vec!["alice".to_string()]);
}

// =============================================================================
// Room lifecycle
// =============================================================================

#[tokio::test]
async fn test_room_is_recreated_fresh_after_last_leave() {
    let env = create_test_environment();
    let alice = connect(&env, "alice");
    let bob = connect(&env, "bob");

    join(&env, &alice, "evt1");
    disconnect(&env, &alice);
    assert!(!env.coordinator.has_room("evt1"));

    // No stale members survive the room's death
    join(&env, &bob, "evt1");
    assert_eq!(env.coordinator.members_of("evt1"), vec!["bob".to_string()]);
}

#[tokio::test]
async fn test_disconnect_broadcasts_once_per_joined_room() {
    let env = create_test_environment();
    let alice = connect(&env, "alice");
    let mut bob = connect(&env, "bob");
    let mut carol = connect(&env, "carol");

    // Bob watches room A, carol watches room B, alice is in both
    join(&env, &bob, "evtA");
    join(&env, &carol, "evtB");
    join(&env, &alice, "evtA");
    join(&env, &alice, "evtB");
    drain(&mut bob);
    drain(&mut carol);

    disconnect(&env, &alice);

    assert_eq!(
        active_users_snapshots(&drain(&mut bob), "evtA"),
        vec![vec!["bob".to_string()]]
    );
    assert_eq!(
        active_users_snapshots(&drain(&mut carol), "evtB"),
        vec![vec!["carol".to_string()]]
    );

    // Signals for alice's connection are now unknown-connection no-ops
    assert!(matches!(
        env.coordinator.join(alice.handle.id, "evtA"),
        Err(PresenceError::UnknownConnection(_))
    ));
}

// =============================================================================
// Chat gating
// =============================================================================

#[tokio::test]
async fn test_chat_without_join_yields_zero_broadcasts() {
    let env = create_test_environment();
    let mut alice = connect(&env, "alice");
    let mut bob = connect(&env, "bob");

    join(&env, &bob, "evt1");
    drain(&mut bob);

    // Alice never joined evt1
    let err = env
        .dispatcher
        .publish_chat_message(&alice.handle, "evt1", "sneaky".to_string())
        .unwrap_err();
    assert!(matches!(err, PresenceError::NotJoined { .. }));

    assert!(drain(&mut bob).is_empty());
    assert!(drain(&mut alice).is_empty());
}

#[tokio::test]
async fn test_chat_is_scoped_to_its_room() {
    let env = create_test_environment();
    let mut alice = connect(&env, "alice");
    let mut bob = connect(&env, "bob");

    join(&env, &alice, "evt1");
    join(&env, &bob, "evt2");
    drain(&mut alice);
    drain(&mut bob);

    let result = env
        .dispatcher
        .publish_chat_message(&alice.handle, "evt1", "hello evt1".to_string())
        .unwrap();
    assert_eq!(result.delivered_to, 1);

    // Nothing leaks into the other room
    assert!(drain(&mut bob).is_empty());
}

// =============================================================================
// Delivery ordering
// =============================================================================

fn chat_bodies(signals: &[ServerSignal]) -> Vec<String> {
    signals
        .iter()
        .filter_map(|signal| match signal {
            ServerSignal::Chat { message } => Some(message.body.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publishes_share_one_delivery_order() {
    let env = create_test_environment();
    let alice = connect(&env, "alice");
    let bob = connect(&env, "bob");
    let mut carol = connect(&env, "carol");
    let mut dave = connect(&env, "dave");

    for client in [&alice, &bob, &carol, &dave] {
        join(&env, client, "evt1");
    }
    drain(&mut carol);
    drain(&mut dave);

    // Alice and bob chat from separate tasks; their publishes race
    let alice_task = {
        let dispatcher = env.dispatcher.clone();
        let handle = alice.handle.clone();
        tokio::spawn(async move {
            for i in 0..10 {
                dispatcher
                    .publish_chat_message(&handle, "evt1", format!("a{}", i))
                    .unwrap();
            }
        })
    };
    let bob_task = {
        let dispatcher = env.dispatcher.clone();
        let handle = bob.handle.clone();
        tokio::spawn(async move {
            for i in 0..10 {
                dispatcher
                    .publish_chat_message(&handle, "evt1", format!("b{}", i))
                    .unwrap();
            }
        })
    };
    alice_task.await.unwrap();
    bob_task.await.unwrap();

    // However the two streams interleave, every recipient sees the same
    // interleaving, and each sender's messages stay in send order
    let carol_bodies = chat_bodies(&drain(&mut carol));
    let dave_bodies = chat_bodies(&drain(&mut dave));
    assert_eq!(carol_bodies.len(), 20);
    assert_eq!(carol_bodies, dave_bodies);

    for prefix in ["a", "b"] {
        let stream: Vec<_> = carol_bodies
            .iter()
            .filter(|body| body.starts_with(prefix))
            .cloned()
            .collect();
        let expected: Vec<_> = (0..10).map(|i| format!("{}{}", prefix, i)).collect();
        assert_eq!(stream, expected);
    }
}

#[tokio::test]
async fn test_chat_timestamp_is_server_assigned() {
    let env = create_test_environment();
    let mut alice = connect(&env, "alice");
    join(&env, &alice, "evt1");
    drain(&mut alice);

    let before = chrono::Utc::now();
    tokio_test::assert_ok!(env
        .dispatcher
        .publish_chat_message(&alice.handle, "evt1", "hi".to_string()));
    let after = chrono::Utc::now();

    match drain(&mut alice).pop().unwrap() {
        ServerSignal::Chat { message } => {
            assert!(message.sent_at >= before && message.sent_at <= after);
        }
        other => panic!("unexpected signal: {:?}", other),
    }
}
