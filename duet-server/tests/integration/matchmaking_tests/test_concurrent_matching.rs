use std::collections::HashSet;

use duet_core::{MediaKind, ServerMessage};
use futures::future::join_all;

use crate::integration::{TestHarness, create_test_engine, init_tracing};
use crate::utils::TestClient;

async fn race_to_match(harness: &TestHarness, peers: usize) -> Vec<TestClient> {
    let mut clients = Vec::with_capacity(peers);
    for _ in 0..peers {
        let mut client = harness.client().await.expect("Failed to connect");
        client.prepare().await.unwrap();
        client.produce(MediaKind::Audio).await.unwrap();
        clients.push(client);
    }

    // The second producer of every peer enters matchmaking at once.
    let results = join_all(
        clients
            .iter_mut()
            .map(|client| client.produce(MediaKind::Video)),
    )
    .await;
    for result in results {
        result.expect("Produce failed");
    }
    clients
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_peers_pair_up_exactly_once() {
    init_tracing();

    let harness = create_test_engine();
    let clients = race_to_match(&harness, 8).await;

    let rooms = harness.store.rooms();
    assert_eq!(rooms.len(), 4);
    assert!(harness.store.queued().await.is_empty());

    let mut seen = HashSet::new();
    for room in &rooms {
        assert_eq!(room.users.len(), 2);
        assert_ne!(room.users[0], room.users[1]);
        for user in &room.users {
            assert!(seen.insert(user.clone()), "{} is in two rooms", user);
        }
    }

    for client in &clients {
        let matched = harness
            .signaling
            .count_for(&client.peer_id, |m| matches!(m, ServerMessage::Matched(_)));
        assert_eq!(matched, 1, "{} should be matched exactly once", client.peer_id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_odd_peer_out_keeps_waiting() {
    init_tracing();

    let harness = create_test_engine();
    let clients = race_to_match(&harness, 5).await;

    assert_eq!(harness.store.rooms().len(), 2);

    let queued = harness.store.queued().await;
    assert_eq!(queued.len(), 1);

    let unmatched: Vec<_> = clients
        .iter()
        .filter(|c| {
            harness
                .signaling
                .count_for(&c.peer_id, |m| matches!(m, ServerMessage::Matched(_)))
                == 0
        })
        .map(|c| c.peer_id.clone())
        .collect();
    assert_eq!(unmatched, queued);
}
