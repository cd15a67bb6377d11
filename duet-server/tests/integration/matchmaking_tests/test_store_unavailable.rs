use duet_core::{MediaKind, ServerMessage};
use duet_server::MatchState;

use crate::integration::{create_test_engine, init_tracing};

#[tokio::test]
async fn test_store_failure_leaves_peer_idle() {
    init_tracing();

    let harness = create_test_engine();
    let mut client = harness.client().await.expect("Failed to connect");
    client.prepare().await.unwrap();
    client.produce(MediaKind::Audio).await.unwrap();

    harness.store.set_unavailable(true);
    client.produce(MediaKind::Video).await.unwrap();
    assert_eq!(client.wait_error().await.unwrap(), "StoreFailure");

    let registry = harness.engine.registry();
    assert_eq!(
        registry.with_peer(&client.peer_id, |peer| (peer.match_state, peer.room_id.clone())),
        Some((MatchState::Idle, None))
    );
    assert_eq!(
        harness.signaling.count_for(&client.peer_id, |m| {
            matches!(m, ServerMessage::Matched(_) | ServerMessage::WaitingForUser {})
        }),
        0
    );
    assert!(harness.store.rooms().is_empty());

    // Producing again once the store is back retries matchmaking.
    harness.store.set_unavailable(false);
    assert!(harness.store.queued().await.is_empty());
    client.produce(MediaKind::Video).await.unwrap();
    client.wait_waiting().await.unwrap();
    assert_eq!(harness.store.queued().await, vec![client.peer_id.clone()]);
}
