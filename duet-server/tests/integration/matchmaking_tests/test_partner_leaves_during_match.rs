use duet_core::{ClientMessage, MediaKind, ServerMessage};
use duet_server::{Flow, MatchState};

use crate::integration::{create_test_engine_with_store, init_tracing};
use crate::utils::{ScriptedStore, rtp_parameters};

#[tokio::test]
async fn test_partner_gone_before_room_is_saved_is_not_matched() {
    init_tracing();

    let store = ScriptedStore::new();
    let harness = create_test_engine_with_store(&store);

    let mut queued = harness.client().await.unwrap();
    queued.publish().await.unwrap();
    queued.wait_waiting().await.unwrap();

    let mut client = harness.client().await.unwrap();
    client.prepare().await.unwrap();
    client.produce(MediaKind::Audio).await.unwrap();

    // Completing the publish dequeues `queued` and stops inside save_room.
    store.park_next_save();
    let engine = harness.engine.clone();
    let peer_id = client.peer_id.clone();
    let produce = tokio::spawn(async move {
        engine
            .handle_message(
                &peer_id,
                ClientMessage::Produce {
                    kind: MediaKind::Video,
                    rtp_parameters: rtp_parameters(MediaKind::Video),
                    transport_id: None,
                },
            )
            .await
    });
    store.wait_parked().await.expect("Room save was never reached");
    assert!(harness.store.queued().await.is_empty());

    queued.disconnect().await;
    assert!(!harness.engine.registry().contains(&queued.peer_id));

    store.release_save();
    assert_eq!(produce.await.unwrap(), Flow::Continue);

    client.wait_waiting().await.unwrap();
    assert_eq!(
        harness
            .signaling
            .count_for(&client.peer_id, |m| matches!(m, ServerMessage::Matched(_))),
        0
    );

    let registry = harness.engine.registry();
    assert_eq!(
        registry.with_peer(&client.peer_id, |peer| (peer.match_state, peer.room_id.clone())),
        Some((MatchState::Waiting, None))
    );
    assert_eq!(registry.partner_of(&client.peer_id), None);
    assert!(harness.transcoder.requests().is_empty());
}
