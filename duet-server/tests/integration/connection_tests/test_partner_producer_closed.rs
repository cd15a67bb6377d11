use duet_core::{MediaKind, ServerMessage};

use crate::integration::{create_matched_pair, create_test_engine, init_tracing};
use crate::utils::{BACKGROUND_TIMEOUT_MS, wait_until};

#[tokio::test]
async fn test_partner_transport_close_notifies_consumer_once() {
    init_tracing();

    let harness = create_test_engine();
    let mut pair = create_matched_pair(&harness).await.expect("Pairing failed");
    let room_id = pair.offerer_match.room_id.clone();

    let consumed = pair
        .offerer
        .consume_all(&room_id)
        .await
        .expect("Consume failed");
    let video_consumer = consumed
        .iter()
        .find(|c| c.kind == MediaKind::Video)
        .map(|c| c.id.clone())
        .unwrap();

    let answerer_send = pair
        .answerer
        .transports
        .as_ref()
        .map(|t| t.send_transport.id.clone())
        .unwrap();
    assert!(harness.media.close_transport(&answerer_send));

    let closed = pair
        .offerer
        .wait_for(|msg| match msg {
            ServerMessage::ProducerClosed {
                kind: MediaKind::Video,
                consumer_id,
            } => Some(consumer_id),
            _ => None,
        })
        .await
        .expect("No producerClosed for video");
    assert_eq!(closed, video_consumer);

    let registry = harness.engine.registry().clone();
    let offerer_id = pair.offerer.peer_id.clone();
    wait_until(BACKGROUND_TIMEOUT_MS, || {
        registry.with_peer(&offerer_id, |peer| {
            peer.audio_consumer.is_none() && peer.video_consumer.is_none()
        }) == Some(true)
    })
    .await
    .expect("Consumers were not cleared");

    // Let any duplicate event surface before counting.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    for kind in MediaKind::ALL {
        let count = harness.signaling.count_for(&offerer_id, |m| {
            matches!(m, ServerMessage::ProducerClosed { kind: k, .. } if *k == kind)
        });
        assert_eq!(count, 1, "Exactly one {} producerClosed expected", kind);
    }

    let answerer_producers = registry.with_peer(&pair.answerer.peer_id, |peer| {
        (peer.audio_producer.is_some(), peer.video_producer.is_some())
    });
    assert_eq!(answerer_producers, Some((false, false)));
}

#[tokio::test]
async fn test_partner_disconnect_notifies_consumer() {
    init_tracing();

    let harness = create_test_engine();
    let mut pair = create_matched_pair(&harness).await.expect("Pairing failed");
    let room_id = pair.answerer_match.room_id.clone();

    pair.answerer
        .consume(&room_id, MediaKind::Audio)
        .await
        .expect("Consume failed");

    pair.offerer.disconnect().await;
    assert!(!harness.engine.registry().contains(&pair.offerer.peer_id));

    pair.answerer
        .wait_for(|msg| match msg {
            ServerMessage::ProducerClosed {
                kind: MediaKind::Audio,
                ..
            } => Some(()),
            _ => None,
        })
        .await
        .expect("No producerClosed after the partner left");
}
