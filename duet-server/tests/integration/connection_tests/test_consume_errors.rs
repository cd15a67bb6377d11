use duet_core::{ClientMessage, MediaKind, RoomId, ServerMessage};
use duet_server::Flow;

use crate::integration::{create_matched_pair, create_test_engine, init_tracing};

#[tokio::test]
async fn test_consume_outside_own_room_is_not_found() {
    init_tracing();

    let harness = create_test_engine();
    let pair = create_matched_pair(&harness).await.expect("Pairing failed");
    let room_id = pair.offerer_match.room_id.clone();

    let mut outsider = harness.client().await.expect("Failed to connect");
    outsider.prepare().await.unwrap();
    let caps = outsider.capabilities.clone().unwrap();

    let flow = outsider
        .send(ClientMessage::Consume {
            room_id: Some(room_id),
            rtp_capabilities: caps.clone(),
            kind: Some(MediaKind::Video),
        })
        .await;
    assert_eq!(flow, Flow::Continue);
    assert_eq!(outsider.wait_error().await.unwrap(), "NotFound");

    let flow = outsider
        .send(ClientMessage::Consume {
            room_id: Some(RoomId::new()),
            rtp_capabilities: caps,
            kind: Some(MediaKind::Audio),
        })
        .await;
    assert_eq!(flow, Flow::Continue);
    assert_eq!(outsider.wait_error().await.unwrap(), "NotFound");

    let consumers = harness.engine.registry().with_peer(&outsider.peer_id, |peer| {
        (peer.audio_consumer.is_some(), peer.video_consumer.is_some())
    });
    assert_eq!(consumers, Some((false, false)));
}

#[tokio::test]
async fn test_consume_without_room_id_terminates() {
    init_tracing();

    let harness = create_test_engine();
    let pair = create_matched_pair(&harness).await.expect("Pairing failed");
    let caps = pair.answerer.capabilities.clone().unwrap();

    let flow = pair
        .answerer
        .send(ClientMessage::Consume {
            room_id: None,
            rtp_capabilities: caps,
            kind: None,
        })
        .await;
    assert_eq!(flow, Flow::Terminate);
}

#[tokio::test]
async fn test_duplicate_consume_is_rejected() {
    init_tracing();

    let harness = create_test_engine();
    let mut pair = create_matched_pair(&harness).await.expect("Pairing failed");
    let room_id = pair.answerer_match.room_id.clone();

    let consumed = pair
        .answerer
        .consume(&room_id, MediaKind::Video)
        .await
        .expect("First consume failed");
    assert_eq!(consumed.producer_id, pair.answerer_match.partner_producers.video);

    let caps = pair.answerer.capabilities.clone().unwrap();
    let flow = pair
        .answerer
        .send(ClientMessage::Consume {
            room_id: Some(room_id),
            rtp_capabilities: caps,
            kind: Some(MediaKind::Video),
        })
        .await;
    assert_eq!(flow, Flow::Continue);
    assert_eq!(pair.answerer.wait_error().await.unwrap(), "InvalidMessage");

    let kept = harness.engine.registry().with_peer(&pair.answerer.peer_id, |peer| {
        peer.consumer(MediaKind::Video).map(|c| c.id())
    });
    assert_eq!(kept, Some(Some(consumed.id)));
    assert_eq!(
        harness.signaling.count_for(&pair.answerer.peer_id, |m| matches!(
            m,
            ServerMessage::Consumed(_)
        )),
        1
    );
}

#[tokio::test]
async fn test_resume_requires_both_consumers() {
    init_tracing();

    let harness = create_test_engine();
    let mut pair = create_matched_pair(&harness).await.expect("Pairing failed");
    let room_id = pair.answerer_match.room_id.clone();

    let flow = pair
        .answerer
        .send(ClientMessage::Resume {
            room_id: Some(room_id.clone()),
        })
        .await;
    assert_eq!(flow, Flow::Continue);
    assert_eq!(pair.answerer.wait_error().await.unwrap(), "NotReady");

    pair.answerer
        .consume(&room_id, MediaKind::Audio)
        .await
        .unwrap();
    pair.answerer
        .send(ClientMessage::Resume {
            room_id: Some(room_id.clone()),
        })
        .await;
    assert_eq!(pair.answerer.wait_error().await.unwrap(), "NotReady");

    // A room the peer does not belong to.
    pair.answerer
        .send(ClientMessage::Resume {
            room_id: Some(RoomId::new()),
        })
        .await;
    assert_eq!(pair.answerer.wait_error().await.unwrap(), "NotFound");

    pair.answerer
        .consume(&room_id, MediaKind::Video)
        .await
        .unwrap();
    pair.answerer.resume(&room_id).await.expect("Resume failed");
}
