use duet_core::{ClientMessage, MediaKind, ServerMessage};
use duet_server::{Flow, MatchState};

use crate::integration::{create_test_engine, init_tracing};
use crate::utils::rtp_parameters;

#[tokio::test]
async fn test_produce_before_transport_is_not_ready() {
    init_tracing();

    let harness = create_test_engine();
    let mut client = harness.client().await.expect("Failed to connect");
    client.fetch_capabilities().await.unwrap();

    let flow = client
        .send(ClientMessage::Produce {
            kind: MediaKind::Audio,
            rtp_parameters: rtp_parameters(MediaKind::Audio),
            transport_id: None,
        })
        .await;
    assert_eq!(flow, Flow::Continue);
    assert_eq!(client.wait_error().await.unwrap(), "NotReady");

    // Created but not yet connected is still too early.
    client.create_transports().await.unwrap();
    let flow = client
        .send(ClientMessage::Produce {
            kind: MediaKind::Audio,
            rtp_parameters: rtp_parameters(MediaKind::Audio),
            transport_id: None,
        })
        .await;
    assert_eq!(flow, Flow::Continue);
    assert_eq!(client.wait_error().await.unwrap(), "NotReady");
    assert!(harness.media.live_producers().is_empty());
}

#[tokio::test]
async fn test_produce_on_receive_transport_terminates() {
    init_tracing();

    let harness = create_test_engine();
    let mut client = harness.client().await.expect("Failed to connect");
    client.prepare().await.unwrap();
    let receive_id = client
        .transports
        .as_ref()
        .map(|pair| pair.receive_transport.id.clone())
        .unwrap();

    let flow = client
        .send(ClientMessage::Produce {
            kind: MediaKind::Video,
            rtp_parameters: rtp_parameters(MediaKind::Video),
            transport_id: Some(receive_id),
        })
        .await;

    assert_eq!(flow, Flow::Terminate);
    assert!(harness.media.live_producers().is_empty());
    assert_eq!(
        harness.signaling.count_for(&client.peer_id, |m| matches!(
            m,
            ServerMessage::ProduceSuccess { .. }
        )),
        0
    );
}

#[tokio::test]
async fn test_reproduce_replaces_previous_producer() {
    init_tracing();

    let harness = create_test_engine();
    let mut client = harness.client().await.expect("Failed to connect");
    client.prepare().await.unwrap();

    let (_, first_video) = client.produce_all().await.unwrap();
    client.wait_waiting().await.unwrap();

    let second_video = client.produce(MediaKind::Video).await.unwrap();
    assert_ne!(first_video, second_video);

    let live = harness.media.live_producers();
    assert_eq!(live.len(), 2, "One audio and one video producer expected");
    assert!(live.contains(&second_video));
    assert!(!live.contains(&first_video));

    let registry = harness.engine.registry();
    let current = registry.with_peer(&client.peer_id, |peer| {
        peer.producer(MediaKind::Video).map(|p| p.id())
    });
    assert_eq!(current, Some(Some(second_video)));

    // Still waiting, and queued only once.
    assert_eq!(
        registry.with_peer(&client.peer_id, |peer| peer.match_state),
        Some(MatchState::Waiting)
    );
    assert_eq!(harness.store.queued().await, vec![client.peer_id.clone()]);
}
