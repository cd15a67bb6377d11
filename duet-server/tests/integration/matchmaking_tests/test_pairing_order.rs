use duet_core::{MatchRole, ServerMessage};
use duet_server::MatchState;

use crate::integration::{create_matched_pair, create_test_engine, init_tracing};

#[tokio::test]
async fn test_first_waiting_peer_becomes_offerer() {
    init_tracing();

    let harness = create_test_engine();
    let pair = create_matched_pair(&harness).await.expect("Pairing failed");
    let offerer_id = &pair.offerer.peer_id;
    let answerer_id = &pair.answerer.peer_id;

    assert_eq!(pair.offerer_match.role, MatchRole::Offerer);
    assert_eq!(pair.answerer_match.role, MatchRole::Answerer);
    assert_eq!(pair.offerer_match.room_id, pair.answerer_match.room_id);
    assert_eq!(&pair.offerer_match.partner_id, answerer_id);
    assert_eq!(&pair.answerer_match.partner_id, offerer_id);
    assert!(
        pair.offerer_match
            .stream_url
            .contains(&pair.offerer_match.room_id.to_string())
    );

    // Each side learns the other's producers.
    let registry = harness.engine.registry();
    let offerer_video = registry
        .with_peer(offerer_id, |peer| peer.video_producer.as_ref().map(|p| p.id()))
        .flatten();
    let answerer_audio = registry
        .with_peer(answerer_id, |peer| peer.audio_producer.as_ref().map(|p| p.id()))
        .flatten();
    assert_eq!(offerer_video, Some(pair.answerer_match.partner_producers.video.clone()));
    assert_eq!(answerer_audio, Some(pair.offerer_match.partner_producers.audio.clone()));

    for id in [offerer_id, answerer_id] {
        assert_eq!(
            registry.with_peer(id, |peer| (peer.match_state, peer.room_id.clone())),
            Some((MatchState::Matched, Some(pair.offerer_match.room_id.clone())))
        );
        assert_eq!(
            harness
                .signaling
                .count_for(id, |m| matches!(m, ServerMessage::Matched(_))),
            1
        );
    }

    let rooms = harness.store.rooms();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].users, [offerer_id.clone(), answerer_id.clone()]);
    assert_eq!(rooms[0].offerer(), offerer_id);
    assert!(harness.store.queued().await.is_empty());

    // The answerer never waited.
    assert_eq!(
        harness
            .signaling
            .count_for(answerer_id, |m| matches!(m, ServerMessage::WaitingForUser {})),
        0
    );
}

#[tokio::test]
async fn test_queue_is_first_in_first_out() {
    init_tracing();

    let harness = create_test_engine();

    let mut first = harness.client().await.unwrap();
    first.publish().await.unwrap();
    first.wait_waiting().await.unwrap();

    let mut second = harness.client().await.unwrap();
    second.publish().await.unwrap();
    let second_match = second.wait_matched().await.unwrap();
    assert_eq!(second_match.partner_id, first.peer_id);

    let mut third = harness.client().await.unwrap();
    third.publish().await.unwrap();
    third.wait_waiting().await.unwrap();
    assert_eq!(harness.store.queued().await, vec![third.peer_id.clone()]);

    let mut fourth = harness.client().await.unwrap();
    fourth.publish().await.unwrap();
    let fourth_match = fourth.wait_matched().await.unwrap();
    assert_eq!(fourth_match.partner_id, third.peer_id);
    assert_eq!(fourth_match.role, MatchRole::Answerer);

    assert_eq!(harness.store.rooms().len(), 2);
    assert!(harness.store.queued().await.is_empty());
}
