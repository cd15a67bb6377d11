use crate::bridge::BridgeOrchestrator;
use crate::peer::{MatchState, Peer, PeerRegistry};
use crate::signaling::SignalingOutput;
use crate::store::SessionStore;
use duet_core::{
    MatchRole, MatchedPayload, MediaKind, PartnerProducers, PeerId, Room, RoomId, ServerMessage,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// The peer was appended to the waiting queue.
    Waiting,
    Matched(Room),
    /// The dequeued partner was gone or incomplete; the peer is left waiting.
    PartnerUnavailable(PeerId),
    /// The store failed; the peer is back to idle.
    StoreUnavailable,
    /// The room could not be completed; both peers are back to idle.
    Aborted,
    /// Matching already ran (or is running) for this peer.
    Skipped,
}

/// Pairs peers through the store's atomic queue step and persists rooms.
#[derive(Clone)]
pub struct Matchmaker {
    store: Arc<dyn SessionStore>,
    registry: PeerRegistry,
    signaling: Arc<dyn SignalingOutput>,
    bridge: BridgeOrchestrator,
    stream_base_url: String,
}

impl Matchmaker {
    pub fn new(
        store: Arc<dyn SessionStore>,
        registry: PeerRegistry,
        signaling: Arc<dyn SignalingOutput>,
        bridge: BridgeOrchestrator,
        stream_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            signaling,
            bridge,
            stream_base_url: stream_base_url.into(),
        }
    }

    /// Run one matchmaking attempt for a peer that holds both producers.
    pub async fn request_match(&self, peer_id: &PeerId) -> MatchOutcome {
        if !self.registry.try_begin_matching(peer_id) {
            return MatchOutcome::Skipped;
        }

        let partner_id = match self.store.match_or_enqueue(peer_id).await {
            Ok(Some(partner_id)) => partner_id,
            Ok(None) => {
                self.mark_waiting(peer_id);
                info!("Peer {} is waiting for a partner", peer_id);
                return MatchOutcome::Waiting;
            }
            Err(e) => {
                error!("Matchmaking for {} failed: {}", peer_id, e);
                // The script may have run before the reply was lost.
                if let Err(e) = self.store.remove_from_queue(peer_id).await {
                    error!("Failed to clear {} from the waiting queue: {}", peer_id, e);
                }
                self.registry.set_match_state(peer_id, MatchState::Idle);
                self.signaling.send(
                    peer_id,
                    ServerMessage::error("StoreFailure", format!("matchmaking unavailable: {}", e)),
                );
                return MatchOutcome::StoreUnavailable;
            }
        };

        let room_id = RoomId::new();
        let Some(partner_producers) = self.claim_partner(&partner_id, &room_id) else {
            warn!(
                "Dequeued partner {} of {} is gone or incomplete",
                partner_id, peer_id
            );
            self.mark_waiting(peer_id);
            return MatchOutcome::PartnerUnavailable(partner_id);
        };

        let own_producers = self
            .registry
            .with_peer(peer_id, producer_ids)
            .flatten();
        let Some(own_producers) = own_producers else {
            warn!("Peer {} lost a producer while matching", peer_id);
            self.abort_match(
                peer_id,
                &partner_id,
                ServerMessage::error("NotReady", "producer closed while matching"),
            );
            return MatchOutcome::Aborted;
        };

        let room = Room::new(
            room_id,
            partner_id.clone(),
            peer_id.clone(),
            &self.stream_base_url,
        );
        if let Err(e) = self.store.save_room(&room).await {
            error!("Failed to persist room {}: {}", room.id, e);
            self.abort_match(
                peer_id,
                &partner_id,
                ServerMessage::error("StoreFailure", format!("failed to persist room: {}", e)),
            );
            return MatchOutcome::Aborted;
        }

        if !self.link_partner(peer_id, &partner_id, &room.id) {
            warn!(
                "Partner {} of {} left before room {} was ready",
                partner_id, peer_id, room.id
            );
            self.mark_waiting(peer_id);
            return MatchOutcome::PartnerUnavailable(partner_id);
        }
        self.registry.with_peer_mut(peer_id, |peer| {
            peer.match_state = MatchState::Matched;
            peer.room_id = Some(room.id.clone());
        });

        self.signaling.send(
            &partner_id,
            ServerMessage::Matched(MatchedPayload {
                room_id: room.id.clone(),
                role: MatchRole::Offerer,
                partner_id: peer_id.clone(),
                partner_producers: own_producers,
                stream_url: room.stream_url.clone(),
            }),
        );
        self.signaling.send(
            peer_id,
            ServerMessage::Matched(MatchedPayload {
                room_id: room.id.clone(),
                role: MatchRole::Answerer,
                partner_id: partner_id.clone(),
                partner_producers,
                stream_url: room.stream_url.clone(),
            }),
        );
        info!(
            "Matched {} (offerer) with {} (answerer) in room {}",
            partner_id, peer_id, room.id
        );

        self.bridge.trigger(room.id.clone());
        MatchOutcome::Matched(room)
    }

    /// `Matching -> Waiting` plus the notification, under the peer's entry
    /// lock so a concurrent claim by another matcher cannot interleave.
    fn mark_waiting(&self, peer_id: &PeerId) {
        let signaling = &self.signaling;
        self.registry.with_peer_mut(peer_id, |peer| {
            if peer.match_state == MatchState::Matching {
                peer.match_state = MatchState::Waiting;
                signaling.send(peer_id, ServerMessage::WaitingForUser {});
            }
        });
    }

    /// Reserve a dequeued partner for `room_id` if it is still resident,
    /// unmatched and holding both producers.
    fn claim_partner(&self, partner_id: &PeerId, room_id: &RoomId) -> Option<PartnerProducers> {
        self.registry
            .with_peer_mut(partner_id, |partner| {
                let claimable = matches!(
                    partner.match_state,
                    MatchState::Waiting | MatchState::Matching
                );
                if !claimable {
                    return None;
                }
                let producers = producer_ids(partner)?;
                partner.match_state = MatchState::Matched;
                partner.room_id = Some(room_id.clone());
                Some(producers)
            })
            .flatten()
    }

    /// Link the pair if the partner is still resident and still claimed for
    /// `room_id`. Runs under the partner's entry lock, so a disconnect either
    /// lands before (no link) or after (sees the link and notifies us).
    fn link_partner(&self, peer_id: &PeerId, partner_id: &PeerId, room_id: &RoomId) -> bool {
        let registry = &self.registry;
        self.registry
            .with_peer_mut(partner_id, |partner| {
                let claimed = partner.match_state == MatchState::Matched
                    && partner.room_id.as_ref() == Some(room_id);
                if claimed {
                    registry.link(peer_id, partner_id);
                }
                claimed
            })
            .unwrap_or(false)
    }

    /// Undo a claim after the room could not be created. Both peers go back
    /// to idle and are told why; a later produce retries matchmaking.
    fn abort_match(&self, peer_id: &PeerId, partner_id: &PeerId, notice: ServerMessage) {
        for id in [peer_id, partner_id] {
            self.registry.with_peer_mut(id, |peer| {
                peer.match_state = MatchState::Idle;
                peer.room_id = None;
            });
            self.signaling.send(id, notice.clone());
        }
    }
}

fn producer_ids(peer: &Peer) -> Option<PartnerProducers> {
    Some(PartnerProducers {
        audio: peer.producer(MediaKind::Audio)?.id(),
        video: peer.producer(MediaKind::Video)?.id(),
    })
}
