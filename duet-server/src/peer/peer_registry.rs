use crate::peer::peer::{MatchState, Peer};
use dashmap::DashMap;
use duet_core::PeerId;
use std::sync::Arc;

/// Process-local map of connected peers.
///
/// Access goes through closures so a shard guard can never be held across an
/// `.await`; callers clone what they need out of the record.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    peers: Arc<DashMap<PeerId, Peer>>,
    partners: Arc<DashMap<PeerId, PeerId>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer_id: PeerId) {
        self.peers.insert(peer_id.clone(), Peer::new(peer_id));
    }

    /// Remove the record. The partner link outlives it while the partner is
    /// still connected, so late close events can still find the partner.
    pub fn remove(&self, peer_id: &PeerId) -> Option<Peer> {
        let (_, peer) = self.peers.remove(peer_id)?;

        if let Some(partner) = self.partner_of(peer_id)
            && !self.peers.contains_key(&partner)
        {
            self.partners.remove(peer_id);
            self.partners.remove(&partner);
        }
        Some(peer)
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.peers.contains_key(peer_id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn with_peer<R>(&self, peer_id: &PeerId, f: impl FnOnce(&Peer) -> R) -> Option<R> {
        self.peers.get(peer_id).map(|peer| f(peer.value()))
    }

    pub fn with_peer_mut<R>(
        &self,
        peer_id: &PeerId,
        f: impl FnOnce(&mut Peer) -> R,
    ) -> Option<R> {
        self.peers
            .get_mut(peer_id)
            .map(|mut peer| f(peer.value_mut()))
    }

    /// Move `Idle -> Matching`. Returns false if an attempt already ran.
    pub fn try_begin_matching(&self, peer_id: &PeerId) -> bool {
        self.with_peer_mut(peer_id, |peer| {
            if peer.match_state != MatchState::Idle {
                return false;
            }
            peer.match_state = MatchState::Matching;
            true
        })
        .unwrap_or(false)
    }

    pub fn set_match_state(&self, peer_id: &PeerId, state: MatchState) {
        self.with_peer_mut(peer_id, |peer| peer.match_state = state);
    }

    pub fn link(&self, a: &PeerId, b: &PeerId) {
        self.partners.insert(a.clone(), b.clone());
        self.partners.insert(b.clone(), a.clone());
    }

    pub fn partner_of(&self, peer_id: &PeerId) -> Option<PeerId> {
        self.partners.get(peer_id).map(|p| p.value().clone())
    }
}
