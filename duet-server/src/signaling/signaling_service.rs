use crate::signaling::SignalingOutput;
use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use duet_core::{PeerId, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// Close code sent when a client breaks the protocol (1008, policy violation).
const POLICY_VIOLATION: u16 = 1008;

/// Outbound half of every live WebSocket, keyed by peer.
#[derive(Clone, Default)]
pub struct SignalingService {
    peers: Arc<DashMap<PeerId, mpsc::UnboundedSender<Message>>>,
}

impl SignalingService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&self, peer_id: PeerId, tx: mpsc::UnboundedSender<Message>) {
        self.peers.insert(peer_id, tx);
    }

    pub fn remove_peer(&self, peer_id: &PeerId) {
        self.peers.remove(peer_id);
    }

    pub fn connected(&self) -> usize {
        self.peers.len()
    }

    fn push(&self, peer_id: &PeerId, message: Message) {
        let Some(peer) = self.peers.get(peer_id) else {
            warn!("Attempted to send to disconnected peer {}", peer_id);
            return;
        };
        if let Err(e) = peer.send(message) {
            error!("Failed to queue WS message for {}: {}", peer_id, e);
        }
    }
}

impl SignalingOutput for SignalingService {
    fn send(&self, peer_id: &PeerId, message: ServerMessage) {
        match serde_json::to_string(&message) {
            Ok(json) => self.push(peer_id, Message::Text(json.into())),
            Err(e) => error!("Failed to serialize server message: {}", e),
        }
    }

    fn close(&self, peer_id: &PeerId) {
        debug!("Closing connection of {}", peer_id);
        self.push(
            peer_id,
            Message::Close(Some(CloseFrame {
                code: POLICY_VIOLATION,
                reason: "protocol violation".into(),
            })),
        );
    }
}
