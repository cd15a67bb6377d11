use duet_core::{PeerId, ServerMessage};

/// Implemented by the connection layer so the engine and the media event loop
/// can push events to clients.
///
/// Sends are non-blocking: they enqueue onto the connection's outbound
/// channel, which keeps per-connection ordering.
pub trait SignalingOutput: Send + Sync {
    /// Deliver `message` to one peer. Messages for unknown peers are dropped.
    fn send(&self, peer_id: &PeerId, message: ServerMessage);

    /// Ask the connection layer to close the peer's connection.
    fn close(&self, peer_id: &PeerId);
}
