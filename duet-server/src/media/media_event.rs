use duet_core::{ConsumerId, MediaKind, PeerId, ProducerId};

/// Posted by close hooks; drained by the media event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// A peer's producer lost its transport.
    ProducerClosed {
        peer_id: PeerId,
        kind: MediaKind,
        producer_id: ProducerId,
    },
    /// A peer's consumer lost its transport.
    ConsumerClosed {
        peer_id: PeerId,
        kind: MediaKind,
        consumer_id: ConsumerId,
    },
    /// The producer a peer's consumer was reading from went away.
    ConsumerProducerClosed {
        peer_id: PeerId,
        kind: MediaKind,
        consumer_id: ConsumerId,
    },
}
