use crate::media::MediaEvent;
use crate::peer::PeerRegistry;
use crate::signaling::SignalingOutput;
use duet_core::{ConsumerId, MediaKind, PeerId, ProducerId, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Applies media close events to the registry, one at a time.
///
/// Every handler compares handle ids before clearing a slot, so an event for
/// a replaced producer or consumer is a no-op.
pub struct MediaEventLoop {
    registry: PeerRegistry,
    signaling: Arc<dyn SignalingOutput>,
    event_rx: mpsc::UnboundedReceiver<MediaEvent>,
}

impl MediaEventLoop {
    pub fn new(
        registry: PeerRegistry,
        signaling: Arc<dyn SignalingOutput>,
        event_rx: mpsc::UnboundedReceiver<MediaEvent>,
    ) -> Self {
        Self {
            registry,
            signaling,
            event_rx,
        }
    }

    pub async fn run(mut self) {
        info!("Media event loop started");

        while let Some(event) = self.event_rx.recv().await {
            self.handle_event(event);
        }

        info!("Media event loop finished");
    }

    pub fn handle_event(&self, event: MediaEvent) {
        debug!("Media event {:?}", event);

        match event {
            MediaEvent::ProducerClosed {
                peer_id,
                kind,
                producer_id,
            } => self.on_producer_closed(&peer_id, kind, &producer_id),

            MediaEvent::ConsumerClosed {
                peer_id,
                kind,
                consumer_id,
            } => {
                self.registry
                    .with_peer_mut(&peer_id, |peer| peer.take_consumer_if(kind, &consumer_id));
            }

            MediaEvent::ConsumerProducerClosed {
                peer_id,
                kind,
                consumer_id,
            } => {
                let taken = self
                    .registry
                    .with_peer_mut(&peer_id, |peer| peer.take_consumer_if(kind, &consumer_id))
                    .flatten();
                if taken.is_some() {
                    self.notify(&peer_id, kind, consumer_id);
                }
            }
        }
    }

    fn on_producer_closed(&self, peer_id: &PeerId, kind: MediaKind, producer_id: &ProducerId) {
        self.registry
            .with_peer_mut(peer_id, |peer| peer.take_producer_if(kind, producer_id));

        let Some(partner_id) = self.registry.partner_of(peer_id) else {
            return;
        };
        let consumer = self
            .registry
            .with_peer_mut(&partner_id, |partner| {
                partner.take_consumer_of(kind, producer_id)
            })
            .flatten();

        if let Some(consumer) = consumer {
            consumer.close();
            self.notify(&partner_id, kind, consumer.id());
        }
    }

    fn notify(&self, peer_id: &PeerId, kind: MediaKind, consumer_id: ConsumerId) {
        info!("{} producer feeding {} closed", kind, peer_id);
        self.signaling
            .send(peer_id, ServerMessage::ProducerClosed { kind, consumer_id });
    }
}
