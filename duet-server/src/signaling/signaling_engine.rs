use crate::bridge::{BridgeOrchestrator, Transcoder};
use crate::config::ServerConfig;
use crate::error::{MediaError, SignalingError};
use crate::media::{MediaEngine, MediaEvent};
use crate::peer::{MatchState, Peer, PeerRegistry, TransportSlot};
use crate::room::{MatchOutcome, Matchmaker, MediaEventLoop};
use crate::signaling::SignalingOutput;
use crate::store::SessionStore;
use duet_core::{
    ClientMessage, ConsumedPayload, DtlsParameters, MediaKind, PeerId, RoomId, RtpCapabilities,
    RtpParameters, ServerMessage, TransportId, TransportPair,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// What the connection layer should do after an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Terminate,
}

struct EngineInner {
    media: Arc<dyn MediaEngine>,
    store: Arc<dyn SessionStore>,
    registry: PeerRegistry,
    signaling: Arc<dyn SignalingOutput>,
    matchmaker: Matchmaker,
    bridge: BridgeOrchestrator,
    event_tx: mpsc::UnboundedSender<MediaEvent>,
}

/// Per-peer protocol state machine shared by all connections.
///
/// The connection layer feeds one peer's messages strictly in order; messages
/// of different peers may be handled concurrently.
#[derive(Clone)]
pub struct SignalingEngine {
    inner: Arc<EngineInner>,
}

impl SignalingEngine {
    /// Wire the collaborators together and spawn the media event loop, so
    /// this must run inside a tokio runtime.
    pub fn new(
        config: &ServerConfig,
        media: Arc<dyn MediaEngine>,
        store: Arc<dyn SessionStore>,
        signaling: Arc<dyn SignalingOutput>,
        transcoder: Option<Arc<dyn Transcoder>>,
    ) -> Self {
        let registry = PeerRegistry::new();
        let bridge = BridgeOrchestrator::new(
            media.clone(),
            store.clone(),
            registry.clone(),
            transcoder,
            config.bridge.clone(),
        );
        let matchmaker = Matchmaker::new(
            store.clone(),
            registry.clone(),
            signaling.clone(),
            bridge.clone(),
            config.stream_base_url.clone(),
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(MediaEventLoop::new(registry.clone(), signaling.clone(), event_rx).run());

        Self {
            inner: Arc::new(EngineInner {
                media,
                store,
                registry,
                signaling,
                matchmaker,
                bridge,
                event_tx,
            }),
        }
    }

    pub fn registry(&self) -> &PeerRegistry {
        &self.inner.registry
    }

    pub fn bridge(&self) -> &BridgeOrchestrator {
        &self.inner.bridge
    }

    /// Register a freshly opened connection and greet it.
    pub fn connect(&self, peer_id: &PeerId) {
        self.inner.registry.register(peer_id.clone());
        info!("Peer {} connected", peer_id);
        self.inner.signaling.send(
            peer_id,
            ServerMessage::Welcome {
                peer_id: peer_id.clone(),
            },
        );
    }

    pub async fn handle_text(&self, peer_id: &PeerId, text: &str) -> Flow {
        match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => self.handle_message(peer_id, message).await,
            Err(e) => {
                warn!("Invalid message from {}: {}", peer_id, e);
                self.report(peer_id, &SignalingError::InvalidMessage(e.to_string()));
                Flow::Continue
            }
        }
    }

    pub async fn handle_message(&self, peer_id: &PeerId, message: ClientMessage) -> Flow {
        let event = message.event_name();
        debug!("{} <- {}", peer_id, event);

        match self.dispatch(peer_id, message).await {
            Ok(()) => {
                if let Some(state) = self.inner.registry.with_peer(peer_id, Peer::state) {
                    debug!("{} is {:?}", peer_id, state);
                }
                Flow::Continue
            }
            Err(e) if e.is_fatal() => {
                warn!("Terminating {} after {}: {}", peer_id, event, e);
                Flow::Terminate
            }
            Err(e) => {
                warn!("{} from {} failed: {}", event, peer_id, e);
                self.report(peer_id, &e);
                Flow::Continue
            }
        }
    }

    async fn dispatch(&self, peer_id: &PeerId, message: ClientMessage) -> Result<(), SignalingError> {
        if !self.inner.registry.contains(peer_id) {
            return Err(unknown_peer(peer_id));
        }

        match message {
            ClientMessage::GetRouterRtpCapabilities => self.get_capabilities(peer_id),
            ClientMessage::CreateWebRtcTransport => self.create_transports(peer_id).await,
            ClientMessage::ConnectWebRtcTransport {
                transport_id,
                dtls_parameters,
            } => {
                self.connect_transport(peer_id, transport_id.as_ref(), dtls_parameters)
                    .await
            }
            ClientMessage::Produce {
                kind,
                rtp_parameters,
                transport_id,
            } => {
                self.produce(peer_id, kind, rtp_parameters, transport_id.as_ref())
                    .await
            }
            ClientMessage::Consume {
                room_id,
                rtp_capabilities,
                kind: Some(kind),
            } => {
                self.consume(peer_id, room_id.as_ref(), kind, &rtp_capabilities)
                    .await
            }
            ClientMessage::Consume {
                room_id,
                rtp_capabilities,
                kind: None,
            } => {
                self.consume_all(peer_id, room_id.as_ref(), &rtp_capabilities)
                    .await
            }
            ClientMessage::Resume { room_id } => self.resume(peer_id, room_id.as_ref()).await,
        }
    }

    pub fn get_capabilities(&self, peer_id: &PeerId) -> Result<(), SignalingError> {
        let Some(capabilities) = self.inner.media.rtp_capabilities() else {
            error!(
                "Media engine is not initialized; ignoring capability request of {}",
                peer_id
            );
            return Ok(());
        };

        self.with_peer_mut(peer_id, |peer| peer.capabilities_exchanged = true)?;
        self.inner
            .signaling
            .send(peer_id, ServerMessage::RouterRtpCapabilities(capabilities));
        Ok(())
    }

    pub async fn create_transports(&self, peer_id: &PeerId) -> Result<(), SignalingError> {
        let previous = self.with_peer_mut(peer_id, |peer| {
            [peer.send_transport.take(), peer.receive_transport.take()]
        })?;
        for slot in previous.into_iter().flatten() {
            debug!("Closing previous transport {} of {}", slot.id(), peer_id);
            slot.transport.close();
        }

        let media = &self.inner.media;
        let send = media
            .create_webrtc_transport()
            .await
            .map_err(SignalingError::TransportCreationFailed)?;
        let receive = match media.create_webrtc_transport().await {
            Ok(transport) => transport,
            Err(e) => {
                send.close();
                return Err(SignalingError::TransportCreationFailed(e));
            }
        };

        let stored = self.inner.registry.with_peer_mut(peer_id, |peer| {
            peer.send_transport = Some(TransportSlot::new(send.clone()));
            peer.receive_transport = Some(TransportSlot::new(receive.clone()));
        });
        if stored.is_none() {
            send.close();
            receive.close();
            return Ok(());
        }

        info!(
            "Created transports for {}: send {}, receive {}",
            peer_id,
            send.id(),
            receive.id()
        );
        self.inner.signaling.send(
            peer_id,
            ServerMessage::WebRtcTransportCreated(TransportPair {
                send_transport: send.params(),
                receive_transport: receive.params(),
            }),
        );
        Ok(())
    }

    pub async fn connect_transport(
        &self,
        peer_id: &PeerId,
        transport_id: Option<&TransportId>,
        dtls_parameters: DtlsParameters,
    ) -> Result<(), SignalingError> {
        let transport_id =
            transport_id.ok_or_else(|| SignalingError::missing_identifier("transportId"))?;

        let (direction, transport) = self
            .with_peer(peer_id, |peer| {
                let direction = peer.transport_direction(transport_id)?;
                let slot = peer.transport(direction)?;
                Some((direction, slot.transport.clone()))
            })?
            .ok_or_else(|| SignalingError::unknown_transport(transport_id))?;

        transport.connect(dtls_parameters).await?;

        self.inner.registry.with_peer_mut(peer_id, |peer| {
            if peer.transport_direction(transport_id) == Some(direction) {
                peer.mark_connected(direction);
            }
        });
        debug!("Connected {:?} transport {} of {}", direction, transport_id, peer_id);

        self.inner.signaling.send(
            peer_id,
            ServerMessage::WebRtcTransportConnected {
                transport_id: transport_id.clone(),
            },
        );
        Ok(())
    }

    pub async fn produce(
        &self,
        peer_id: &PeerId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        transport_id: Option<&TransportId>,
    ) -> Result<(), SignalingError> {
        let slot = self
            .with_peer(peer_id, |peer| peer.send_transport.clone())?
            .ok_or_else(|| SignalingError::NotReady("send transport has not been created".into()))?;

        if let Some(id) = transport_id
            && *id != slot.id()
        {
            return Err(SignalingError::unknown_transport(id));
        }
        if !slot.connected {
            return Err(SignalingError::NotReady(
                "send transport is not connected".into(),
            ));
        }

        let producer = slot.transport.produce(kind, rtp_parameters).await?;
        let producer_id = producer.id();

        let events = self.inner.event_tx.clone();
        let owner = peer_id.clone();
        let closed_id = producer_id.clone();
        producer.on_transport_close(Box::new(move || {
            let _ = events.send(MediaEvent::ProducerClosed {
                peer_id: owner,
                kind,
                producer_id: closed_id,
            });
        }));

        let stored = self.inner.registry.with_peer_mut(peer_id, |peer| {
            let replaced = peer.set_producer(kind, producer.clone());
            (
                replaced,
                peer.has_all_producers(),
                peer.match_state,
                peer.room_id.clone(),
            )
        });
        let Some((replaced, complete, match_state, room_id)) = stored else {
            producer.close();
            return Ok(());
        };
        if let Some(old) = replaced {
            info!("Replacing {} producer {} of {}", kind, old.id(), peer_id);
            old.close();
        }

        info!("Peer {} produces {} as {}", peer_id, kind, producer_id);
        self.inner
            .signaling
            .send(peer_id, ServerMessage::ProduceSuccess { producer_id, kind });

        if !complete {
            return Ok(());
        }
        match (match_state, room_id) {
            (MatchState::Idle, _) => {
                let outcome = self.inner.matchmaker.request_match(peer_id).await;
                debug!("Matchmaking for {} ended with {:?}", peer_id, outcome);
                if let MatchOutcome::StoreUnavailable = outcome {
                    warn!("Peer {} stays unmatched until it produces again", peer_id);
                }
            }
            (_, Some(room_id)) => self.inner.bridge.trigger(room_id),
            _ => {}
        }
        Ok(())
    }

    pub async fn consume(
        &self,
        peer_id: &PeerId,
        room_id: Option<&RoomId>,
        kind: MediaKind,
        capabilities: &RtpCapabilities,
    ) -> Result<(), SignalingError> {
        let room_id = room_id.ok_or_else(|| SignalingError::missing_identifier("roomId"))?;

        let room = self.inner.store.load_room(room_id).await?;
        let partner_id = room
            .as_ref()
            .and_then(|room| room.partner_of(peer_id))
            .cloned()
            .ok_or_else(|| SignalingError::NotFound(format!("room {}", room_id)))?;

        let producer = self
            .inner
            .registry
            .with_peer(&partner_id, |partner| partner.producer(kind).cloned())
            .flatten()
            .ok_or_else(|| {
                SignalingError::NotFound(format!("{} producer of partner {}", kind, partner_id))
            })?;

        let (receive, duplicate) = self.with_peer(peer_id, |peer| {
            (peer.receive_transport.clone(), peer.consumer(kind).is_some())
        })?;
        if duplicate {
            return Err(SignalingError::InvalidMessage(format!(
                "already consuming {}",
                kind
            )));
        }
        let receive = receive.ok_or_else(|| {
            SignalingError::NotReady("receive transport has not been created".into())
        })?;
        if !receive.connected {
            return Err(SignalingError::NotReady(
                "receive transport is not connected".into(),
            ));
        }
        if !self.inner.media.can_consume(&producer.id(), capabilities) {
            return Err(MediaError::IncompatibleCapabilities(producer.id()).into());
        }

        let consumer = receive
            .transport
            .consume(&producer.id(), capabilities, true)
            .await?;
        let consumer_id = consumer.id();

        let events = self.inner.event_tx.clone();
        let owner = peer_id.clone();
        let closed_id = consumer_id.clone();
        consumer.on_transport_close(Box::new(move || {
            let _ = events.send(MediaEvent::ConsumerClosed {
                peer_id: owner,
                kind,
                consumer_id: closed_id,
            });
        }));
        let events = self.inner.event_tx.clone();
        let owner = peer_id.clone();
        let closed_id = consumer_id.clone();
        consumer.on_producer_close(Box::new(move || {
            let _ = events.send(MediaEvent::ConsumerProducerClosed {
                peer_id: owner,
                kind,
                consumer_id: closed_id,
            });
        }));

        let stored = self.inner.registry.with_peer_mut(peer_id, |peer| {
            if peer.consumer(kind).is_some() {
                return false;
            }
            peer.set_consumer(kind, consumer.clone());
            true
        });
        match stored {
            Some(true) => {}
            Some(false) => {
                consumer.close();
                return Err(SignalingError::InvalidMessage(format!(
                    "already consuming {}",
                    kind
                )));
            }
            None => {
                consumer.close();
                return Ok(());
            }
        }

        info!(
            "Peer {} consumes {} of {} as {}",
            peer_id, kind, partner_id, consumer_id
        );
        self.inner.signaling.send(
            peer_id,
            ServerMessage::Consumed(ConsumedPayload {
                id: consumer_id,
                producer_id: producer.id(),
                kind,
                rtp_parameters: consumer.rtp_parameters(),
            }),
        );
        Ok(())
    }

    /// Consume audio then video. A failed kind is reported on its own and
    /// does not stop the other.
    pub async fn consume_all(
        &self,
        peer_id: &PeerId,
        room_id: Option<&RoomId>,
        capabilities: &RtpCapabilities,
    ) -> Result<(), SignalingError> {
        for kind in MediaKind::ALL {
            match self.consume(peer_id, room_id, kind, capabilities).await {
                Ok(()) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Consuming {} for {} failed: {}", kind, peer_id, e);
                    self.report(peer_id, &e);
                }
            }
        }
        Ok(())
    }

    pub async fn resume(
        &self,
        peer_id: &PeerId,
        room_id: Option<&RoomId>,
    ) -> Result<(), SignalingError> {
        let room_id = room_id.ok_or_else(|| SignalingError::missing_identifier("roomId"))?;

        let (own_room, audio, video) = self.with_peer(peer_id, |peer| {
            (
                peer.room_id.clone(),
                peer.audio_consumer.clone(),
                peer.video_consumer.clone(),
            )
        })?;
        if own_room.as_ref() != Some(room_id) {
            return Err(SignalingError::NotFound(format!("room {}", room_id)));
        }
        let (Some(audio), Some(video)) = (audio, video) else {
            return Err(SignalingError::NotReady(
                "both consumers must exist before resume".into(),
            ));
        };

        let (audio_resumed, video_resumed) = tokio::join!(audio.resume(), video.resume());
        audio_resumed?;
        video_resumed?;

        info!("Peer {} resumed consumers in room {}", peer_id, room_id);
        self.inner.signaling.send(
            peer_id,
            ServerMessage::ConsumerResumed {
                room_id: room_id.clone(),
            },
        );
        Ok(())
    }

    /// Connection-close operation. Idempotent.
    pub async fn disconnect(&self, peer_id: &PeerId) {
        let Some(peer) = self.inner.registry.remove(peer_id) else {
            return;
        };
        let state = peer.state();
        peer.close_transports();

        if let Err(e) = self.inner.store.remove_from_queue(peer_id).await {
            error!("Failed to remove {} from the waiting queue: {}", peer_id, e);
        }
        if let Some(room_id) = &peer.room_id {
            self.inner.bridge.teardown(room_id).await;
        }

        info!("Peer {} disconnected while {:?}", peer_id, state);
    }

    fn report(&self, peer_id: &PeerId, error: &SignalingError) {
        self.inner
            .signaling
            .send(peer_id, ServerMessage::error(error.code(), error.to_string()));
    }

    fn with_peer<R>(
        &self,
        peer_id: &PeerId,
        f: impl FnOnce(&Peer) -> R,
    ) -> Result<R, SignalingError> {
        self.inner
            .registry
            .with_peer(peer_id, f)
            .ok_or_else(|| unknown_peer(peer_id))
    }

    fn with_peer_mut<R>(
        &self,
        peer_id: &PeerId,
        f: impl FnOnce(&mut Peer) -> R,
    ) -> Result<R, SignalingError> {
        self.inner
            .registry
            .with_peer_mut(peer_id, f)
            .ok_or_else(|| unknown_peer(peer_id))
    }
}

fn unknown_peer(peer_id: &PeerId) -> SignalingError {
    SignalingError::ProtocolViolation(format!("peer {} is not registered", peer_id))
}
