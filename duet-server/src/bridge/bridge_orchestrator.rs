use crate::bridge::bridge_session::{BridgeLeg, StreamBridgeSession};
use crate::bridge::port_allocator::{PORTS_PER_ROOM, PortAllocator};
use crate::bridge::session_description::build_session_description;
use crate::bridge::transcoder::{StartRequest, Transcoder};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, MediaError};
use crate::media::{MediaEngine, PlainTransport, PlainTransportOptions, Producer};
use crate::peer::PeerRegistry;
use crate::store::SessionStore;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use duet_core::{MediaKind, PeerId, Room, RoomId, RtpCapabilities};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Order in which a peer's producers are bridged.
const BRIDGE_ORDER: [MediaKind; 2] = [MediaKind::Video, MediaKind::Audio];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStart {
    /// A new session was built and handed to the transcoder.
    Started,
    /// The room has (or had) a bridge already.
    AlreadyBridged,
    /// Not every member holds both producers yet.
    NotReady,
}

enum BridgeSlot {
    Starting,
    Active(StreamBridgeSession),
    Failed,
}

struct BridgeInner {
    media: Arc<dyn MediaEngine>,
    store: Arc<dyn SessionStore>,
    registry: PeerRegistry,
    transcoder: Option<Arc<dyn Transcoder>>,
    config: BridgeConfig,
    ports: PortAllocator,
    sessions: DashMap<RoomId, BridgeSlot>,
}

/// Builds at most one RTP bridge per room and asks the transcoder to start.
#[derive(Clone)]
pub struct BridgeOrchestrator {
    inner: Arc<BridgeInner>,
}

impl BridgeOrchestrator {
    pub fn new(
        media: Arc<dyn MediaEngine>,
        store: Arc<dyn SessionStore>,
        registry: PeerRegistry,
        transcoder: Option<Arc<dyn Transcoder>>,
        config: BridgeConfig,
    ) -> Self {
        let ports = PortAllocator::new(
            config.rtp_port_start,
            config.rtp_port_end,
            config.rtp_port_step,
        );
        if transcoder.is_none() {
            warn!("No transcoder configured; bridges will not be announced");
        }

        Self {
            inner: Arc::new(BridgeInner {
                media,
                store,
                registry,
                transcoder,
                config,
                ports,
                sessions: DashMap::new(),
            }),
        }
    }

    /// Start the bridge in the background. Failures are only logged.
    pub fn trigger(&self, room_id: RoomId) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.start(&room_id).await {
                error!("Bridge for room {} failed: {}", room_id, e);
            }
        });
    }

    pub async fn start(&self, room_id: &RoomId) -> Result<BridgeStart, BridgeError> {
        if self.inner.sessions.contains_key(room_id) {
            return Ok(BridgeStart::AlreadyBridged);
        }

        let room = self
            .inner
            .store
            .load_room(room_id)
            .await?
            .ok_or_else(|| BridgeError::RoomNotFound(room_id.clone()))?;

        let Some(producers) = self.resolve_producers(&room) else {
            return Ok(BridgeStart::NotReady);
        };

        match self.inner.sessions.entry(room_id.clone()) {
            Entry::Occupied(_) => return Ok(BridgeStart::AlreadyBridged),
            Entry::Vacant(slot) => {
                slot.insert(BridgeSlot::Starting);
            }
        }

        let session = match self.build_session(&room, producers).await {
            Ok(session) => session,
            Err(e) => {
                self.inner
                    .sessions
                    .insert(room_id.clone(), BridgeSlot::Failed);
                return Err(e);
            }
        };

        let sdp = build_session_description(&session, self.inner.config.transcoder_ip);
        let request = match StartRequest::from_session(&session, &room.users, sdp) {
            Ok(request) => request,
            Err(e) => {
                session.close();
                self.inner.ports.release(&session.ports).await;
                self.inner
                    .sessions
                    .insert(room_id.clone(), BridgeSlot::Failed);
                return Err(e);
            }
        };

        // Teardown may have run while the legs were being built.
        let orphaned = match self.inner.sessions.get_mut(room_id) {
            Some(mut slot) if matches!(*slot, BridgeSlot::Starting) => {
                *slot = BridgeSlot::Active(session);
                None
            }
            _ => Some(session),
        };
        if let Some(session) = orphaned {
            info!("Room {} ended while bridging", room_id);
            session.close();
            self.inner.ports.release(&session.ports).await;
            return Ok(BridgeStart::Started);
        }
        info!(
            "Bridged room {} with {} streams",
            room_id,
            request.descriptor_count()
        );

        match &self.inner.transcoder {
            Some(transcoder) => transcoder.start(&request).await?,
            None => warn!("{}; room {} not announced", BridgeError::TranscoderDisabled, room_id),
        }
        Ok(BridgeStart::Started)
    }

    /// Close the room's bridge and free its ports. Safe to call repeatedly.
    pub async fn teardown(&self, room_id: &RoomId) {
        let Some((_, slot)) = self.inner.sessions.remove(room_id) else {
            return;
        };
        if let BridgeSlot::Active(session) = slot {
            session.close();
            self.inner.ports.release(&session.ports).await;
            info!("Tore down bridge of room {}", room_id);
        }
    }

    pub fn is_bridged(&self, room_id: &RoomId) -> bool {
        self.inner
            .sessions
            .get(room_id)
            .is_some_and(|slot| matches!(*slot, BridgeSlot::Active(_)))
    }

    /// Ports of the active bridge of `room_id`, in leg order.
    pub fn ports_of(&self, room_id: &RoomId) -> Option<Vec<u16>> {
        let slot = self.inner.sessions.get(room_id)?;
        match &*slot {
            BridgeSlot::Active(session) => {
                Some(session.legs.iter().map(|leg| leg.port).collect())
            }
            _ => None,
        }
    }

    fn resolve_producers(&self, room: &Room) -> Option<Vec<(PeerId, Arc<dyn Producer>)>> {
        let mut producers = Vec::with_capacity(PORTS_PER_ROOM);
        for user in &room.users {
            for kind in BRIDGE_ORDER {
                let producer = self
                    .inner
                    .registry
                    .with_peer(user, |peer| peer.producer(kind).cloned())
                    .flatten()?;
                producers.push((user.clone(), producer));
            }
        }
        Some(producers)
    }

    async fn build_session(
        &self,
        room: &Room,
        producers: Vec<(PeerId, Arc<dyn Producer>)>,
    ) -> Result<StreamBridgeSession, BridgeError> {
        let ports = self
            .inner
            .ports
            .allocate()
            .await
            .ok_or(BridgeError::PortsExhausted)?;

        let mut legs = Vec::with_capacity(PORTS_PER_ROOM);
        for ((peer_id, producer), port) in producers.into_iter().zip(ports) {
            match self.build_leg(peer_id, producer, port).await {
                Ok(leg) => legs.push(leg),
                Err(e) => {
                    for leg in &legs {
                        leg.consumer.close();
                        leg.transport.close();
                    }
                    self.inner.ports.release(&ports).await;
                    return Err(e);
                }
            }
        }

        Ok(StreamBridgeSession {
            room_id: room.id.clone(),
            ports,
            legs,
        })
    }

    async fn build_leg(
        &self,
        peer_id: PeerId,
        producer: Arc<dyn Producer>,
        port: u16,
    ) -> Result<BridgeLeg, BridgeError> {
        let config = &self.inner.config;
        let capabilities = self
            .inner
            .media
            .rtp_capabilities()
            .ok_or(MediaError::NotInitialized)?;

        let transport = self
            .inner
            .media
            .create_plain_transport(PlainTransportOptions {
                listen_ip: config.local_bind_ip,
                rtcp_mux: false,
                comedia: false,
            })
            .await?;

        let leg = self
            .attach_leg(&transport, &capabilities, peer_id, producer, port)
            .await;
        if leg.is_err() {
            transport.close();
        }
        leg
    }

    async fn attach_leg(
        &self,
        transport: &Arc<dyn PlainTransport>,
        capabilities: &RtpCapabilities,
        peer_id: PeerId,
        producer: Arc<dyn Producer>,
        port: u16,
    ) -> Result<BridgeLeg, BridgeError> {
        transport
            .connect(self.inner.config.transcoder_ip, port, Some(port + 1))
            .await?;
        let consumer = transport
            .consume(&producer.id(), capabilities, false)
            .await?;

        let Some(codec) = consumer.rtp_parameters().primary_codec() else {
            consumer.close();
            return Err(BridgeError::NoCodec(producer.id()));
        };
        Ok(BridgeLeg {
            peer_id,
            kind: producer.kind(),
            port,
            codec,
            transport: transport.clone(),
            consumer,
        })
    }
}
