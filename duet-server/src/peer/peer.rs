use crate::media::{Consumer, Producer, WebRtcTransport};
use duet_core::{ConsumerId, MediaKind, PeerId, ProducerId, RoomId, TransportId};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

/// Where a peer stands with respect to the waiting queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchState {
    /// Not yet asked to be matched (or a matching attempt failed closed).
    Idle,
    /// A matchmaking attempt for this peer is in flight.
    Matching,
    /// Queued in the store, or left waiting after a stale partner.
    Waiting,
    Matched,
}

/// Coarse negotiation progress, derived from the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    Connected,
    CapabilitiesExchanged,
    TransportsCreated,
    TransportsConnected,
    Producing,
    WaitingOrMatched,
    Consuming,
    Consumed,
}

#[derive(Clone)]
pub struct TransportSlot {
    pub transport: Arc<dyn WebRtcTransport>,
    pub connected: bool,
}

impl TransportSlot {
    pub fn new(transport: Arc<dyn WebRtcTransport>) -> Self {
        Self {
            transport,
            connected: false,
        }
    }

    pub fn id(&self) -> TransportId {
        self.transport.id()
    }
}

/// Connection-scoped media state of one peer.
pub struct Peer {
    pub id: PeerId,
    pub capabilities_exchanged: bool,
    pub send_transport: Option<TransportSlot>,
    pub receive_transport: Option<TransportSlot>,
    pub audio_producer: Option<Arc<dyn Producer>>,
    pub video_producer: Option<Arc<dyn Producer>>,
    pub audio_consumer: Option<Arc<dyn Consumer>>,
    pub video_consumer: Option<Arc<dyn Consumer>>,
    pub room_id: Option<RoomId>,
    pub match_state: MatchState,
}

impl Peer {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            capabilities_exchanged: false,
            send_transport: None,
            receive_transport: None,
            audio_producer: None,
            video_producer: None,
            audio_consumer: None,
            video_consumer: None,
            room_id: None,
            match_state: MatchState::Idle,
        }
    }

    pub fn transport(&self, direction: Direction) -> Option<&TransportSlot> {
        match direction {
            Direction::Send => self.send_transport.as_ref(),
            Direction::Receive => self.receive_transport.as_ref(),
        }
    }

    /// Which of the two owned transports carries `id`, if any.
    pub fn transport_direction(&self, id: &TransportId) -> Option<Direction> {
        if self.send_transport.as_ref().is_some_and(|t| &t.id() == id) {
            return Some(Direction::Send);
        }
        if self.receive_transport.as_ref().is_some_and(|t| &t.id() == id) {
            return Some(Direction::Receive);
        }
        None
    }

    pub fn mark_connected(&mut self, direction: Direction) {
        let slot = match direction {
            Direction::Send => self.send_transport.as_mut(),
            Direction::Receive => self.receive_transport.as_mut(),
        };
        if let Some(slot) = slot {
            slot.connected = true;
        }
    }

    pub fn producer(&self, kind: MediaKind) -> Option<&Arc<dyn Producer>> {
        match kind {
            MediaKind::Audio => self.audio_producer.as_ref(),
            MediaKind::Video => self.video_producer.as_ref(),
        }
    }

    fn producer_slot(&mut self, kind: MediaKind) -> &mut Option<Arc<dyn Producer>> {
        match kind {
            MediaKind::Audio => &mut self.audio_producer,
            MediaKind::Video => &mut self.video_producer,
        }
    }

    /// Store `producer` for its kind, returning the one it replaces.
    pub fn set_producer(
        &mut self,
        kind: MediaKind,
        producer: Arc<dyn Producer>,
    ) -> Option<Arc<dyn Producer>> {
        self.producer_slot(kind).replace(producer)
    }

    /// Clear the slot only if it still holds `producer_id`.
    pub fn take_producer_if(
        &mut self,
        kind: MediaKind,
        producer_id: &ProducerId,
    ) -> Option<Arc<dyn Producer>> {
        let slot = self.producer_slot(kind);
        if slot.as_ref().is_some_and(|p| &p.id() == producer_id) {
            return slot.take();
        }
        None
    }

    pub fn has_all_producers(&self) -> bool {
        self.audio_producer.is_some() && self.video_producer.is_some()
    }

    pub fn consumer(&self, kind: MediaKind) -> Option<&Arc<dyn Consumer>> {
        match kind {
            MediaKind::Audio => self.audio_consumer.as_ref(),
            MediaKind::Video => self.video_consumer.as_ref(),
        }
    }

    fn consumer_slot(&mut self, kind: MediaKind) -> &mut Option<Arc<dyn Consumer>> {
        match kind {
            MediaKind::Audio => &mut self.audio_consumer,
            MediaKind::Video => &mut self.video_consumer,
        }
    }

    pub fn set_consumer(&mut self, kind: MediaKind, consumer: Arc<dyn Consumer>) {
        *self.consumer_slot(kind) = Some(consumer);
    }

    pub fn take_consumer_if(
        &mut self,
        kind: MediaKind,
        consumer_id: &ConsumerId,
    ) -> Option<Arc<dyn Consumer>> {
        let slot = self.consumer_slot(kind);
        if slot.as_ref().is_some_and(|c| &c.id() == consumer_id) {
            return slot.take();
        }
        None
    }

    /// Clear the consumer of `kind` if it reads from `producer_id`.
    pub fn take_consumer_of(
        &mut self,
        kind: MediaKind,
        producer_id: &ProducerId,
    ) -> Option<Arc<dyn Consumer>> {
        let slot = self.consumer_slot(kind);
        if slot.as_ref().is_some_and(|c| &c.producer_id() == producer_id) {
            return slot.take();
        }
        None
    }

    pub fn state(&self) -> SessionState {
        let consumers = [&self.audio_consumer, &self.video_consumer];
        if consumers.iter().all(|c| c.as_ref().is_some_and(|c| !c.is_paused())) {
            return SessionState::Consumed;
        }
        if consumers.iter().any(|c| c.is_some()) {
            return SessionState::Consuming;
        }
        if matches!(self.match_state, MatchState::Waiting | MatchState::Matched) {
            return SessionState::WaitingOrMatched;
        }
        if self.audio_producer.is_some() || self.video_producer.is_some() {
            return SessionState::Producing;
        }
        match (&self.send_transport, &self.receive_transport) {
            (Some(s), Some(r)) if s.connected && r.connected => SessionState::TransportsConnected,
            (Some(_), Some(_)) => SessionState::TransportsCreated,
            _ if self.capabilities_exchanged => SessionState::CapabilitiesExchanged,
            _ => SessionState::Connected,
        }
    }

    /// Close both owned transports. Safe to call repeatedly.
    pub fn close_transports(&self) {
        for slot in [&self.send_transport, &self.receive_transport]
            .into_iter()
            .flatten()
        {
            slot.transport.close();
        }
    }
}
