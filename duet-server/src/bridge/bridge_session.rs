use crate::bridge::port_allocator::PORTS_PER_ROOM;
use crate::media::{Consumer, PlainTransport};
use duet_core::{CodecInfo, MediaKind, PeerId, RoomId};
use std::sync::Arc;

/// One producer piped into the transcoder over plain RTP.
pub struct BridgeLeg {
    pub peer_id: PeerId,
    pub kind: MediaKind,
    pub port: u16,
    pub codec: CodecInfo,
    pub transport: Arc<dyn PlainTransport>,
    pub consumer: Arc<dyn Consumer>,
}

impl BridgeLeg {
    pub fn rtcp_port(&self) -> u16 {
        self.port + 1
    }
}

/// The RTP bridge of one room. Process-local; never persisted.
pub struct StreamBridgeSession {
    pub room_id: RoomId,
    pub ports: [u16; PORTS_PER_ROOM],
    pub legs: Vec<BridgeLeg>,
}

impl StreamBridgeSession {
    pub fn leg(&self, peer_id: &PeerId, kind: MediaKind) -> Option<&BridgeLeg> {
        self.legs
            .iter()
            .find(|leg| &leg.peer_id == peer_id && leg.kind == kind)
    }

    pub fn close(&self) {
        for leg in &self.legs {
            leg.consumer.close();
            leg.transport.close();
        }
    }
}
