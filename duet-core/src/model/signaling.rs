use crate::model::media::{
    ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportId, TransportParams,
};
use crate::model::peer::PeerId;
use crate::model::room::RoomId;
use serde::{Deserialize, Serialize};

/// Client → server envelope: `{"event": "...", "payload": {...}}`.
///
/// Identifiers the server must resolve are optional on the wire so that a
/// missing one can be told apart from a malformed message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    GetRouterRtpCapabilities,
    CreateWebRtcTransport,
    ConnectWebRtcTransport {
        #[serde(default)]
        transport_id: Option<TransportId>,
        dtls_parameters: DtlsParameters,
    },
    Produce {
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        #[serde(default)]
        transport_id: Option<TransportId>,
    },
    Consume {
        #[serde(default)]
        room_id: Option<RoomId>,
        rtp_capabilities: RtpCapabilities,
        /// Consume a single kind; both kinds when absent.
        #[serde(default)]
        kind: Option<MediaKind>,
    },
    Resume {
        #[serde(default)]
        room_id: Option<RoomId>,
    },
}

impl ClientMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientMessage::GetRouterRtpCapabilities => "getRouterRtpCapabilities",
            ClientMessage::CreateWebRtcTransport => "createWebRtcTransport",
            ClientMessage::ConnectWebRtcTransport { .. } => "connectWebRtcTransport",
            ClientMessage::Produce { .. } => "produce",
            ClientMessage::Consume { .. } => "consume",
            ClientMessage::Resume { .. } => "resume",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransportPair {
    pub send_transport: TransportParams,
    pub receive_transport: TransportParams,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchRole {
    Offerer,
    Answerer,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PartnerProducers {
    pub audio: ProducerId,
    pub video: ProducerId,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchedPayload {
    pub room_id: RoomId,
    pub role: MatchRole,
    pub partner_id: PeerId,
    pub partner_producers: PartnerProducers,
    pub stream_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedPayload {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: RtpParameters,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorPayload {
    pub error: String,
    pub code: String,
}

/// Server → client envelope.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    #[serde(rename = "welcome")]
    Welcome { peer_id: PeerId },
    #[serde(rename = "routerRtpCapabilities")]
    RouterRtpCapabilities(RtpCapabilities),
    #[serde(rename = "webRtcTransportCreated")]
    WebRtcTransportCreated(TransportPair),
    #[serde(rename = "webRtcTransportConnected")]
    WebRtcTransportConnected { transport_id: TransportId },
    #[serde(rename = "produceSuccess")]
    ProduceSuccess {
        producer_id: ProducerId,
        kind: MediaKind,
    },
    #[serde(rename = "waiting-for-user")]
    WaitingForUser {},
    #[serde(rename = "matched")]
    Matched(MatchedPayload),
    #[serde(rename = "consumed")]
    Consumed(ConsumedPayload),
    #[serde(rename = "consumer-resumed")]
    ConsumerResumed { room_id: RoomId },
    #[serde(rename = "producerClosed")]
    ProducerClosed {
        kind: MediaKind,
        consumer_id: ConsumerId,
    },
    #[serde(rename = "error")]
    Error(ErrorPayload),
}

impl ServerMessage {
    pub fn error(code: impl Into<String>, error: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload {
            error: error.into(),
            code: code.into(),
        })
    }
}
