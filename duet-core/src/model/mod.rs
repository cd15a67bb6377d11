mod media;
mod peer;
mod room;
mod signaling;

pub use media::{
    CodecInfo, ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportId, TransportParams,
};
pub use peer::PeerId;
pub use room::{Room, RoomId};
pub use signaling::{
    ClientMessage, ConsumedPayload, ErrorPayload, MatchRole, MatchedPayload, PartnerProducers,
    ServerMessage, TransportPair,
};
