use duet_core::{MediaKind, PeerId, ProducerId, RoomId, TransportId};
use thiserror::Error;

/// Failures reported by the media engine adapter.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("media engine is not initialized")]
    NotInitialized,

    #[error("{0} is closed")]
    Closed(String),

    #[error("unknown producer {0}")]
    UnknownProducer(ProducerId),

    #[error("rtp capabilities cannot consume producer {0}")]
    IncompatibleCapabilities(ProducerId),

    #[error("invalid rtp parameters: {0}")]
    InvalidParameters(String),

    #[error("media engine call failed: {0}")]
    Engine(String),
}

/// Failures of the shared session store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("corrupt room document: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("invalid queue entry `{0}`")]
    InvalidEntry(String),
}

/// Failures while bridging a room into the transcoder.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),

    #[error("peer {0} has no {1} producer")]
    MissingProducer(PeerId, MediaKind),

    #[error("producer {0} has no negotiated codec")]
    NoCodec(ProducerId),

    #[error("no free rtp port block")]
    PortsExhausted,

    #[error("transcoder is not configured")]
    TranscoderDisabled,

    #[error("transcoder rejected start: {0}")]
    Rejected(String),

    #[error("transcoder unreachable: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Outcome taxonomy of one inbound signaling event.
///
/// Only [`SignalingError::ProtocolViolation`] terminates the connection;
/// everything else is reported back to the sender as an `error` event.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("{0}")]
    NotReady(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("failed to create transports: {0}")]
    TransportCreationFailed(MediaError),

    #[error("media engine failure: {0}")]
    AdapterFailure(#[from] MediaError),

    #[error("store failure: {0}")]
    StoreFailure(#[from] StoreError),
}

impl SignalingError {
    pub fn unknown_transport(id: &TransportId) -> Self {
        SignalingError::ProtocolViolation(format!("transport {} does not belong to peer", id))
    }

    pub fn missing_identifier(field: &str) -> Self {
        SignalingError::ProtocolViolation(format!("required identifier `{}` is unset", field))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, SignalingError::ProtocolViolation(_))
    }

    /// Stable machine-readable code sent in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            SignalingError::ProtocolViolation(_) => "ProtocolViolation",
            SignalingError::InvalidMessage(_) => "InvalidMessage",
            SignalingError::NotReady(_) => "NotReady",
            SignalingError::NotFound(_) => "NotFound",
            SignalingError::TransportCreationFailed(_) => "TransportCreationFailed",
            SignalingError::AdapterFailure(_) => "AdapterFailure",
            SignalingError::StoreFailure(_) => "StoreFailure",
        }
    }
}
