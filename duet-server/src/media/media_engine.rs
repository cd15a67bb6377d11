use crate::error::MediaError;
use async_trait::async_trait;
use duet_core::{
    ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportId, TransportParams,
};
use std::net::IpAddr;
use std::sync::Arc;

/// One-shot callback fired when the owning media object goes away.
pub type CloseHook = Box<dyn FnOnce() + Send + 'static>;

/// Capability surface of the external media-routing engine (one router).
///
/// Every handle returned here has an idempotent `close()`. Hooks registered
/// on an object that is already closed fire immediately.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    /// Router codec capabilities, `None` until the engine is initialised.
    fn rtp_capabilities(&self) -> Option<RtpCapabilities>;

    /// Whether a device with `capabilities` can receive `producer_id`.
    fn can_consume(&self, producer_id: &ProducerId, capabilities: &RtpCapabilities) -> bool;

    async fn create_webrtc_transport(&self) -> Result<Arc<dyn WebRtcTransport>, MediaError>;

    /// RTP-sink transport used to push media to an external receiver.
    async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<Arc<dyn PlainTransport>, MediaError>;
}

#[async_trait]
pub trait WebRtcTransport: Send + Sync {
    fn id(&self) -> TransportId;

    fn params(&self) -> TransportParams;

    /// Finish the DTLS handshake with the client's parameters.
    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), MediaError>;

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn Producer>, MediaError>;

    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn Consumer>, MediaError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainTransportOptions {
    pub listen_ip: IpAddr,
    pub rtcp_mux: bool,
    pub comedia: bool,
}

#[async_trait]
pub trait PlainTransport: Send + Sync {
    fn id(&self) -> TransportId;

    /// Point the transport at a fixed remote receiver.
    async fn connect(
        &self,
        ip: IpAddr,
        port: u16,
        rtcp_port: Option<u16>,
    ) -> Result<(), MediaError>;

    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn Consumer>, MediaError>;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

pub trait Producer: Send + Sync {
    fn id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    fn close(&self);

    fn is_closed(&self) -> bool;

    fn on_transport_close(&self, hook: CloseHook);
}

#[async_trait]
pub trait Consumer: Send + Sync {
    fn id(&self) -> ConsumerId;

    fn producer_id(&self) -> ProducerId;

    fn kind(&self) -> MediaKind;

    fn rtp_parameters(&self) -> RtpParameters;

    fn is_paused(&self) -> bool;

    async fn resume(&self) -> Result<(), MediaError>;

    fn close(&self);

    fn is_closed(&self) -> bool;

    fn on_transport_close(&self, hook: CloseHook);

    fn on_producer_close(&self, hook: CloseHook);
}
