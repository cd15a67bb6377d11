use crate::error::MediaError;
use crate::media::close_hooks::{Hooks, lock};
use crate::media::media_engine::{
    CloseHook, Consumer, MediaEngine, PlainTransport, PlainTransportOptions, Producer,
    WebRtcTransport,
};
use async_trait::async_trait;
use duet_core::{
    ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportId, TransportParams,
};
use mediasoup::prelude as ms;
use mediasoup::prelude::Transport as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::net::IpAddr;
use std::num::{NonZeroU8, NonZeroU32};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, error, info};

/// Router codecs: opus, VP8 and H264 (constrained baseline).
pub fn media_codecs() -> Vec<ms::RtpCodecCapability> {
    let video_feedback = || {
        vec![
            ms::RtcpFeedback::Nack,
            ms::RtcpFeedback::NackPli,
            ms::RtcpFeedback::CcmFir,
            ms::RtcpFeedback::GoogRemb,
            ms::RtcpFeedback::TransportCc,
        ]
    };
    let video_clock = NonZeroU32::new(90_000).unwrap_or(NonZeroU32::MIN);

    vec![
        ms::RtpCodecCapability::Audio {
            mime_type: ms::MimeTypeAudio::Opus,
            preferred_payload_type: None,
            clock_rate: NonZeroU32::new(48_000).unwrap_or(NonZeroU32::MIN),
            channels: NonZeroU8::new(2).unwrap_or(NonZeroU8::MIN),
            parameters: ms::RtpCodecParametersParameters::from([("useinbandfec", 1_u32.into())]),
            rtcp_feedback: vec![ms::RtcpFeedback::TransportCc],
        },
        ms::RtpCodecCapability::Video {
            mime_type: ms::MimeTypeVideo::Vp8,
            preferred_payload_type: None,
            clock_rate: video_clock,
            parameters: ms::RtpCodecParametersParameters::from([(
                "x-google-start-bitrate",
                1000_u32.into(),
            )]),
            rtcp_feedback: video_feedback(),
        },
        ms::RtpCodecCapability::Video {
            mime_type: ms::MimeTypeVideo::H264,
            preferred_payload_type: None,
            clock_rate: video_clock,
            parameters: ms::RtpCodecParametersParameters::from([
                ("packetization-mode", 1_u32.into()),
                ("profile-level-id", "42e01f".into()),
                ("level-asymmetry-allowed", 1_u32.into()),
            ]),
            rtcp_feedback: video_feedback(),
        },
    ]
}

fn engine_error(what: &str, err: impl std::fmt::Display) -> MediaError {
    MediaError::Engine(format!("{what}: {err}"))
}

/// Read one of our JSON documents as the engine's typed value.
fn from_document<T: DeserializeOwned>(what: &str, value: &Value) -> Result<T, MediaError> {
    serde_json::from_value(value.clone())
        .map_err(|e| MediaError::InvalidParameters(format!("{what}: {e}")))
}

fn to_document<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn engine_producer_id(id: &ProducerId) -> Result<ms::ProducerId, MediaError> {
    serde_json::from_value(Value::String(id.0.clone()))
        .map_err(|_| MediaError::UnknownProducer(id.clone()))
}

fn engine_kind(kind: MediaKind) -> ms::MediaKind {
    match kind {
        MediaKind::Audio => ms::MediaKind::Audio,
        MediaKind::Video => ms::MediaKind::Video,
    }
}

fn our_kind(kind: ms::MediaKind) -> MediaKind {
    match kind {
        ms::MediaKind::Audio => MediaKind::Audio,
        ms::MediaKind::Video => MediaKind::Video,
    }
}

fn listen_info(ip: IpAddr, announced_ip: Option<IpAddr>) -> ms::ListenInfo {
    ms::ListenInfo {
        protocol: ms::Protocol::Udp,
        ip,
        announced_address: announced_ip.map(|ip| ip.to_string()),
        expose_internal_ip: false,
        port: None,
        port_range: None,
        flags: None,
        send_buffer_size: None,
        recv_buffer_size: None,
    }
}

/// Media engine backed by one mediasoup worker and one router.
///
/// mediasoup closes an object when its last handle is dropped, so every
/// wrapper below keeps its handle in an `Option` and `close()` takes it.
pub struct MediasoupEngine {
    router: ms::Router,
    capabilities: RtpCapabilities,
    listen_ip: IpAddr,
    announced_ip: Option<IpAddr>,
    _worker: ms::Worker,
    _worker_manager: ms::WorkerManager,
}

impl MediasoupEngine {
    /// Spawn the worker and create the router.
    pub async fn start(
        listen_ip: IpAddr,
        announced_ip: Option<IpAddr>,
    ) -> Result<Self, MediaError> {
        let worker_manager = ms::WorkerManager::new();
        let worker = worker_manager
            .create_worker(ms::WorkerSettings::default())
            .await
            .map_err(|e| engine_error("failed to create worker", e))?;
        worker
            .on_close(|| error!("mediasoup worker closed"))
            .detach();

        let router = worker
            .create_router(ms::RouterOptions::new(media_codecs()))
            .await
            .map_err(|e| engine_error("failed to create router", e))?;
        let capabilities = RtpCapabilities(to_document(&router.rtp_capabilities()));

        info!(
            "mediasoup router {} ready on {} (announced {:?})",
            router.id(),
            listen_ip,
            announced_ip
        );

        Ok(Self {
            router,
            capabilities,
            listen_ip,
            announced_ip,
            _worker: worker,
            _worker_manager: worker_manager,
        })
    }
}

#[async_trait]
impl MediaEngine for MediasoupEngine {
    fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        Some(self.capabilities.clone())
    }

    fn can_consume(&self, producer_id: &ProducerId, capabilities: &RtpCapabilities) -> bool {
        let Ok(producer_id) = engine_producer_id(producer_id) else {
            return false;
        };
        let Ok(capabilities) =
            from_document::<ms::RtpCapabilities>("rtpCapabilities", &capabilities.0)
        else {
            return false;
        };
        self.router.can_consume(&producer_id, &capabilities)
    }

    async fn create_webrtc_transport(&self) -> Result<Arc<dyn WebRtcTransport>, MediaError> {
        let options = ms::WebRtcTransportOptions::new(ms::WebRtcTransportListenInfos::new(
            listen_info(self.listen_ip, self.announced_ip),
        ));
        let transport = self
            .router
            .create_webrtc_transport(options)
            .await
            .map_err(|e| engine_error("failed to create webrtc transport", e))?;

        let params = TransportParams {
            id: TransportId::from(transport.id().to_string()),
            ice_parameters: to_document(transport.ice_parameters()),
            ice_candidates: to_document(transport.ice_candidates()),
            dtls_parameters: to_document(&transport.dtls_parameters()),
        };
        debug!("mediasoup created webrtc transport {}", params.id);

        Ok(Arc::new(MediasoupWebRtcTransport {
            params,
            router: self.router.clone(),
            transport: Mutex::new(Some(transport)),
            closed: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
        }))
    }

    async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<Arc<dyn PlainTransport>, MediaError> {
        let mut engine_options =
            ms::PlainTransportOptions::new(listen_info(options.listen_ip, None));
        engine_options.rtcp_mux = options.rtcp_mux;
        engine_options.comedia = options.comedia;

        let transport = self
            .router
            .create_plain_transport(engine_options)
            .await
            .map_err(|e| engine_error("failed to create plain transport", e))?;

        Ok(Arc::new(MediasoupPlainTransport {
            id: TransportId::from(transport.id().to_string()),
            router: self.router.clone(),
            transport: Mutex::new(Some(transport)),
            closed: AtomicBool::new(false),
            consumers: Mutex::new(Vec::new()),
        }))
    }
}

/// Consume path shared by both transport flavours.
async fn open_consumer<T: ms::Transport>(
    router: &ms::Router,
    transport: &T,
    producer_id: &ProducerId,
    capabilities: &RtpCapabilities,
    paused: bool,
) -> Result<Arc<MediasoupConsumer>, MediaError> {
    let engine_id = engine_producer_id(producer_id)?;
    let engine_caps: ms::RtpCapabilities = from_document("rtpCapabilities", &capabilities.0)?;
    if !router.can_consume(&engine_id, &engine_caps) {
        return Err(MediaError::IncompatibleCapabilities(producer_id.clone()));
    }

    let mut options = ms::ConsumerOptions::new(engine_id, engine_caps);
    options.paused = paused;
    let consumer = transport
        .consume(options)
        .await
        .map_err(|e| engine_error("consume failed", e))?;

    Ok(MediasoupConsumer::wrap(consumer, producer_id.clone()))
}

pub struct MediasoupWebRtcTransport {
    params: TransportParams,
    router: ms::Router,
    transport: Mutex<Option<ms::WebRtcTransport>>,
    closed: AtomicBool,
    producers: Mutex<Vec<Arc<MediasoupProducer>>>,
    consumers: Mutex<Vec<Arc<MediasoupConsumer>>>,
}

impl MediasoupWebRtcTransport {
    fn handle(&self) -> Result<ms::WebRtcTransport, MediaError> {
        lock(&self.transport)
            .clone()
            .ok_or_else(|| MediaError::Closed(format!("transport {}", self.params.id)))
    }
}

#[async_trait]
impl WebRtcTransport for MediasoupWebRtcTransport {
    fn id(&self) -> TransportId {
        self.params.id.clone()
    }

    fn params(&self) -> TransportParams {
        self.params.clone()
    }

    async fn connect(&self, dtls_parameters: DtlsParameters) -> Result<(), MediaError> {
        let transport = self.handle()?;
        let dtls_parameters: ms::DtlsParameters =
            from_document("dtlsParameters", &dtls_parameters.0)?;
        transport
            .connect(ms::WebRtcTransportRemoteParameters { dtls_parameters })
            .await
            .map_err(|e| engine_error("connect failed", e))
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn Producer>, MediaError> {
        let transport = self.handle()?;
        let engine_parameters: ms::RtpParameters =
            from_document("rtpParameters", &rtp_parameters.0)?;
        let producer = transport
            .produce(ms::ProducerOptions::new(engine_kind(kind), engine_parameters))
            .await
            .map_err(|e| MediaError::InvalidParameters(e.to_string()))?;

        let producer = MediasoupProducer::wrap(producer, rtp_parameters);
        let mut producers = lock(&self.producers);
        producers.retain(|p| !p.is_closed());
        producers.push(producer.clone());
        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn Consumer>, MediaError> {
        let transport = self.handle()?;
        let consumer = open_consumer(&self.router, &transport, producer_id, capabilities, paused)
            .await?;
        let mut consumers = lock(&self.consumers);
        consumers.retain(|c| !c.is_closed());
        consumers.push(consumer.clone());
        Ok(consumer)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("mediasoup closing webrtc transport {}", self.params.id);

        // Children hold the transport alive, so they go first.
        let producers = std::mem::take(&mut *lock(&self.producers));
        let consumers = std::mem::take(&mut *lock(&self.consumers));
        for producer in producers {
            producer.transport_closed();
        }
        for consumer in consumers {
            consumer.transport_closed();
        }
        lock(&self.transport).take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MediasoupPlainTransport {
    id: TransportId,
    router: ms::Router,
    transport: Mutex<Option<ms::PlainTransport>>,
    closed: AtomicBool,
    consumers: Mutex<Vec<Arc<MediasoupConsumer>>>,
}

impl MediasoupPlainTransport {
    fn handle(&self) -> Result<ms::PlainTransport, MediaError> {
        lock(&self.transport)
            .clone()
            .ok_or_else(|| MediaError::Closed(format!("plain transport {}", self.id)))
    }
}

#[async_trait]
impl PlainTransport for MediasoupPlainTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    async fn connect(
        &self,
        ip: IpAddr,
        port: u16,
        rtcp_port: Option<u16>,
    ) -> Result<(), MediaError> {
        let transport = self.handle()?;
        transport
            .connect(ms::PlainTransportRemoteParameters {
                ip: Some(ip),
                port: Some(port),
                rtcp_port,
                srtp_parameters: None,
            })
            .await
            .map_err(|e| engine_error("plain connect failed", e))
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn Consumer>, MediaError> {
        let transport = self.handle()?;
        let consumer = open_consumer(&self.router, &transport, producer_id, capabilities, paused)
            .await?;
        let mut consumers = lock(&self.consumers);
        consumers.retain(|c| !c.is_closed());
        consumers.push(consumer.clone());
        Ok(consumer)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let consumers = std::mem::take(&mut *lock(&self.consumers));
        for consumer in consumers {
            consumer.transport_closed();
        }
        lock(&self.transport).take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MediasoupProducer {
    id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    producer: Mutex<Option<ms::Producer>>,
    closed: AtomicBool,
    transport_close_hooks: Hooks,
}

impl MediasoupProducer {
    fn wrap(producer: ms::Producer, rtp_parameters: RtpParameters) -> Arc<Self> {
        let wrapped = Arc::new(Self {
            id: ProducerId::from(producer.id().to_string()),
            kind: our_kind(producer.kind()),
            rtp_parameters,
            producer: Mutex::new(None),
            closed: AtomicBool::new(false),
            transport_close_hooks: Hooks::new(),
        });

        // Runs on the worker's thread: flags and hooks only, the handle stays put.
        let weak: Weak<Self> = Arc::downgrade(&wrapped);
        producer
            .on_transport_close(move || {
                if let Some(producer) = weak.upgrade() {
                    producer.mark_transport_closed();
                }
            })
            .detach();
        *lock(&wrapped.producer) = Some(producer);
        wrapped
    }

    fn mark_transport_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.transport_close_hooks.fire();
        }
    }

    fn transport_closed(&self) {
        self.mark_transport_closed();
        lock(&self.producer).take();
    }
}

impl Producer for MediasoupProducer {
    fn id(&self) -> ProducerId {
        self.id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.producer).take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn on_transport_close(&self, hook: CloseHook) {
        self.transport_close_hooks.register(&self.closed, hook);
    }
}

pub struct MediasoupConsumer {
    id: ConsumerId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    consumer: Mutex<Option<ms::Consumer>>,
    closed: AtomicBool,
    transport_close_hooks: Hooks,
    producer_close_hooks: Hooks,
}

impl MediasoupConsumer {
    fn wrap(consumer: ms::Consumer, producer_id: ProducerId) -> Arc<Self> {
        let wrapped = Arc::new(Self {
            id: ConsumerId::from(consumer.id().to_string()),
            producer_id,
            kind: our_kind(consumer.kind()),
            rtp_parameters: RtpParameters(to_document(consumer.rtp_parameters())),
            paused: AtomicBool::new(consumer.paused()),
            consumer: Mutex::new(None),
            closed: AtomicBool::new(false),
            transport_close_hooks: Hooks::new(),
            producer_close_hooks: Hooks::new(),
        });

        let weak: Weak<Self> = Arc::downgrade(&wrapped);
        consumer
            .on_transport_close(move || {
                if let Some(consumer) = weak.upgrade() {
                    consumer.mark_transport_closed();
                }
            })
            .detach();
        let weak: Weak<Self> = Arc::downgrade(&wrapped);
        consumer
            .on_producer_close(move || {
                if let Some(consumer) = weak.upgrade() {
                    consumer.mark_producer_closed();
                }
            })
            .detach();
        *lock(&wrapped.consumer) = Some(consumer);
        wrapped
    }

    fn mark_transport_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.transport_close_hooks.fire();
        }
    }

    fn mark_producer_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.producer_close_hooks.fire();
        }
    }

    fn transport_closed(&self) {
        self.mark_transport_closed();
        lock(&self.consumer).take();
    }
}

#[async_trait]
impl Consumer for MediasoupConsumer {
    fn id(&self) -> ConsumerId {
        self.id.clone()
    }

    fn producer_id(&self) -> ProducerId {
        self.producer_id.clone()
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn rtp_parameters(&self) -> RtpParameters {
        self.rtp_parameters.clone()
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn resume(&self) -> Result<(), MediaError> {
        let consumer = lock(&self.consumer)
            .clone()
            .filter(|_| !self.is_closed())
            .ok_or_else(|| MediaError::Closed(format!("consumer {}", self.id)))?;
        consumer
            .resume()
            .await
            .map_err(|e| engine_error("resume failed", e))?;
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.consumer).take();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn on_transport_close(&self, hook: CloseHook) {
        self.transport_close_hooks.register(&self.closed, hook);
    }

    fn on_producer_close(&self, hook: CloseHook) {
        self.producer_close_hooks.register(&self.closed, hook);
    }
}
