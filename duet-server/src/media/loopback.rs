use crate::error::MediaError;
use crate::media::close_hooks::{Hooks, lock};
use crate::media::media_engine::{
    CloseHook, Consumer, MediaEngine, PlainTransport, PlainTransportOptions, Producer,
    WebRtcTransport,
};
use async_trait::async_trait;
use dashmap::DashMap;
use duet_core::{
    ConsumerId, DtlsParameters, MediaKind, ProducerId, RtpCapabilities, RtpParameters,
    TransportId, TransportParams,
};
use serde_json::json;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;
use uuid::Uuid;

/// Operations of [`LoopbackMediaEngine`] that can be made to fail once.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum LoopbackOp {
    CreateWebRtcTransport,
    CreatePlainTransport,
    Connect,
    Produce,
    Consume,
    Resume,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

struct RouterInner {
    capabilities: Option<RtpCapabilities>,
    announced_ip: String,
    producers: DashMap<ProducerId, Arc<LoopbackProducer>>,
    consumers: DashMap<ConsumerId, Arc<LoopbackConsumer>>,
    webrtc_transports: DashMap<TransportId, Arc<LoopbackWebRtcTransport>>,
    plain_transports: DashMap<TransportId, Arc<LoopbackPlainTransport>>,
    failures: Mutex<HashSet<LoopbackOp>>,
}

impl RouterInner {
    fn check(&self, op: LoopbackOp) -> Result<(), MediaError> {
        if lock(&self.failures).remove(&op) {
            return Err(MediaError::Engine(format!("injected {:?} failure", op)));
        }
        Ok(())
    }

    fn can_consume(&self, producer_id: &ProducerId, capabilities: &RtpCapabilities) -> bool {
        let Some(producer) = self.producers.get(producer_id).map(|p| p.value().clone()) else {
            return false;
        };
        if producer.is_closed() {
            return false;
        }
        producer
            .rtp_parameters
            .primary_codec()
            .is_some_and(|codec| capabilities.supports(&codec.mime_type))
    }

    /// Shared consume path of both transport flavours.
    fn consume(
        self: &Arc<Self>,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<LoopbackConsumer>, MediaError> {
        self.check(LoopbackOp::Consume)?;

        let producer = self
            .producers
            .get(producer_id)
            .map(|p| p.value().clone())
            .filter(|p| !p.is_closed())
            .ok_or_else(|| MediaError::UnknownProducer(producer_id.clone()))?;

        if !self.can_consume(producer_id, capabilities) {
            return Err(MediaError::IncompatibleCapabilities(producer_id.clone()));
        }

        let consumer = Arc::new(LoopbackConsumer {
            id: ConsumerId::from(new_id()),
            transport_id: transport_id.clone(),
            producer_id: producer_id.clone(),
            kind: producer.kind,
            rtp_parameters: producer.rtp_parameters.clone(),
            paused: AtomicBool::new(paused),
            closed: AtomicBool::new(false),
            router: Arc::downgrade(self),
            transport_close_hooks: Hooks::new(),
            producer_close_hooks: Hooks::new(),
        });
        self.consumers.insert(consumer.id.clone(), consumer.clone());

        // Producer may have closed while the consumer was being set up.
        if producer.is_closed() {
            consumer.producer_closed();
        }

        Ok(consumer)
    }

    fn consumers_of(&self, producer_id: &ProducerId) -> Vec<Arc<LoopbackConsumer>> {
        self.consumers
            .iter()
            .filter(|c| &c.producer_id == producer_id)
            .map(|c| c.value().clone())
            .collect()
    }

    /// Drop a closed producer from the list of the transport that made it.
    fn forget_producer(&self, transport_id: &TransportId, producer_id: &ProducerId) {
        let transport = self.webrtc_transports.get(transport_id).map(|t| t.value().clone());
        if let Some(transport) = transport {
            lock(&transport.producers).retain(|p| &p.id != producer_id);
        }
    }

    fn forget_consumer(&self, transport_id: &TransportId, consumer_id: &ConsumerId) {
        let webrtc = self.webrtc_transports.get(transport_id).map(|t| t.value().clone());
        if let Some(transport) = webrtc {
            lock(&transport.consumers).retain(|c| &c.id != consumer_id);
            return;
        }
        let plain = self.plain_transports.get(transport_id).map(|t| t.value().clone());
        if let Some(transport) = plain {
            lock(&transport.consumers).retain(|c| &c.id != consumer_id);
        }
    }
}

/// In-process stand-in for the media-routing engine.
///
/// Models one router: ids, producer/consumer bookkeeping, capability checks
/// and close cascades (transport → its producers and consumers, producer →
/// consumers reading it). No media is moved.
#[derive(Clone)]
pub struct LoopbackMediaEngine {
    inner: Arc<RouterInner>,
}

impl LoopbackMediaEngine {
    pub fn new() -> Self {
        Self::build(Some(Self::default_capabilities()), "127.0.0.1".to_string())
    }

    /// An engine whose router never came up.
    pub fn uninitialized() -> Self {
        Self::build(None, "127.0.0.1".to_string())
    }

    fn build(capabilities: Option<RtpCapabilities>, announced_ip: String) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                capabilities,
                announced_ip,
                producers: DashMap::new(),
                consumers: DashMap::new(),
                webrtc_transports: DashMap::new(),
                plain_transports: DashMap::new(),
                failures: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// Router codecs: opus, VP8 and H264 (constrained baseline).
    pub fn default_capabilities() -> RtpCapabilities {
        RtpCapabilities(json!({
            "codecs": [
                {
                    "kind": "audio",
                    "mimeType": "audio/opus",
                    "preferredPayloadType": 100,
                    "clockRate": 48000,
                    "channels": 2
                },
                {
                    "kind": "video",
                    "mimeType": "video/VP8",
                    "preferredPayloadType": 101,
                    "clockRate": 90000,
                    "parameters": { "x-google-start-bitrate": 1000 }
                },
                {
                    "kind": "video",
                    "mimeType": "video/H264",
                    "preferredPayloadType": 102,
                    "clockRate": 90000,
                    "parameters": {
                        "packetization-mode": 1,
                        "profile-level-id": "42e01f",
                        "level-asymmetry-allowed": 1
                    }
                }
            ],
            "headerExtensions": []
        }))
    }

    /// Make the next call of `op` fail with [`MediaError::Engine`].
    pub fn fail_next(&self, op: LoopbackOp) {
        lock(&self.inner.failures).insert(op);
    }

    /// Close a WebRTC transport from the engine side (e.g. DTLS closed).
    pub fn close_transport(&self, id: &TransportId) -> bool {
        let Some(transport) = self.inner.webrtc_transports.get(id).map(|t| t.value().clone()) else {
            return false;
        };
        transport.close();
        true
    }

    pub fn live_producers(&self) -> Vec<ProducerId> {
        self.inner.producers.iter().map(|p| p.key().clone()).collect()
    }

    pub fn live_consumers(&self) -> Vec<ConsumerId> {
        self.inner.consumers.iter().map(|c| c.key().clone()).collect()
    }

    pub fn live_plain_transports(&self) -> usize {
        self.inner.plain_transports.len()
    }

    /// Remote address a plain transport was connected to.
    pub fn plain_remote(&self, id: &TransportId) -> Option<SocketAddr> {
        let transport = self.inner.plain_transports.get(id)?;
        let remote = *lock(&transport.remote);
        remote
    }
}

impl Default for LoopbackMediaEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaEngine for LoopbackMediaEngine {
    fn rtp_capabilities(&self) -> Option<RtpCapabilities> {
        self.inner.capabilities.clone()
    }

    fn can_consume(&self, producer_id: &ProducerId, capabilities: &RtpCapabilities) -> bool {
        self.inner.can_consume(producer_id, capabilities)
    }

    async fn create_webrtc_transport(&self) -> Result<Arc<dyn WebRtcTransport>, MediaError> {
        if self.inner.capabilities.is_none() {
            return Err(MediaError::NotInitialized);
        }
        self.inner.check(LoopbackOp::CreateWebRtcTransport)?;

        let transport = Arc::new(LoopbackWebRtcTransport {
            id: TransportId::from(new_id()),
            announced_ip: self.inner.announced_ip.clone(),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            router: Arc::downgrade(&self.inner),
            producers: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
        });
        self.inner
            .webrtc_transports
            .insert(transport.id.clone(), transport.clone());
        debug!("Loopback created webrtc transport {}", transport.id);

        Ok(transport)
    }

    async fn create_plain_transport(
        &self,
        options: PlainTransportOptions,
    ) -> Result<Arc<dyn PlainTransport>, MediaError> {
        if self.inner.capabilities.is_none() {
            return Err(MediaError::NotInitialized);
        }
        self.inner.check(LoopbackOp::CreatePlainTransport)?;

        let transport = Arc::new(LoopbackPlainTransport {
            id: TransportId::from(new_id()),
            options,
            remote: Mutex::new(None),
            closed: AtomicBool::new(false),
            router: Arc::downgrade(&self.inner),
            consumers: Mutex::new(Vec::new()),
        });
        self.inner
            .plain_transports
            .insert(transport.id.clone(), transport.clone());

        Ok(transport)
    }
}

pub struct LoopbackWebRtcTransport {
    id: TransportId,
    announced_ip: String,
    connected: AtomicBool,
    closed: AtomicBool,
    router: Weak<RouterInner>,
    producers: Mutex<Vec<Arc<LoopbackProducer>>>,
    consumers: Mutex<Vec<Arc<LoopbackConsumer>>>,
}

impl LoopbackWebRtcTransport {
    fn router(&self) -> Result<Arc<RouterInner>, MediaError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MediaError::Closed(format!("transport {}", self.id)));
        }
        self.router
            .upgrade()
            .ok_or_else(|| MediaError::Closed("router".to_string()))
    }
}

#[async_trait]
impl WebRtcTransport for LoopbackWebRtcTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    fn params(&self) -> TransportParams {
        TransportParams {
            id: self.id.clone(),
            ice_parameters: json!({
                "usernameFragment": self.id.as_str().replace('-', ""),
                "password": new_id(),
                "iceLite": true
            }),
            ice_candidates: json!([{
                "foundation": "udpcandidate",
                "ip": self.announced_ip,
                "port": 40000,
                "priority": 1076302079u32,
                "protocol": "udp",
                "type": "host"
            }]),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{ "algorithm": "sha-256", "value": new_id() }]
            }),
        }
    }

    async fn connect(&self, _dtls_parameters: DtlsParameters) -> Result<(), MediaError> {
        let router = self.router()?;
        router.check(LoopbackOp::Connect)?;
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(MediaError::Engine(format!(
                "transport {} already connected",
                self.id
            )));
        }
        Ok(())
    }

    async fn produce(
        &self,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
    ) -> Result<Arc<dyn Producer>, MediaError> {
        let router = self.router()?;
        router.check(LoopbackOp::Produce)?;

        let codec = rtp_parameters
            .primary_codec()
            .ok_or_else(|| MediaError::InvalidParameters("no codec in rtpParameters".into()))?;
        if !codec.mime_type.to_ascii_lowercase().starts_with(kind.as_str()) {
            return Err(MediaError::InvalidParameters(format!(
                "{} codec {} for {} producer",
                codec.mime_type, codec.name, kind
            )));
        }
        let supported = router
            .capabilities
            .as_ref()
            .is_some_and(|caps| caps.supports(&codec.mime_type));
        if !supported {
            return Err(MediaError::InvalidParameters(format!(
                "codec {} not supported by router",
                codec.mime_type
            )));
        }

        let producer = Arc::new(LoopbackProducer {
            id: ProducerId::from(new_id()),
            transport_id: self.id.clone(),
            kind,
            rtp_parameters,
            closed: AtomicBool::new(false),
            router: self.router.clone(),
            transport_close_hooks: Hooks::new(),
        });
        router.producers.insert(producer.id.clone(), producer.clone());
        lock(&self.producers).push(producer.clone());

        Ok(producer)
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn Consumer>, MediaError> {
        let router = self.router()?;
        let consumer = router.consume(&self.id, producer_id, capabilities, paused)?;
        let mut consumers = lock(&self.consumers);
        consumers.retain(|c| !c.is_closed());
        consumers.push(consumer.clone());
        drop(consumers);
        Ok(consumer)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Loopback closing webrtc transport {}", self.id);

        let producers = std::mem::take(&mut *lock(&self.producers));
        let consumers = std::mem::take(&mut *lock(&self.consumers));
        for producer in producers {
            producer.transport_closed();
        }
        for consumer in consumers {
            consumer.transport_closed();
        }
        if let Some(router) = self.router.upgrade() {
            router.webrtc_transports.remove(&self.id);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct LoopbackPlainTransport {
    id: TransportId,
    options: PlainTransportOptions,
    remote: Mutex<Option<SocketAddr>>,
    closed: AtomicBool,
    router: Weak<RouterInner>,
    consumers: Mutex<Vec<Arc<LoopbackConsumer>>>,
}

impl LoopbackPlainTransport {
    pub fn options(&self) -> &PlainTransportOptions {
        &self.options
    }
}

#[async_trait]
impl PlainTransport for LoopbackPlainTransport {
    fn id(&self) -> TransportId {
        self.id.clone()
    }

    async fn connect(
        &self,
        ip: IpAddr,
        port: u16,
        _rtcp_port: Option<u16>,
    ) -> Result<(), MediaError> {
        if self.is_closed() {
            return Err(MediaError::Closed(format!("plain transport {}", self.id)));
        }
        *lock(&self.remote) = Some(SocketAddr::new(ip, port));
        Ok(())
    }

    async fn consume(
        &self,
        producer_id: &ProducerId,
        capabilities: &RtpCapabilities,
        paused: bool,
    ) -> Result<Arc<dyn Consumer>, MediaError> {
        if self.is_closed() {
            return Err(MediaError::Closed(format!("plain transport {}", self.id)));
        }
        let router = self
            .router
            .upgrade()
            .ok_or_else(|| MediaError::Closed("router".to_string()))?;
        let consumer = router.consume(&self.id, producer_id, capabilities, paused)?;
        let mut consumers = lock(&self.consumers);
        consumers.retain(|c| !c.is_closed());
        consumers.push(consumer.clone());
        drop(consumers);
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
        if let Some(router) = self.router.upgrade() {
            router.plain_transports.remove(&self.id);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct LoopbackProducer {
    id: ProducerId,
    transport_id: TransportId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    closed: AtomicBool,
    router: Weak<RouterInner>,
    transport_close_hooks: Hooks,
}

impl LoopbackProducer {
    /// Marks closed and cascades to consumers; `true` on the first call.
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(router) = self.router.upgrade() {
            router.producers.remove(&self.id);
            router.forget_producer(&self.transport_id, &self.id);
            for consumer in router.consumers_of(&self.id) {
                consumer.producer_closed();
            }
        }
        true
    }

    fn transport_closed(&self) {
        if self.shutdown() {
            self.transport_close_hooks.fire();
        }
    }
}

impl Producer for LoopbackProducer {
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
        self.shutdown();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn on_transport_close(&self, hook: CloseHook) {
        self.transport_close_hooks.register(&self.closed, hook);
    }
}

pub struct LoopbackConsumer {
    id: ConsumerId,
    transport_id: TransportId,
    producer_id: ProducerId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    paused: AtomicBool,
    closed: AtomicBool,
    router: Weak<RouterInner>,
    transport_close_hooks: Hooks,
    producer_close_hooks: Hooks,
}

impl LoopbackConsumer {
    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(router) = self.router.upgrade() {
            router.consumers.remove(&self.id);
            router.forget_consumer(&self.transport_id, &self.id);
        }
        true
    }

    fn transport_closed(&self) {
        if self.shutdown() {
            self.transport_close_hooks.fire();
        }
    }

    fn producer_closed(&self) {
        if self.shutdown() {
            self.producer_close_hooks.fire();
        }
    }
}

#[async_trait]
impl Consumer for LoopbackConsumer {
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
        if self.is_closed() {
            return Err(MediaError::Closed(format!("consumer {}", self.id)));
        }
        if let Some(router) = self.router.upgrade() {
            router.check(LoopbackOp::Resume)?;
        }
        self.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) {
        self.shutdown();
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
