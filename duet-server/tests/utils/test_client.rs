use anyhow::{Context, Result, anyhow};
use duet_core::{
    ClientMessage, ConsumedPayload, MatchedPayload, MediaKind, PeerId, ProducerId, RoomId,
    RtpCapabilities, ServerMessage, TransportPair,
};
use duet_server::{Flow, SignalingEngine};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::utils::{MockSignalingOutput, SIGNAL_TIMEOUT_MS, dtls_parameters, rtp_parameters};

/// A scripted peer talking to the engine directly, as one connection would.
pub struct TestClient {
    pub peer_id: PeerId,
    engine: SignalingEngine,
    inbox: mpsc::UnboundedReceiver<ServerMessage>,
    pub capabilities: Option<RtpCapabilities>,
    pub transports: Option<TransportPair>,
}

impl TestClient {
    /// Open a session and consume the welcome event.
    pub async fn connect(engine: &SignalingEngine, signaling: &MockSignalingOutput) -> Result<Self> {
        let peer_id = PeerId::new();
        let inbox = signaling.subscribe(&peer_id);
        engine.connect(&peer_id);

        let mut client = Self {
            peer_id,
            engine: engine.clone(),
            inbox,
            capabilities: None,
            transports: None,
        };

        let welcomed = client
            .wait_for(|msg| match msg {
                ServerMessage::Welcome { peer_id } => Some(peer_id),
                _ => None,
            })
            .await?;
        if welcomed != client.peer_id {
            return Err(anyhow!("Welcome carried {} instead of {}", welcomed, client.peer_id));
        }
        Ok(client)
    }

    pub async fn send(&self, message: ClientMessage) -> Flow {
        self.engine.handle_message(&self.peer_id, message).await
    }

    pub async fn send_text(&self, text: &str) -> Flow {
        self.engine.handle_text(&self.peer_id, text).await
    }

    pub async fn recv(&mut self) -> Result<ServerMessage> {
        tokio::time::timeout(Duration::from_millis(SIGNAL_TIMEOUT_MS), self.inbox.recv())
            .await
            .context("Timed out waiting for a server event")?
            .context("Inbox closed")
    }

    /// Events already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        let mut drained = Vec::new();
        while let Ok(msg) = self.inbox.try_recv() {
            drained.push(msg);
        }
        drained
    }

    /// Receive until `pick` accepts an event. Other events are skipped.
    pub async fn wait_for<T>(&mut self, mut pick: impl FnMut(ServerMessage) -> Option<T>) -> Result<T> {
        let deadline = Instant::now() + Duration::from_millis(SIGNAL_TIMEOUT_MS);

        loop {
            let msg = tokio::time::timeout_at(deadline, self.inbox.recv())
                .await
                .context("Timed out waiting for the expected server event")?
                .context("Inbox closed")?;
            tracing::debug!("[TestClient {}] received {:?}", self.peer_id, msg);
            if let Some(found) = pick(msg) {
                return Ok(found);
            }
        }
    }

    /// Wait for an error event and return its code.
    pub async fn wait_error(&mut self) -> Result<String> {
        self.wait_for(|msg| match msg {
            ServerMessage::Error(payload) => Some(payload.code),
            _ => None,
        })
        .await
    }

    pub async fn fetch_capabilities(&mut self) -> Result<RtpCapabilities> {
        self.send(ClientMessage::GetRouterRtpCapabilities).await;
        let caps = self
            .wait_for(|msg| match msg {
                ServerMessage::RouterRtpCapabilities(caps) => Some(caps),
                _ => None,
            })
            .await?;
        self.capabilities = Some(caps.clone());
        Ok(caps)
    }

    pub async fn create_transports(&mut self) -> Result<TransportPair> {
        self.send(ClientMessage::CreateWebRtcTransport).await;
        let pair = self
            .wait_for(|msg| match msg {
                ServerMessage::WebRtcTransportCreated(pair) => Some(pair),
                _ => None,
            })
            .await?;
        self.transports = Some(pair.clone());
        Ok(pair)
    }

    pub async fn connect_transports(&mut self) -> Result<()> {
        let pair = self
            .transports
            .clone()
            .context("Transports have not been created")?;

        for params in [pair.send_transport, pair.receive_transport] {
            let id = params.id;
            self.send(ClientMessage::ConnectWebRtcTransport {
                transport_id: Some(id.clone()),
                dtls_parameters: dtls_parameters(),
            })
            .await;
            self.wait_for(|msg| match msg {
                ServerMessage::WebRtcTransportConnected { transport_id } if transport_id == id => {
                    Some(())
                }
                _ => None,
            })
            .await?;
        }
        Ok(())
    }

    /// Capabilities, both transports, both connected.
    pub async fn prepare(&mut self) -> Result<()> {
        self.fetch_capabilities().await?;
        self.create_transports().await?;
        self.connect_transports().await
    }

    pub async fn produce(&mut self, kind: MediaKind) -> Result<ProducerId> {
        self.send(ClientMessage::Produce {
            kind,
            rtp_parameters: rtp_parameters(kind),
            transport_id: None,
        })
        .await;
        self.wait_for(|msg| match msg {
            ServerMessage::ProduceSuccess {
                producer_id,
                kind: produced,
            } if produced == kind => Some(producer_id),
            _ => None,
        })
        .await
    }

    /// Audio then video; the second one enters matchmaking.
    pub async fn produce_all(&mut self) -> Result<(ProducerId, ProducerId)> {
        let audio = self.produce(MediaKind::Audio).await?;
        let video = self.produce(MediaKind::Video).await?;
        Ok((audio, video))
    }

    pub async fn wait_matched(&mut self) -> Result<MatchedPayload> {
        self.wait_for(|msg| match msg {
            ServerMessage::Matched(payload) => Some(payload),
            _ => None,
        })
        .await
    }

    pub async fn wait_waiting(&mut self) -> Result<()> {
        self.wait_for(|msg| match msg {
            ServerMessage::WaitingForUser {} => Some(()),
            _ => None,
        })
        .await
    }

    pub async fn consume(&mut self, room_id: &RoomId, kind: MediaKind) -> Result<ConsumedPayload> {
        let rtp_capabilities = self
            .capabilities
            .clone()
            .context("Capabilities have not been fetched")?;
        self.send(ClientMessage::Consume {
            room_id: Some(room_id.clone()),
            rtp_capabilities,
            kind: Some(kind),
        })
        .await;
        self.wait_for(|msg| match msg {
            ServerMessage::Consumed(payload) if payload.kind == kind => Some(payload),
            _ => None,
        })
        .await
    }

    /// Consume both kinds with one message. Returns audio then video.
    pub async fn consume_all(&mut self, room_id: &RoomId) -> Result<Vec<ConsumedPayload>> {
        let rtp_capabilities = self
            .capabilities
            .clone()
            .context("Capabilities have not been fetched")?;
        self.send(ClientMessage::Consume {
            room_id: Some(room_id.clone()),
            rtp_capabilities,
            kind: None,
        })
        .await;

        let mut consumed = Vec::with_capacity(2);
        while consumed.len() < 2 {
            let payload = self
                .wait_for(|msg| match msg {
                    ServerMessage::Consumed(payload) => Some(payload),
                    _ => None,
                })
                .await?;
            consumed.push(payload);
        }
        Ok(consumed)
    }

    pub async fn resume(&mut self, room_id: &RoomId) -> Result<()> {
        self.send(ClientMessage::Resume {
            room_id: Some(room_id.clone()),
        })
        .await;
        let expected = room_id.clone();
        self.wait_for(|msg| match msg {
            ServerMessage::ConsumerResumed { room_id } if room_id == expected => Some(()),
            _ => None,
        })
        .await
    }

    /// Prepare and publish both kinds.
    pub async fn publish(&mut self) -> Result<(ProducerId, ProducerId)> {
        self.prepare().await?;
        self.produce_all().await
    }

    pub async fn disconnect(&self) {
        self.engine.disconnect(&self.peer_id).await;
    }
}
