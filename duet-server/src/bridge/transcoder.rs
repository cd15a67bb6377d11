use crate::bridge::bridge_session::{BridgeLeg, StreamBridgeSession};
use crate::error::BridgeError;
use async_trait::async_trait;
use duet_core::{MediaKind, PeerId, RoomId};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Upper bound on one start request, connect included.
pub const TRANSCODER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamDescriptor {
    pub port: u16,
    pub codec: String,
    pub payload_type: u8,
}

impl From<&BridgeLeg> for StreamDescriptor {
    fn from(leg: &BridgeLeg) -> Self {
        Self {
            port: leg.port,
            codec: leg.codec.name.clone(),
            payload_type: leg.codec.payload_type,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamPair {
    pub user_id: PeerId,
    pub video: StreamDescriptor,
    pub audio: StreamDescriptor,
}

/// Body of `POST {transcoder}/api/start`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    pub room_id: RoomId,
    pub streams: Vec<StreamPair>,
    pub sdp: String,
}

impl StartRequest {
    /// Group the session's legs per peer, in room order.
    pub fn from_session(
        session: &StreamBridgeSession,
        users: &[PeerId],
        sdp: String,
    ) -> Result<Self, BridgeError> {
        let streams = users
            .iter()
            .map(|user| -> Result<StreamPair, BridgeError> {
                let leg = |kind: MediaKind| {
                    session
                        .leg(user, kind)
                        .map(StreamDescriptor::from)
                        .ok_or_else(|| BridgeError::MissingProducer(user.clone(), kind))
                };
                Ok(StreamPair {
                    user_id: user.clone(),
                    video: leg(MediaKind::Video)?,
                    audio: leg(MediaKind::Audio)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            room_id: session.room_id.clone(),
            streams,
            sdp,
        })
    }

    pub fn descriptor_count(&self) -> usize {
        self.streams.len() * 2
    }
}

/// External process that composes a room's RTP into one broadcast.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn start(&self, request: &StartRequest) -> Result<(), BridgeError>;
}

pub struct HttpTranscoder {
    client: Client,
    base_url: String,
}

impl HttpTranscoder {
    /// `base` may be a bare `host[:port]`; `http://` is assumed then.
    pub fn new(base: &str) -> Result<Self, BridgeError> {
        Self::with_timeout(base, TRANSCODER_TIMEOUT)
    }

    pub fn with_timeout(base: &str, timeout: Duration) -> Result<Self, BridgeError> {
        let base = base.trim_end_matches('/');
        let base_url = if base.contains("://") {
            base.to_string()
        } else {
            format!("http://{}", base)
        };
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn start_url(&self) -> String {
        format!("{}/api/start", self.base_url)
    }
}

#[async_trait]
impl Transcoder for HttpTranscoder {
    async fn start(&self, request: &StartRequest) -> Result<(), BridgeError> {
        let url = self.start_url();
        debug!("POST {} for room {}", url, request.room_id);

        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::Rejected(format!("{}: {}", status, body)));
        }
        Ok(())
    }
}
