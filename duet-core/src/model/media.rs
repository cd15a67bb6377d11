use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Hash, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Order in which both kinds are negotiated.
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! engine_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Serialize, Deserialize, Clone, Hash, Eq, PartialEq)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

engine_id!(
    /// Media engine transport handle id.
    TransportId
);
engine_id!(
    /// Media engine producer handle id.
    ProducerId
);
engine_id!(
    /// Media engine consumer handle id.
    ConsumerId
);

macro_rules! engine_document {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
        #[serde(transparent)]
        pub struct $name(pub Value);

        impl From<Value> for $name {
            fn from(v: Value) -> Self {
                Self(v)
            }
        }
    };
}

engine_document!(
    /// Negotiable codec set of a router or a receiving device.
    RtpCapabilities
);
engine_document!(
    /// Parameters of a single RTP stream (codecs, encodings, header extensions).
    RtpParameters
);
engine_document!(
    /// DTLS role and fingerprints sent by the client to finish a handshake.
    DtlsParameters
);

/// Codec negotiated for an RTP stream, as the transcoder needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    /// Subtype of the mime type, e.g. `VP8` for `video/VP8`.
    pub name: String,
    pub mime_type: String,
    pub payload_type: u8,
    pub clock_rate: u32,
    pub channels: Option<u8>,
}

impl RtpParameters {
    /// The first codec entry, which is the one carried on the wire.
    pub fn primary_codec(&self) -> Option<CodecInfo> {
        let codec = self.0.get("codecs")?.as_array()?.first()?;
        let mime_type = codec.get("mimeType")?.as_str()?.to_string();
        let name = mime_type.split('/').nth(1)?.to_string();
        let payload_type = u8::try_from(codec.get("payloadType")?.as_u64()?).ok()?;
        let clock_rate = u32::try_from(codec.get("clockRate")?.as_u64()?).ok()?;
        let channels = codec
            .get("channels")
            .and_then(Value::as_u64)
            .and_then(|c| u8::try_from(c).ok());

        Some(CodecInfo {
            name,
            mime_type,
            payload_type,
            clock_rate,
            channels,
        })
    }
}

impl RtpCapabilities {
    /// Mime types advertised in `codecs[].mimeType`, lower-cased.
    pub fn mime_types(&self) -> Vec<String> {
        self.0
            .get("codecs")
            .and_then(Value::as_array)
            .map(|codecs| {
                codecs
                    .iter()
                    .filter_map(|c| c.get("mimeType").and_then(Value::as_str))
                    .map(str::to_ascii_lowercase)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn supports(&self, mime_type: &str) -> bool {
        let wanted = mime_type.to_ascii_lowercase();
        self.mime_types().iter().any(|m| *m == wanted)
    }
}

/// Connection parameters of one WebRTC transport, handed to the client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}
