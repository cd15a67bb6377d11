use crate::model::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Hash, Eq, PartialEq)]
#[serde(transparent)]
pub struct RoomId(pub Uuid);

impl RoomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for RoomId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A matched pair of peers, as persisted in the shared store.
///
/// `users[0]` is the offerer (the peer that was already waiting),
/// `users[1]` the answerer. The document is never mutated after creation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: RoomId,
    pub users: [PeerId; 2],
    pub stream_url: String,
}

impl Room {
    pub fn new(id: RoomId, offerer: PeerId, answerer: PeerId, stream_base_url: &str) -> Self {
        let stream_url = Self::stream_url_for(&id, stream_base_url);
        Self {
            id,
            users: [offerer, answerer],
            stream_url,
        }
    }

    /// Broadcast URL of the composed output for `id`.
    pub fn stream_url_for(id: &RoomId, stream_base_url: &str) -> String {
        format!("{}/{}/index.m3u8", stream_base_url.trim_end_matches('/'), id)
    }

    pub fn offerer(&self) -> &PeerId {
        &self.users[0]
    }

    pub fn answerer(&self) -> &PeerId {
        &self.users[1]
    }

    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.users.contains(peer_id)
    }

    /// The other member of the room, or `None` if `peer_id` is not a member.
    pub fn partner_of(&self, peer_id: &PeerId) -> Option<&PeerId> {
        match &self.users {
            [a, b] if a == peer_id => Some(b),
            [a, b] if b == peer_id => Some(a),
            _ => None,
        }
    }
}
