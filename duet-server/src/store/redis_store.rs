use crate::error::StoreError;
use crate::store::session_store::{ROOM_KEY_PREFIX, SessionStore, WAITING_QUEUE_KEY};
use async_trait::async_trait;
use duet_core::{PeerId, Room, RoomId};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::info;

const MATCH_OR_ENQUEUE: &str = include_str!("match_or_enqueue.lua");

/// Redis-backed store shared across server instances.
///
/// The queue step is one server-side Lua script, so concurrent matchmaking
/// and disconnect-driven removals never interleave.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
    match_script: Script,
    queue_key: String,
    room_key_prefix: String,
}

impl RedisSessionStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_keys(url, WAITING_QUEUE_KEY, ROOM_KEY_PREFIX).await
    }

    pub async fn connect_with_keys(
        url: &str,
        queue_key: &str,
        room_key_prefix: &str,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Redis connection established");

        Ok(Self {
            conn,
            match_script: Script::new(MATCH_OR_ENQUEUE),
            queue_key: queue_key.to_string(),
            room_key_prefix: room_key_prefix.to_string(),
        })
    }

    fn room_key(&self, room_id: &RoomId) -> String {
        format!("{}{}", self.room_key_prefix, room_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn match_or_enqueue(&self, peer_id: &PeerId) -> Result<Option<PeerId>, StoreError> {
        let mut conn = self.conn.clone();
        let partner: Option<String> = self
            .match_script
            .key(&self.queue_key)
            .arg(peer_id.to_string())
            .invoke_async(&mut conn)
            .await?;

        partner
            .map(|raw| raw.parse::<PeerId>().map_err(|_| StoreError::InvalidEntry(raw)))
            .transpose()
    }

    async fn remove_from_queue(&self, peer_id: &PeerId) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .lrem(&self.queue_key, 0, peer_id.to_string())
            .await?;
        Ok(())
    }

    async fn save_room(&self, room: &Room) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let doc = serde_json::to_string(room)?;
        let _: () = conn.set(self.room_key(&room.id), doc).await?;
        Ok(())
    }

    async fn load_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(self.room_key(room_id)).await?;
        match raw {
            Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
            None => Ok(None),
        }
    }
}
