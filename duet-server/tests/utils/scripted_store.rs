use async_trait::async_trait;
use duet_core::{PeerId, Room, RoomId};
use duet_server::{MemorySessionStore, SessionStore, StoreError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use crate::utils::SIGNAL_TIMEOUT_MS;

#[derive(Default)]
struct Script {
    park_save: AtomicBool,
    parked: Notify,
    release: Notify,
    lose_match_reply: AtomicBool,
}

/// A [`MemorySessionStore`] whose calls can be held or made to fail after
/// they took effect.
#[derive(Clone)]
pub struct ScriptedStore {
    memory: MemorySessionStore,
    script: Arc<Script>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self {
            memory: MemorySessionStore::new(),
            script: Arc::new(Script::default()),
        }
    }

    /// The backing store, for inspecting the queue and the rooms.
    pub fn memory(&self) -> MemorySessionStore {
        self.memory.clone()
    }

    /// Hold the next `save_room` until [`ScriptedStore::release_save`].
    pub fn park_next_save(&self) {
        self.script.park_save.store(true, Ordering::SeqCst);
    }

    pub async fn wait_parked(&self) -> anyhow::Result<()> {
        tokio::time::timeout(
            Duration::from_millis(SIGNAL_TIMEOUT_MS),
            self.script.parked.notified(),
        )
        .await?;
        Ok(())
    }

    pub fn release_save(&self) {
        self.script.release.notify_one();
    }

    /// Run the next queue step, then report it as failed.
    pub fn lose_next_match_reply(&self) {
        self.script.lose_match_reply.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for ScriptedStore {
    async fn match_or_enqueue(&self, peer_id: &PeerId) -> Result<Option<PeerId>, StoreError> {
        let partner = self.memory.match_or_enqueue(peer_id).await?;
        if self.script.lose_match_reply.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        Ok(partner)
    }

    async fn remove_from_queue(&self, peer_id: &PeerId) -> Result<(), StoreError> {
        self.memory.remove_from_queue(peer_id).await
    }

    async fn save_room(&self, room: &Room) -> Result<(), StoreError> {
        if self.script.park_save.swap(false, Ordering::SeqCst) {
            self.script.parked.notify_one();
            self.script.release.notified().await;
        }
        self.memory.save_room(room).await
    }

    async fn load_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        self.memory.load_room(room_id).await
    }
}
