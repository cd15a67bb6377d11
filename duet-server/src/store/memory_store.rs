use crate::error::StoreError;
use crate::store::session_store::SessionStore;
use async_trait::async_trait;
use dashmap::DashMap;
use duet_core::{PeerId, Room, RoomId};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

struct MemoryInner {
    queue: Mutex<VecDeque<PeerId>>,
    rooms: DashMap<RoomId, Room>,
    unavailable: AtomicBool,
}

/// Single-instance store. The queue step runs under one async mutex, which
/// gives the same linearizability the scripted Redis step has.
#[derive(Clone)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                queue: Mutex::new(VecDeque::new()),
                rooms: DashMap::new(),
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate the store becoming (un)reachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn queued(&self) -> Vec<PeerId> {
        self.inner.queue.lock().await.iter().cloned().collect()
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.inner.rooms.iter().map(|r| r.value().clone()).collect()
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".into()));
        }
        Ok(())
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn match_or_enqueue(&self, peer_id: &PeerId) -> Result<Option<PeerId>, StoreError> {
        self.ensure_available()?;

        let mut queue = self.inner.queue.lock().await;
        queue.retain(|id| id != peer_id);

        if let Some(partner) = queue.pop_front() {
            return Ok(Some(partner));
        }
        queue.push_back(peer_id.clone());
        Ok(None)
    }

    async fn remove_from_queue(&self, peer_id: &PeerId) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.inner.queue.lock().await.retain(|id| id != peer_id);
        Ok(())
    }

    async fn save_room(&self, room: &Room) -> Result<(), StoreError> {
        self.ensure_available()?;
        self.inner.rooms.insert(room.id.clone(), room.clone());
        Ok(())
    }

    async fn load_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError> {
        self.ensure_available()?;
        Ok(self.inner.rooms.get(room_id).map(|r| r.value().clone()))
    }
}
