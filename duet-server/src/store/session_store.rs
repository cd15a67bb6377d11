use crate::error::StoreError;
use async_trait::async_trait;
use duet_core::{PeerId, Room, RoomId};

/// Default list key of the waiting queue.
pub const WAITING_QUEUE_KEY: &str = "waiting_user_queue";

/// Default key prefix of persisted rooms (`streamRoom:{roomId}`).
pub const ROOM_KEY_PREFIX: &str = "streamRoom:";

/// Client of the store shared by every server instance.
///
/// The waiting queue is only ever mutated through [`match_or_enqueue`] and
/// [`remove_from_queue`], each of which is a single indivisible operation
/// on the store side.
///
/// [`match_or_enqueue`]: SessionStore::match_or_enqueue
/// [`remove_from_queue`]: SessionStore::remove_from_queue
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Pop the head of the queue as the partner of `peer_id`, or append
    /// `peer_id` to the tail if nobody else is waiting.
    ///
    /// `peer_id` never appears in the queue more than once afterwards.
    async fn match_or_enqueue(&self, peer_id: &PeerId) -> Result<Option<PeerId>, StoreError>;

    async fn remove_from_queue(&self, peer_id: &PeerId) -> Result<(), StoreError>;

    async fn save_room(&self, room: &Room) -> Result<(), StoreError>;

    async fn load_room(&self, room_id: &RoomId) -> Result<Option<Room>, StoreError>;
}
