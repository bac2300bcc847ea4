mod rest;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{LiveError, Result};
use crate::model::{ParticipantId, ParticipantRecord, RoomId, RoomRecord};

pub use rest::RestRecordStore;

/// Durable room/participant records held by the hosted backend.
///
/// Writes are last-write-wins; there is no transaction discipline because every
/// record has a single writer (the instructor for rooms, each client for its own
/// participant row).
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_room(&self, room_id: &RoomId) -> Result<Option<RoomRecord>>;

    /// Most recently created room for a lesson, whatever its status.
    async fn latest_room_for_lesson(&self, lesson_id: &str) -> Result<Option<RoomRecord>>;

    /// Insert-if-absent by id; returns the stored row.
    async fn insert_room(&self, room: &RoomRecord) -> Result<RoomRecord>;

    async fn update_room(&self, room: &RoomRecord) -> Result<()>;

    /// Insert-if-absent by id; returns the stored row.
    async fn insert_participant(&self, participant: &ParticipantRecord) -> Result<ParticipantRecord>;

    async fn update_participant(&self, participant: &ParticipantRecord) -> Result<()>;

    /// Sets `left_at` unless the row is already closed.
    async fn close_participant(&self, participant_id: &ParticipantId, left_at: u64) -> Result<()>;

    async fn open_participants(&self, room_id: &RoomId) -> Result<Vec<ParticipantRecord>>;
}

/// In-process record store.
pub struct MemoryStore {
    rooms: Arc<RwLock<HashMap<RoomId, RoomRecord>>>,
    participants: Arc<RwLock<HashMap<ParticipantId, ParticipantRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            participants: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Every participant row of a room, closed ones included
    pub async fn participant_history(&self, room_id: &RoomId) -> Vec<ParticipantRecord> {
        let participants = self.participants.read().await;
        let mut rows: Vec<_> = participants
            .values()
            .filter(|p| &p.room_id == room_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then_with(|| a.id.cmp(&b.id)));
        rows
    }

    pub async fn get_participant(&self, participant_id: &ParticipantId) -> Option<ParticipantRecord> {
        let participants = self.participants.read().await;
        participants.get(participant_id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_room(&self, room_id: &RoomId) -> Result<Option<RoomRecord>> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(room_id).cloned())
    }

    async fn latest_room_for_lesson(&self, lesson_id: &str) -> Result<Option<RoomRecord>> {
        let rooms = self.rooms.read().await;
        Ok(rooms
            .values()
            .filter(|r| r.lesson_id == lesson_id)
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .cloned())
    }

    async fn insert_room(&self, room: &RoomRecord) -> Result<RoomRecord> {
        let mut rooms = self.rooms.write().await;
        let stored = rooms.entry(room.id.clone()).or_insert_with(|| room.clone());
        tracing::debug!(room_id = %stored.id, lesson_id = %stored.lesson_id, "Room record stored");
        Ok(stored.clone())
    }

    async fn update_room(&self, room: &RoomRecord) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(&room.id) {
            Some(existing) => {
                *existing = room.clone();
                Ok(())
            }
            None => Err(LiveError::store(format!("Room {} does not exist", room.id))),
        }
    }

    async fn insert_participant(&self, participant: &ParticipantRecord) -> Result<ParticipantRecord> {
        let mut participants = self.participants.write().await;
        let stored = participants
            .entry(participant.id.clone())
            .or_insert_with(|| participant.clone());
        Ok(stored.clone())
    }

    async fn update_participant(&self, participant: &ParticipantRecord) -> Result<()> {
        let mut participants = self.participants.write().await;
        match participants.get_mut(&participant.id) {
            Some(existing) => {
                *existing = participant.clone();
                Ok(())
            }
            None => Err(LiveError::ParticipantNotFound(participant.id.to_string())),
        }
    }

    async fn close_participant(&self, participant_id: &ParticipantId, left_at: u64) -> Result<()> {
        let mut participants = self.participants.write().await;
        let participant = participants
            .get_mut(participant_id)
            .ok_or_else(|| LiveError::ParticipantNotFound(participant_id.to_string()))?;

        if participant.left_at.is_none() {
            participant.left_at = Some(left_at);
            tracing::debug!(participant_id = %participant_id, "Participant record closed");
        }
        Ok(())
    }

    async fn open_participants(&self, room_id: &RoomId) -> Result<Vec<ParticipantRecord>> {
        let participants = self.participants.read().await;
        Ok(participants
            .values()
            .filter(|p| &p.room_id == room_id && p.is_open())
            .cloned()
            .collect())
    }
}
