//! In-memory presence store.

use super::PresenceStore;
use crate::errors::PokerError;
use crate::models::{Room, Session, User};
use chrono::{DateTime, Utc};
use common::types::{RoomId, SessionId, UserId};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct RoomRecord {
    name: String,
    created_at: DateTime<Utc>,
    scrum_master: UserId,
    votes_revealed: bool,
    participants: HashSet<UserId>,
    votes: HashMap<UserId, String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rooms: HashMap<RoomId, RoomRecord>,
    users: HashMap<UserId, User>,
    sessions: HashMap<SessionId, Session>,
}

impl MemoryState {
    fn room_mut(&mut self, room_id: RoomId) -> Result<&mut RoomRecord, PokerError> {
        self.rooms
            .get_mut(&room_id)
            .ok_or_else(|| PokerError::NotFound(format!("room {room_id}")))
    }

    fn user_mut(&mut self, user_id: UserId) -> Result<&mut User, PokerError> {
        self.users
            .get_mut(&user_id)
            .ok_or_else(|| PokerError::NotFound(format!("user {user_id}")))
    }
}

/// Presence store backed by process memory.
///
/// Mirrors the relational layout (users live outside rooms and are linked
/// as participants) so both backends behave the same under the service.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of user records, including users not linked to any room.
    pub async fn user_count(&self) -> usize {
        self.state.read().await.users.len()
    }

    /// Number of session records.
    pub async fn session_count(&self) -> usize {
        self.state.read().await.sessions.len()
    }
}

#[async_trait::async_trait]
impl PresenceStore for MemoryStore {
    async fn create_room(&self, room: &Room) -> Result<(), PokerError> {
        let mut state = self.state.write().await;
        for user in room.participants.values() {
            state.users.insert(user.id, user.clone());
        }
        state.rooms.insert(
            room.id,
            RoomRecord {
                name: room.name.clone(),
                created_at: room.created_at,
                scrum_master: room.scrum_master,
                votes_revealed: room.votes_revealed,
                participants: room.participants.keys().copied().collect(),
                votes: room.votes.clone(),
            },
        );
        Ok(())
    }

    async fn get_room(&self, room_id: RoomId) -> Result<Room, PokerError> {
        let state = self.state.read().await;
        let record = state
            .rooms
            .get(&room_id)
            .ok_or_else(|| PokerError::NotFound(format!("room {room_id}")))?;

        let participants = record
            .participants
            .iter()
            .filter_map(|id| state.users.get(id).map(|user| (*id, user.clone())))
            .collect();

        Ok(Room {
            id: room_id,
            name: record.name.clone(),
            created_at: record.created_at,
            scrum_master: record.scrum_master,
            participants,
            votes: record.votes.clone(),
            votes_revealed: record.votes_revealed,
        })
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<(), PokerError> {
        self.state.write().await.rooms.remove(&room_id);
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<RoomId>, PokerError> {
        Ok(self.state.read().await.rooms.keys().copied().collect())
    }

    async fn add_participant(&self, room_id: RoomId, user: &User) -> Result<(), PokerError> {
        let mut state = self.state.write().await;
        state.room_mut(room_id)?.participants.insert(user.id);
        match state.users.get_mut(&user.id) {
            Some(existing) => existing.name.clone_from(&user.name),
            None => {
                state.users.insert(user.id, user.clone());
            }
        }
        Ok(())
    }

    async fn remove_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), PokerError> {
        let mut state = self.state.write().await;
        if let Some(record) = state.rooms.get_mut(&room_id) {
            record.participants.remove(&user_id);
            record.votes.remove(&user_id);
        }
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> Result<User, PokerError> {
        self.state
            .read()
            .await
            .users
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PokerError::NotFound(format!("user {user_id}")))
    }

    async fn update_user(&self, user: &User) -> Result<(), PokerError> {
        let mut state = self.state.write().await;
        let existing = state.user_mut(user.id)?;
        existing.name.clone_from(&user.name);
        existing.is_online = user.is_online;
        Ok(())
    }

    async fn delete_user(&self, user_id: UserId) -> Result<(), PokerError> {
        self.state.write().await.users.remove(&user_id);
        Ok(())
    }

    async fn set_user_online(&self, user_id: UserId, online: bool) -> Result<(), PokerError> {
        self.state.write().await.user_mut(user_id)?.is_online = online;
        Ok(())
    }

    async fn create_session(&self, session: &Session) -> Result<(), PokerError> {
        self.state
            .write()
            .await
            .sessions
            .insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Session, PokerError> {
        self.state
            .read()
            .await
            .sessions
            .get(&session_id)
            .cloned()
            .ok_or_else(|| PokerError::NotFound(format!("session {session_id}")))
    }

    async fn update_session(&self, session: &Session) -> Result<(), PokerError> {
        let mut state = self.state.write().await;
        let existing = state
            .sessions
            .get_mut(&session.id)
            .ok_or_else(|| PokerError::NotFound(format!("session {}", session.id)))?;
        existing.expires_at = session.expires_at;
        Ok(())
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), PokerError> {
        self.state.write().await.sessions.remove(&session_id);
        Ok(())
    }

    async fn list_sessions_by_room(&self, room_id: RoomId) -> Result<Vec<Session>, PokerError> {
        Ok(self
            .state
            .read()
            .await
            .sessions
            .values()
            .filter(|session| session.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn get_session_by_user(&self, user_id: UserId) -> Result<Option<Session>, PokerError> {
        Ok(self
            .state
            .read()
            .await
            .sessions
            .values()
            .filter(|session| session.user_id == user_id)
            .max_by_key(|session| session.created_at)
            .cloned())
    }

    async fn update_scrum_master(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), PokerError> {
        self.state.write().await.room_mut(room_id)?.scrum_master = user_id;
        Ok(())
    }

    async fn upsert_vote(
        &self,
        room_id: RoomId,
        user_id: UserId,
        vote: &str,
    ) -> Result<(), PokerError> {
        self.state
            .write()
            .await
            .room_mut(room_id)?
            .votes
            .insert(user_id, vote.to_string());
        Ok(())
    }

    async fn delete_vote(&self, room_id: RoomId, user_id: UserId) -> Result<(), PokerError> {
        self.state.write().await.room_mut(room_id)?.votes.remove(&user_id);
        Ok(())
    }

    async fn reset_votes(&self, room_id: RoomId) -> Result<(), PokerError> {
        let mut state = self.state.write().await;
        let record = state.room_mut(room_id)?;
        record.votes.clear();
        record.votes_revealed = false;
        Ok(())
    }

    async fn set_votes_revealed(
        &self,
        room_id: RoomId,
        revealed: bool,
    ) -> Result<(), PokerError> {
        self.state.write().await.room_mut(room_id)?.votes_revealed = revealed;
        Ok(())
    }
}
