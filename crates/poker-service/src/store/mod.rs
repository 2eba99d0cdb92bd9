//! Presence store: durable rooms, users, votes and sessions.
//!
//! The store is the single source of truth. Every mutation made by a
//! router handler, the sweeper or disconnect reconciliation is written here
//! before it is broadcast.
//!
//! # Backends
//!
//! - [`MemoryStore`] - process-local maps, used when no `DATABASE_URL` is set
//!   and in tests
//! - [`PgPresenceStore`] - Postgres via sqlx

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgPresenceStore;

use crate::errors::PokerError;
use crate::models::{Room, Session, User};
use common::types::{RoomId, SessionId, UserId};

/// Repository interface over rooms, participants, votes and sessions.
///
/// Lookups of absent records return `PokerError::NotFound`; deletes of
/// absent records succeed.
#[async_trait::async_trait]
pub trait PresenceStore: Send + Sync {
    /// Insert a room together with its initial participants.
    async fn create_room(&self, room: &Room) -> Result<(), PokerError>;

    /// Load a room with its participants and votes.
    async fn get_room(&self, room_id: RoomId) -> Result<Room, PokerError>;

    /// Delete a room, its participant links and its votes.
    async fn delete_room(&self, room_id: RoomId) -> Result<(), PokerError>;

    async fn list_rooms(&self) -> Result<Vec<RoomId>, PokerError>;

    /// Insert (or rename) the user and link them to the room.
    async fn add_participant(&self, room_id: RoomId, user: &User) -> Result<(), PokerError>;

    /// Unlink the user from the room and drop their vote.
    async fn remove_participant(&self, room_id: RoomId, user_id: UserId)
        -> Result<(), PokerError>;

    async fn get_user(&self, user_id: UserId) -> Result<User, PokerError>;

    /// Persist the user's name and online flag.
    async fn update_user(&self, user: &User) -> Result<(), PokerError>;

    async fn delete_user(&self, user_id: UserId) -> Result<(), PokerError>;

    async fn set_user_online(&self, user_id: UserId, online: bool) -> Result<(), PokerError>;

    async fn create_session(&self, session: &Session) -> Result<(), PokerError>;

    async fn get_session(&self, session_id: SessionId) -> Result<Session, PokerError>;

    /// Persist the session's expiry.
    async fn update_session(&self, session: &Session) -> Result<(), PokerError>;

    async fn delete_session(&self, session_id: SessionId) -> Result<(), PokerError>;

    async fn list_sessions_by_room(&self, room_id: RoomId) -> Result<Vec<Session>, PokerError>;

    /// The most recent session owned by the user, if any.
    async fn get_session_by_user(&self, user_id: UserId) -> Result<Option<Session>, PokerError>;

    async fn update_scrum_master(&self, room_id: RoomId, user_id: UserId)
        -> Result<(), PokerError>;

    async fn upsert_vote(&self, room_id: RoomId, user_id: UserId, vote: &str)
        -> Result<(), PokerError>;

    async fn delete_vote(&self, room_id: RoomId, user_id: UserId) -> Result<(), PokerError>;

    /// Clear all votes and hide them again.
    async fn reset_votes(&self, room_id: RoomId) -> Result<(), PokerError>;

    async fn set_votes_revealed(&self, room_id: RoomId, revealed: bool)
        -> Result<(), PokerError>;
}
