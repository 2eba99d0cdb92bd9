//! Presence store wrapper that fails on demand.
//!
//! # Example
//!
//! ```rust,ignore
//! let store = Arc::new(FlakyStore::new(Arc::new(MemoryStore::new())));
//! store.fail_operation("set_user_online");
//! // every set_user_online now returns PokerError::Store
//! store.heal();
//! ```

use async_trait::async_trait;
use common::types::{RoomId, SessionId, UserId};
use poker_service::errors::PokerError;
use poker_service::models::{Room, Session, User};
use poker_service::store::{MemoryStore, PresenceStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Delegates to a [`MemoryStore`] unless a failure is armed.
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing: Mutex<HashSet<&'static str>>,
    fail_next: AtomicUsize,
    failures: AtomicUsize,
}

impl FlakyStore {
    #[must_use]
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            fail_next: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// The wrapped store, for direct inspection.
    #[must_use]
    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    /// Fail every call of `operation` until healed.
    pub fn fail_operation(&self, operation: &'static str) {
        self.failing.lock().unwrap().insert(operation);
    }

    /// Fail the next `count` calls of any operation.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Disarm all failures.
    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
        self.fail_next.store(0, Ordering::SeqCst);
    }

    /// Number of injected failures returned so far.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self, operation: &'static str) -> Result<(), PokerError> {
        let armed = self.failing.lock().unwrap().contains(operation)
            || self
                .fail_next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        if armed {
            self.failures.fetch_add(1, Ordering::SeqCst);
            Err(PokerError::Store(format!("injected failure in {operation}")))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PresenceStore for FlakyStore {
    async fn create_room(&self, room: &Room) -> Result<(), PokerError> {
        self.check("create_room")?;
        self.inner.create_room(room).await
    }

    async fn get_room(&self, room_id: RoomId) -> Result<Room, PokerError> {
        self.check("get_room")?;
        self.inner.get_room(room_id).await
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<(), PokerError> {
        self.check("delete_room")?;
        self.inner.delete_room(room_id).await
    }

    async fn list_rooms(&self) -> Result<Vec<RoomId>, PokerError> {
        self.check("list_rooms")?;
        self.inner.list_rooms().await
    }

    async fn add_participant(&self, room_id: RoomId, user: &User) -> Result<(), PokerError> {
        self.check("add_participant")?;
        self.inner.add_participant(room_id, user).await
    }

    async fn remove_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), PokerError> {
        self.check("remove_participant")?;
        self.inner.remove_participant(room_id, user_id).await
    }

    async fn get_user(&self, user_id: UserId) -> Result<User, PokerError> {
        self.check("get_user")?;
        self.inner.get_user(user_id).await
    }

    async fn update_user(&self, user: &User) -> Result<(), PokerError> {
        self.check("update_user")?;
        self.inner.update_user(user).await
    }

    async fn delete_user(&self, user_id: UserId) -> Result<(), PokerError> {
        self.check("delete_user")?;
        self.inner.delete_user(user_id).await
    }

    async fn set_user_online(&self, user_id: UserId, online: bool) -> Result<(), PokerError> {
        self.check("set_user_online")?;
        self.inner.set_user_online(user_id, online).await
    }

    async fn create_session(&self, session: &Session) -> Result<(), PokerError> {
        self.check("create_session")?;
        self.inner.create_session(session).await
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Session, PokerError> {
        self.check("get_session")?;
        self.inner.get_session(session_id).await
    }

    async fn update_session(&self, session: &Session) -> Result<(), PokerError> {
        self.check("update_session")?;
        self.inner.update_session(session).await
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), PokerError> {
        self.check("delete_session")?;
        self.inner.delete_session(session_id).await
    }

    async fn list_sessions_by_room(&self, room_id: RoomId) -> Result<Vec<Session>, PokerError> {
        self.check("list_sessions_by_room")?;
        self.inner.list_sessions_by_room(room_id).await
    }

    async fn get_session_by_user(&self, user_id: UserId) -> Result<Option<Session>, PokerError> {
        self.check("get_session_by_user")?;
        self.inner.get_session_by_user(user_id).await
    }

    async fn update_scrum_master(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), PokerError> {
        self.check("update_scrum_master")?;
        self.inner.update_scrum_master(room_id, user_id).await
    }

    async fn upsert_vote(
        &self,
        room_id: RoomId,
        user_id: UserId,
        vote: &str,
    ) -> Result<(), PokerError> {
        self.check("upsert_vote")?;
        self.inner.upsert_vote(room_id, user_id, vote).await
    }

    async fn delete_vote(&self, room_id: RoomId, user_id: UserId) -> Result<(), PokerError> {
        self.check("delete_vote")?;
        self.inner.delete_vote(room_id, user_id).await
    }

    async fn reset_votes(&self, room_id: RoomId) -> Result<(), PokerError> {
        self.check("reset_votes")?;
        self.inner.reset_votes(room_id).await
    }

    async fn set_votes_revealed(&self, room_id: RoomId, revealed: bool) -> Result<(), PokerError> {
        self.check("set_votes_revealed")?;
        self.inner.set_votes_revealed(room_id, revealed).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_armed_operation_fails_until_healed() {
        let store = FlakyStore::new(Arc::new(MemoryStore::new()));
        store.fail_operation("list_rooms");

        assert!(matches!(store.list_rooms().await, Err(PokerError::Store(_))));
        assert!(matches!(store.list_rooms().await, Err(PokerError::Store(_))));
        assert_eq!(store.failures(), 2);

        store.heal();
        assert!(store.list_rooms().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fail_next_counts_down() {
        let store = FlakyStore::new(Arc::new(MemoryStore::new()));
        store.fail_next(1);

        assert!(store.list_rooms().await.is_err());
        assert!(store.list_rooms().await.is_ok());
    }
}
