//! Room operations.
//!
//! Each mutating operation runs under the room's lock and follows the same
//! shape: load the room from the store, validate, persist the change, then
//! broadcast the resulting event. Nothing is broadcast for a change that
//! failed to persist.

use super::room_locks::{RoomGuard, RoomLocks};
use super::successor::SuccessorPolicy;
use crate::errors::PokerError;
use crate::hub::Registry;
use crate::models::{is_valid_vote, Room, User};
use crate::protocol::{ActionType, OutboundMessage};
use crate::store::PresenceStore;

use common::types::{RoomId, SessionId, UserId};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Longest accepted room or user name, in characters.
pub const MAX_NAME_LENGTH: usize = 64;

/// What a departure changed besides removing the participant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepartureOutcome {
    /// The role was reassigned to this participant.
    pub new_scrum_master: Option<UserId>,
    /// The room was deleted because it became empty.
    pub room_deleted: bool,
}

/// Room operations shared by the REST handlers, the message router and the
/// session manager.
pub struct RoomService {
    store: Arc<dyn PresenceStore>,
    registry: Registry,
    locks: RoomLocks,
    successor: SuccessorPolicy,
}

impl RoomService {
    #[must_use]
    pub fn new(
        store: Arc<dyn PresenceStore>,
        registry: Registry,
        successor: SuccessorPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            locks: RoomLocks::new(),
            successor,
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn PresenceStore> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Take the room's mutation lock.
    pub async fn lock(&self, room_id: RoomId) -> RoomGuard {
        self.locks.acquire(room_id).await
    }

    /// Rooms with a held or awaited lock.
    #[must_use]
    pub fn locked_rooms(&self) -> usize {
        self.locks.len()
    }

    /// Create a room whose creator is its only participant and role holder.
    pub async fn create_room(&self, name: &str, user_name: &str) -> Result<Room, PokerError> {
        let name = validate_name("name", name)?;
        let user_name = validate_name("userName", user_name)?;

        let room = Room::new(name, User::new(user_name));
        self.store.create_room(&room).await?;

        info!(
            target: "poker.rooms",
            room_id = %room.id,
            scrum_master = %room.scrum_master,
            "Room created"
        );
        Ok(room)
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<Room, PokerError> {
        self.store.get_room(room_id).await
    }

    /// Add a new user to the room and announce them.
    pub async fn join_room(
        &self,
        room_id: RoomId,
        user_name: &str,
    ) -> Result<(User, Room), PokerError> {
        let user_name = validate_name("userName", user_name)?;
        let _guard = self.lock(room_id).await;

        let mut room = self.store.get_room(room_id).await?;
        let user = User::new(user_name);
        self.store.add_participant(room_id, &user).await?;
        room.participants.insert(user.id, user.clone());

        info!(
            target: "poker.rooms",
            room_id = %room_id,
            user_id = %user.id,
            "User joined room"
        );
        self.announce_join(&room, &user).await?;
        Ok((user, room))
    }

    /// Broadcast a `join` event for `user` followed by a room snapshot.
    pub async fn announce_join(&self, room: &Room, user: &User) -> Result<(), PokerError> {
        self.publish(room.id, OutboundMessage::event(ActionType::Join, serde_json::to_value(user)?))
            .await?;
        self.publish_snapshot(room).await
    }

    /// Record, change or clear (`""`) a participant's vote.
    pub async fn submit_vote(
        &self,
        room_id: RoomId,
        user_id: UserId,
        vote: &str,
    ) -> Result<(), PokerError> {
        if !vote.is_empty() && !is_valid_vote(vote) {
            return Err(PokerError::Validation(format!("invalid vote: {vote}")));
        }

        let _guard = self.lock(room_id).await;
        let mut room = self.store.get_room(room_id).await?;
        require_participant(&room, user_id)?;

        if vote.is_empty() {
            self.store.delete_vote(room_id, user_id).await?;
            room.votes.remove(&user_id);
        } else {
            self.store.upsert_vote(room_id, user_id, vote).await?;
            room.votes.insert(user_id, vote.to_string());
        }

        let visible = room.visible_vote(user_id).unwrap_or_default();
        debug!(
            target: "poker.rooms",
            room_id = %room_id,
            user_id = %user_id,
            revealed = room.votes_revealed,
            "Vote recorded"
        );
        self.publish(
            room_id,
            OutboundMessage::event(
                ActionType::Submit,
                json!({ "userId": user_id, "vote": visible }),
            ),
        )
        .await
    }

    /// Reveal all votes. Role holder only.
    pub async fn reveal(&self, room_id: RoomId, user_id: UserId) -> Result<(), PokerError> {
        let _guard = self.lock(room_id).await;
        let mut room = self.store.get_room(room_id).await?;
        require_scrum_master(&room, user_id)?;

        self.store.set_votes_revealed(room_id, true).await?;
        room.votes_revealed = true;

        let votes: BTreeMap<String, String> = room
            .votes
            .iter()
            .map(|(id, vote)| (id.to_string(), vote.clone()))
            .collect();
        info!(
            target: "poker.rooms",
            room_id = %room_id,
            votes = votes.len(),
            "Votes revealed"
        );
        self.publish(
            room_id,
            OutboundMessage::event(ActionType::Reveal, json!({ "votes": votes })),
        )
        .await
    }

    /// Clear all votes and hide them. Role holder only.
    pub async fn reset(&self, room_id: RoomId, user_id: UserId) -> Result<(), PokerError> {
        let _guard = self.lock(room_id).await;
        let room = self.store.get_room(room_id).await?;
        require_scrum_master(&room, user_id)?;

        self.store.reset_votes(room_id).await?;
        info!(target: "poker.rooms", room_id = %room_id, "Votes reset");
        self.publish(
            room_id,
            OutboundMessage::event(ActionType::Reset, json!({})),
        )
        .await
    }

    /// Hand the role to another participant. Role holder only.
    pub async fn transfer(
        &self,
        room_id: RoomId,
        user_id: UserId,
        new_scrum_master: UserId,
    ) -> Result<(), PokerError> {
        let _guard = self.lock(room_id).await;
        let room = self.store.get_room(room_id).await?;
        require_scrum_master(&room, user_id)?;
        if !room.is_participant(new_scrum_master) {
            return Err(PokerError::Validation(format!(
                "{new_scrum_master} is not a participant"
            )));
        }

        self.store
            .update_scrum_master(room_id, new_scrum_master)
            .await?;
        info!(
            target: "poker.rooms",
            room_id = %room_id,
            from = %user_id,
            to = %new_scrum_master,
            "Scrum master transferred"
        );
        self.publish(room_id, transfer_event(user_id, new_scrum_master))
            .await
    }

    /// Change a participant's display name.
    pub async fn rename(
        &self,
        room_id: RoomId,
        user_id: UserId,
        name: &str,
    ) -> Result<(), PokerError> {
        let name = validate_name("name", name)?;
        let _guard = self.lock(room_id).await;
        let room = self.store.get_room(room_id).await?;
        let mut user = require_participant(&room, user_id)?.clone();

        user.name.clone_from(&name);
        self.store.update_user(&user).await?;
        self.publish(
            room_id,
            OutboundMessage::event(ActionType::Rename, json!({ "userId": user_id, "name": name })),
        )
        .await
    }

    /// Remove a participant at their own request.
    pub async fn leave(&self, room_id: RoomId, user_id: UserId) -> Result<DepartureOutcome, PokerError> {
        let _guard = self.lock(room_id).await;
        let mut room = self.store.get_room(room_id).await?;
        require_participant(&room, user_id)?;

        let session = self
            .store
            .get_session_by_user(user_id)
            .await?
            .filter(|session| session.room_id == room_id);
        self.depart_locked(&mut room, user_id, session.map(|s| s.id))
            .await
    }

    /// Remove a participant from a room the caller has already locked.
    ///
    /// Reassigns the role if the departing user held it and others remain,
    /// deletes the user and `session_id`, broadcasts `leave`, and deletes the
    /// room once it is empty.
    pub async fn depart_locked(
        &self,
        room: &mut Room,
        user_id: UserId,
        session_id: Option<SessionId>,
    ) -> Result<DepartureOutcome, PokerError> {
        let room_id = room.id;
        let mut outcome = DepartureOutcome::default();

        if room.scrum_master == user_id {
            let candidates = room.participants_except(user_id);
            if let Some(successor) = self.successor.choose(&candidates) {
                self.store.update_scrum_master(room_id, successor).await?;
                room.scrum_master = successor;
                outcome.new_scrum_master = Some(successor);
                info!(
                    target: "poker.rooms",
                    room_id = %room_id,
                    from = %user_id,
                    to = %successor,
                    "Scrum master reassigned"
                );
                self.publish(room_id, transfer_event(user_id, successor))
                    .await?;
            }
        }

        self.store.remove_participant(room_id, user_id).await?;
        room.participants.remove(&user_id);
        room.votes.remove(&user_id);
        self.store.delete_user(user_id).await?;
        if let Some(session_id) = session_id {
            self.store.delete_session(session_id).await?;
        }

        info!(
            target: "poker.rooms",
            room_id = %room_id,
            user_id = %user_id,
            remaining = room.participants.len(),
            "User left room"
        );
        self.publish(
            room_id,
            OutboundMessage::event(ActionType::Leave, json!({ "userId": user_id })),
        )
        .await?;

        if room.participants.is_empty() {
            self.delete_room_locked(room_id).await?;
            outcome.room_deleted = true;
        }
        Ok(outcome)
    }

    /// Delete an empty room the caller has locked.
    pub async fn delete_room_locked(&self, room_id: RoomId) -> Result<(), PokerError> {
        self.store.delete_room(room_id).await?;
        info!(target: "poker.rooms", room_id = %room_id, "Empty room deleted");
        Ok(())
    }

    /// Broadcast the room's current snapshot.
    pub async fn publish_snapshot(&self, room: &Room) -> Result<(), PokerError> {
        self.publish(room.id, OutboundMessage::room_update(room.snapshot()))
            .await
    }

    /// Broadcast a message to the room's subscribers.
    pub async fn publish(&self, room_id: RoomId, message: OutboundMessage) -> Result<(), PokerError> {
        let report = self.registry.broadcast(room_id, &message).await?;
        debug!(
            target: "poker.rooms",
            room_id = %room_id,
            delivered = report.delivered,
            dropped = report.dropped,
            "Broadcast"
        );
        Ok(())
    }
}

fn transfer_event(user_id: UserId, new_scrum_master: UserId) -> OutboundMessage {
    OutboundMessage::event(
        ActionType::Transfer,
        json!({ "userId": user_id, "newScrumMasterId": new_scrum_master }),
    )
}

fn require_participant(room: &Room, user_id: UserId) -> Result<&User, PokerError> {
    room.participants
        .get(&user_id)
        .ok_or_else(|| PokerError::PermissionDenied(format!("{user_id} is not a participant")))
}

fn require_scrum_master(room: &Room, user_id: UserId) -> Result<(), PokerError> {
    if room.is_scrum_master(user_id) {
        Ok(())
    } else {
        Err(PokerError::PermissionDenied(
            "only the scrum master may do this".to_string(),
        ))
    }
}

fn validate_name(field: &str, value: &str) -> Result<String, PokerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PokerError::Validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        return Err(PokerError::Validation(format!(
            "{field} must be at most {MAX_NAME_LENGTH} characters"
        )));
    }
    Ok(trimmed.to_string())
}
