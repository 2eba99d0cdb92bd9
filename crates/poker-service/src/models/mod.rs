//! Data models for Scrum Poker.
//!
//! `Room`, `User` and `Session` are plain records read from and written to
//! the presence store. They hold no locks; per-room mutation ordering is
//! provided by `services::RoomLocks`.
//!
//! `Room` deliberately does not implement `Serialize`. The only way to put a
//! room on the wire is [`Room::snapshot`], which masks votes until they are
//! revealed.

use chrono::{DateTime, Utc};
use common::types::{RoomId, SessionId, UserId};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Estimation deck accepted by `submit`.
pub const VOTE_DECK: [&str; 9] = ["1", "2", "3", "5", "8", "13", "21", "34", "?"];

/// Shown in place of a vote value while votes are hidden.
pub const VOTED_SENTINEL: &str = "voted";

/// Returns true if `vote` is a deck card, or empty (which clears a vote).
pub fn is_valid_vote(vote: &str) -> bool {
    vote.is_empty() || VOTE_DECK.contains(&vote)
}

/// A participant of exactly one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub is_online: bool,
}

impl User {
    /// Create a new user with a fresh id. New users start offline until a
    /// session or connection proves otherwise.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UserId::new(),
            name: name.into(),
            created_at: Utc::now(),
            is_online: false,
        }
    }
}

/// An estimation room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// May name a departed user when nobody was left to succeed them.
    pub scrum_master: UserId,
    pub participants: HashMap<UserId, User>,
    pub votes: HashMap<UserId, String>,
    pub votes_revealed: bool,
}

impl Room {
    /// Create a room with `creator` as its only participant and scrum master.
    pub fn new(name: impl Into<String>, creator: User) -> Self {
        let scrum_master = creator.id;
        let mut participants = HashMap::new();
        participants.insert(creator.id, creator);
        Self {
            id: RoomId::new(),
            name: name.into(),
            created_at: Utc::now(),
            scrum_master,
            participants,
            votes: HashMap::new(),
            votes_revealed: false,
        }
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        self.participants.contains_key(&user_id)
    }

    /// True only if `user_id` holds the role and is still a participant.
    pub fn is_scrum_master(&self, user_id: UserId) -> bool {
        self.scrum_master == user_id && self.is_participant(user_id)
    }

    /// The current role holder, if they are still in the room.
    pub fn scrum_master(&self) -> Option<&User> {
        self.participants.get(&self.scrum_master)
    }

    /// Participants other than `user_id`, sorted by id.
    pub fn participants_except(&self, user_id: UserId) -> Vec<UserId> {
        let mut others: Vec<UserId> = self
            .participants
            .keys()
            .copied()
            .filter(|id| *id != user_id)
            .collect();
        others.sort();
        others
    }

    /// The vote value an observer may see for `user_id`.
    ///
    /// Raw when revealed; otherwise `"voted"` or `None` when there is no vote.
    pub fn visible_vote(&self, user_id: UserId) -> Option<&str> {
        self.votes.get(&user_id).map(|vote| {
            if self.votes_revealed {
                vote.as_str()
            } else {
                VOTED_SENTINEL
            }
        })
    }

    /// Build the serializable view of this room.
    pub fn snapshot(&self) -> RoomSnapshot {
        let participants = self
            .participants
            .values()
            .map(|user| (user.id.to_string(), user.clone()))
            .collect();

        let votes = self
            .votes
            .keys()
            .filter_map(|user_id| {
                self.visible_vote(*user_id)
                    .map(|vote| (user_id.to_string(), vote.to_string()))
            })
            .collect();

        RoomSnapshot {
            id: self.id,
            name: self.name.clone(),
            created_at: self.created_at,
            scrum_master: self.scrum_master,
            participants,
            votes,
            votes_revealed: self.votes_revealed,
        }
    }
}

/// Wire representation of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub scrum_master: UserId,
    pub participants: BTreeMap<String, User>,
    pub votes: BTreeMap<String, String>,
    pub votes_revealed: bool,
}

/// A TTL-bound binding of a user to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub user_id: UserId,
    pub room_id: RoomId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Create a session starting at `now` that expires after `ttl`.
    pub fn new(user_id: UserId, room_id: RoomId, ttl: Duration, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            user_id,
            room_id,
            created_at: now,
            expires_at: now + ttl_delta(ttl),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Push the expiry to `now + ttl`.
    pub fn refresh(&mut self, ttl: Duration, now: DateTime<Utc>) {
        self.expires_at = now + ttl_delta(ttl);
    }
}

/// Convert a TTL into a chrono delta, saturating at one day and flooring at
/// one second so expiry is always strictly after creation.
fn ttl_delta(ttl: Duration) -> chrono::TimeDelta {
    let clamped = ttl.clamp(Duration::from_secs(1), Duration::from_secs(86_400));
    chrono::TimeDelta::from_std(clamped).unwrap_or_else(|_| chrono::TimeDelta::seconds(1))
}
