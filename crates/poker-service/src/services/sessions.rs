//! Session lifecycle.
//!
//! Sessions bind a user to a room for a TTL. They are created on join,
//! refreshed on proven activity (a live connection, a session lookup, a
//! disconnect), and removed on logout, departure, or by the periodic sweep
//! once expired while the owner is not live.

use super::rooms::RoomService;
use crate::errors::PokerError;
use crate::hub::{Departure, Registry};
use crate::models::{Room, Session, User};
use crate::observability::metrics;
use crate::protocol::{ActionType, OutboundMessage};
use crate::store::PresenceStore;

use chrono::{DateTime, Utc};
use common::types::{RoomId, SessionId, UserId};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub rooms_scanned: usize,
    pub refreshed: usize,
    pub evicted: usize,
    pub rooms_deleted: usize,
    pub errors: usize,
}

/// What disconnect reconciliation did for one departure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// The user was marked offline and their session kept alive.
    Offline,
    /// Another connection for the user is still live; nothing changed.
    StillConnected,
    /// The user is no longer a participant (left, or room gone).
    NotParticipant,
}

impl DisconnectOutcome {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            DisconnectOutcome::Offline => "offline",
            DisconnectOutcome::StillConnected => "still_connected",
            DisconnectOutcome::NotParticipant => "not_participant",
        }
    }
}

/// A validated session with the records it refers to.
#[derive(Debug, Clone)]
pub struct ResolvedSession {
    pub session: Session,
    pub user: User,
    pub room: Room,
}

/// Creates, resolves, refreshes and sweeps sessions.
pub struct SessionManager {
    store: Arc<dyn PresenceStore>,
    registry: Registry,
    rooms: Arc<RoomService>,
    ttl: Duration,
}

impl SessionManager {
    #[must_use]
    pub fn new(rooms: Arc<RoomService>, ttl: Duration) -> Self {
        Self {
            store: Arc::clone(rooms.store()),
            registry: rooms.registry().clone(),
            rooms,
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Start a session for a participant and mark them online.
    pub async fn create_session(
        &self,
        user_id: UserId,
        room_id: RoomId,
    ) -> Result<Session, PokerError> {
        let _guard = self.rooms.lock(room_id).await;
        self.store.get_user(user_id).await?;
        let room = self.store.get_room(room_id).await?;
        if !room.is_participant(user_id) {
            return Err(PokerError::PermissionDenied(format!(
                "{user_id} is not a participant"
            )));
        }

        let session = Session::new(user_id, room_id, self.ttl, Utc::now());
        self.store.create_session(&session).await?;
        self.store.set_user_online(user_id, true).await?;

        info!(
            target: "poker.session",
            session_id = %session.id,
            room_id = %room_id,
            user_id = %user_id,
            "Session created"
        );
        Ok(session)
    }

    /// Resolve the caller's session for `room_id`, refreshing it and
    /// announcing the user as online.
    ///
    /// Fails with `NotFound` without a session, `PermissionDenied` if the
    /// session belongs to another room, and `SessionExpired` once expired.
    pub async fn lookup_session(
        &self,
        session_id: Option<SessionId>,
        room_id: RoomId,
    ) -> Result<ResolvedSession, PokerError> {
        let session_id =
            session_id.ok_or_else(|| PokerError::NotFound("session".to_string()))?;
        let mut session = self.store.get_session(session_id).await?;
        if session.room_id != room_id {
            return Err(PokerError::PermissionDenied(
                "session belongs to another room".to_string(),
            ));
        }
        let now = Utc::now();
        if session.is_expired(now) {
            return Err(PokerError::SessionExpired);
        }

        let _guard = self.rooms.lock(room_id).await;
        session.refresh(self.ttl, now);
        self.store.update_session(&session).await?;
        self.store.set_user_online(session.user_id, true).await?;
        let user = self.store.get_user(session.user_id).await?;
        let room = self.store.get_room(room_id).await?;

        self.rooms
            .publish(
                room_id,
                OutboundMessage::event(ActionType::Online, json!({ "userId": user.id })),
            )
            .await?;

        debug!(
            target: "poker.session",
            session_id = %session.id,
            user_id = %user.id,
            "Session resumed"
        );
        Ok(ResolvedSession {
            session,
            user,
            room,
        })
    }

    /// Reuse an existing session on join.
    ///
    /// Returns `None` when there is no usable session for this room, in
    /// which case the caller joins as a new user. An expired session is
    /// deleted.
    pub async fn resume_session(
        &self,
        session_id: SessionId,
        room_id: RoomId,
    ) -> Result<Option<ResolvedSession>, PokerError> {
        let mut session = match self.store.get_session(session_id).await {
            Ok(session) => session,
            Err(PokerError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if session.room_id != room_id {
            return Ok(None);
        }

        let _guard = self.rooms.lock(room_id).await;
        let now = Utc::now();
        if session.is_expired(now) {
            self.store.delete_session(session.id).await?;
            debug!(
                target: "poker.session",
                session_id = %session.id,
                "Expired session discarded on join"
            );
            return Ok(None);
        }

        let mut room = self.store.get_room(room_id).await?;
        let Some(user) = room.participants.get_mut(&session.user_id) else {
            self.store.delete_session(session.id).await?;
            return Ok(None);
        };
        user.is_online = true;
        let user = user.clone();

        session.refresh(self.ttl, now);
        self.store.update_session(&session).await?;
        self.store.set_user_online(user.id, true).await?;
        self.rooms.announce_join(&room, &user).await?;

        info!(
            target: "poker.session",
            session_id = %session.id,
            room_id = %room_id,
            user_id = %user.id,
            "Rejoined with existing session"
        );
        Ok(Some(ResolvedSession {
            session,
            user,
            room,
        }))
    }

    /// Log out: mark the user offline, publish the room, drop the session.
    pub async fn delete_session(&self, session_id: SessionId) -> Result<(), PokerError> {
        let session = self.store.get_session(session_id).await?;
        let _guard = self.rooms.lock(session.room_id).await;

        match self.store.set_user_online(session.user_id, false).await {
            Ok(()) | Err(PokerError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.store.get_room(session.room_id).await {
            Ok(room) => self.rooms.publish_snapshot(&room).await?,
            Err(PokerError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.store.delete_session(session_id).await?;

        info!(
            target: "poker.session",
            session_id = %session_id,
            user_id = %session.user_id,
            "Session deleted"
        );
        Ok(())
    }

    /// Bring presence state in line after a connection went away.
    pub async fn reconcile_disconnect(
        &self,
        departure: Departure,
    ) -> Result<DisconnectOutcome, PokerError> {
        let Departure {
            room_id, user_id, ..
        } = departure;

        if self.registry.is_connected(room_id, user_id).await {
            return Ok(DisconnectOutcome::StillConnected);
        }

        let _guard = self.rooms.lock(room_id).await;
        let room = match self.store.get_room(room_id).await {
            Ok(room) => room,
            Err(PokerError::NotFound(_)) => return Ok(DisconnectOutcome::NotParticipant),
            Err(e) => return Err(e),
        };
        if !room.is_participant(user_id) {
            return Ok(DisconnectOutcome::NotParticipant);
        }
        // A reconnect may have landed while we waited for the lock.
        if self.registry.is_connected(room_id, user_id).await {
            return Ok(DisconnectOutcome::StillConnected);
        }

        self.store.set_user_online(user_id, false).await?;

        let now = Utc::now();
        match self.store.get_session_by_user(user_id).await? {
            Some(mut session) => {
                session.refresh(self.ttl, now);
                self.store.update_session(&session).await?;
            }
            None => {
                let session = Session::new(user_id, room_id, self.ttl, now);
                self.store.create_session(&session).await?;
            }
        }

        self.rooms
            .publish(
                room_id,
                OutboundMessage::event(ActionType::Offline, json!({ "userId": user_id })),
            )
            .await?;

        debug!(
            target: "poker.session",
            room_id = %room_id,
            user_id = %user_id,
            reason = departure.reason.as_str(),
            "User marked offline"
        );
        Ok(DisconnectOutcome::Offline)
    }

    /// Run one sweep cycle as of now.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Run one sweep cycle as of `now`.
    ///
    /// Expired sessions of live users are refreshed; expired sessions of
    /// users who are not live are evicted along with the user. Errors on one
    /// room or session are logged and counted, and the sweep moves on.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();

        let room_ids = match self.store.list_rooms().await {
            Ok(room_ids) => room_ids,
            Err(e) => {
                warn!(target: "poker.session.sweeper", error = %e, "Failed to list rooms");
                report.errors += 1;
                metrics::record_sweep(started.elapsed(), 0, 0, report.errors);
                return report;
            }
        };

        for room_id in room_ids {
            report.rooms_scanned += 1;
            if let Err(e) = self.sweep_room(room_id, now, &mut report).await {
                warn!(
                    target: "poker.session.sweeper",
                    room_id = %room_id,
                    error = %e,
                    "Sweep failed for room"
                );
                report.errors += 1;
            }
        }

        metrics::record_sweep(
            started.elapsed(),
            report.evicted,
            report.refreshed,
            report.errors,
        );
        report
    }

    async fn sweep_room(
        &self,
        room_id: RoomId,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<(), PokerError> {
        let _guard = self.rooms.lock(room_id).await;
        let mut room = match self.store.get_room(room_id).await {
            Ok(room) => room,
            Err(PokerError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let sessions = self.store.list_sessions_by_room(room_id).await?;

        for mut session in sessions {
            if !session.is_expired(now) {
                continue;
            }

            let result = if self.is_live(&room, session.user_id).await {
                session.refresh(self.ttl, now);
                self.store.update_session(&session).await.map(|()| {
                    report.refreshed += 1;
                })
            } else if room.is_participant(session.user_id) {
                self.rooms
                    .depart_locked(&mut room, session.user_id, Some(session.id))
                    .await
                    .map(|outcome| {
                        report.evicted += 1;
                        if outcome.room_deleted {
                            report.rooms_deleted += 1;
                        }
                    })
            } else {
                self.store.delete_session(session.id).await
            };

            if let Err(e) = result {
                warn!(
                    target: "poker.session.sweeper",
                    room_id = %room_id,
                    session_id = %session.id,
                    user_id = %session.user_id,
                    error = %e,
                    "Failed to process expired session"
                );
                report.errors += 1;
            }
        }

        let still_exists = !room.participants.is_empty();
        if !still_exists && self.store.get_room(room_id).await.is_ok() {
            self.rooms.delete_room_locked(room_id).await?;
            report.rooms_deleted += 1;
        }
        Ok(())
    }

    /// A user is live if flagged online or holding a registered connection.
    async fn is_live(&self, room: &Room, user_id: UserId) -> bool {
        room.participants
            .get(&user_id)
            .is_some_and(|user| user.is_online)
            || self.registry.is_connected(room.id, user_id).await
    }
}
