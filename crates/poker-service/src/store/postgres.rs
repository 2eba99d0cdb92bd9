//! Postgres presence store.
//!
//! All queries are parameterized. Child rows (participants, votes,
//! sessions) cascade when their room or user is deleted.

use super::PresenceStore;
use crate::errors::PokerError;
use crate::models::{Room, Session, User};
use chrono::{DateTime, Utc};
use common::types::{RoomId, SessionId, UserId};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::instrument;
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS rooms (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        scrum_master UUID NOT NULL,
        votes_revealed BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        is_online BOOLEAN NOT NULL DEFAULT FALSE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS room_participants (
        room_id UUID NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
        user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        PRIMARY KEY (room_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS votes (
        room_id UUID NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
        user_id UUID NOT NULL,
        vote TEXT NOT NULL,
        PRIMARY KEY (room_id, user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id UUID PRIMARY KEY,
        user_id UUID NOT NULL,
        room_id UUID NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS sessions_room_id_idx ON sessions (room_id)",
    "CREATE INDEX IF NOT EXISTS sessions_user_id_idx ON sessions (user_id)",
];

/// Presence store backed by Postgres.
#[derive(Clone)]
pub struct PgPresenceStore {
    pool: PgPool,
}

impl PgPresenceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they do not exist.
    #[instrument(skip_all, name = "poker.store.migrate")]
    pub async fn migrate(&self) -> Result<(), PokerError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Ping the database.
    pub async fn ping(&self) -> Result<(), PokerError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

fn user_from_row(row: &PgRow) -> Result<User, PokerError> {
    Ok(User {
        id: UserId(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        is_online: row.try_get("is_online")?,
    })
}

fn session_from_row(row: &PgRow) -> Result<Session, PokerError> {
    Ok(Session {
        id: SessionId(row.try_get::<Uuid, _>("id")?),
        user_id: UserId(row.try_get::<Uuid, _>("user_id")?),
        room_id: RoomId(row.try_get::<Uuid, _>("room_id")?),
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
    })
}

fn expect_affected(rows: u64, what: String) -> Result<(), PokerError> {
    if rows == 0 {
        Err(PokerError::NotFound(what))
    } else {
        Ok(())
    }
}

#[async_trait::async_trait]
impl PresenceStore for PgPresenceStore {
    #[instrument(skip_all, name = "poker.store.create_room", fields(room_id = %room.id))]
    async fn create_room(&self, room: &Room) -> Result<(), PokerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO rooms (id, name, created_at, scrum_master, votes_revealed) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(room.id.0)
        .bind(&room.name)
        .bind(room.created_at)
        .bind(room.scrum_master.0)
        .bind(room.votes_revealed)
        .execute(&mut *tx)
        .await?;

        for user in room.participants.values() {
            sqlx::query(
                "INSERT INTO users (id, name, created_at, is_online) VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
            )
            .bind(user.id.0)
            .bind(&user.name)
            .bind(user.created_at)
            .bind(user.is_online)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO room_participants (room_id, user_id) VALUES ($1, $2) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(room.id.0)
            .bind(user.id.0)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all, name = "poker.store.get_room", fields(room_id = %room_id))]
    async fn get_room(&self, room_id: RoomId) -> Result<Room, PokerError> {
        let row = sqlx::query(
            "SELECT id, name, created_at, scrum_master, votes_revealed FROM rooms WHERE id = $1",
        )
        .bind(room_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PokerError::NotFound(format!("room {room_id}")))?;

        let participant_rows = sqlx::query(
            "SELECT u.id, u.name, u.created_at, u.is_online \
             FROM users u JOIN room_participants rp ON rp.user_id = u.id \
             WHERE rp.room_id = $1",
        )
        .bind(room_id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut participants = HashMap::with_capacity(participant_rows.len());
        for participant in &participant_rows {
            let user = user_from_row(participant)?;
            participants.insert(user.id, user);
        }

        let vote_rows = sqlx::query("SELECT user_id, vote FROM votes WHERE room_id = $1")
            .bind(room_id.0)
            .fetch_all(&self.pool)
            .await?;

        let mut votes = HashMap::with_capacity(vote_rows.len());
        for vote in &vote_rows {
            votes.insert(
                UserId(vote.try_get::<Uuid, _>("user_id")?),
                vote.try_get::<String, _>("vote")?,
            );
        }

        Ok(Room {
            id: room_id,
            name: row.try_get("name")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            scrum_master: UserId(row.try_get::<Uuid, _>("scrum_master")?),
            participants,
            votes,
            votes_revealed: row.try_get("votes_revealed")?,
        })
    }

    async fn delete_room(&self, room_id: RoomId) -> Result<(), PokerError> {
        sqlx::query("DELETE FROM rooms WHERE id = $1")
            .bind(room_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_rooms(&self) -> Result<Vec<RoomId>, PokerError> {
        let rows = sqlx::query("SELECT id FROM rooms")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| -> Result<RoomId, PokerError> { Ok(RoomId(row.try_get::<Uuid, _>("id")?)) })
            .collect()
    }

    #[instrument(skip_all, name = "poker.store.add_participant", fields(room_id = %room_id, user_id = %user.id))]
    async fn add_participant(&self, room_id: RoomId, user: &User) -> Result<(), PokerError> {
        let mut tx = self.pool.begin().await?;

        let exists: bool = sqlx::query("SELECT EXISTS (SELECT 1 FROM rooms WHERE id = $1)")
            .bind(room_id.0)
            .fetch_one(&mut *tx)
            .await?
            .try_get(0)?;
        if !exists {
            return Err(PokerError::NotFound(format!("room {room_id}")));
        }

        sqlx::query(
            "INSERT INTO users (id, name, created_at, is_online) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name",
        )
        .bind(user.id.0)
        .bind(&user.name)
        .bind(user.created_at)
        .bind(user.is_online)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO room_participants (room_id, user_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(room_id.0)
        .bind(user.id.0)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn remove_participant(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), PokerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM room_participants WHERE room_id = $1 AND user_id = $2")
            .bind(room_id.0)
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM votes WHERE room_id = $1 AND user_id = $2")
            .bind(room_id.0)
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_user(&self, user_id: UserId) -> Result<User, PokerError> {
        let row = sqlx::query("SELECT id, name, created_at, is_online FROM users WHERE id = $1")
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| PokerError::NotFound(format!("user {user_id}")))?;
        user_from_row(&row)
    }

    async fn update_user(&self, user: &User) -> Result<(), PokerError> {
        let result = sqlx::query("UPDATE users SET name = $1, is_online = $2 WHERE id = $3")
            .bind(&user.name)
            .bind(user.is_online)
            .bind(user.id.0)
            .execute(&self.pool)
            .await?;
        expect_affected(result.rows_affected(), format!("user {}", user.id))
    }

    async fn delete_user(&self, user_id: UserId) -> Result<(), PokerError> {
        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_user_online(&self, user_id: UserId, online: bool) -> Result<(), PokerError> {
        let result = sqlx::query("UPDATE users SET is_online = $1 WHERE id = $2")
            .bind(online)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        expect_affected(result.rows_affected(), format!("user {user_id}"))
    }

    async fn create_session(&self, session: &Session) -> Result<(), PokerError> {
        sqlx::query(
            "INSERT INTO sessions (id, user_id, room_id, created_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(session.id.0)
        .bind(session.user_id.0)
        .bind(session.room_id.0)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: SessionId) -> Result<Session, PokerError> {
        let row = sqlx::query(
            "SELECT id, user_id, room_id, created_at, expires_at FROM sessions WHERE id = $1",
        )
        .bind(session_id.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| PokerError::NotFound(format!("session {session_id}")))?;
        session_from_row(&row)
    }

    async fn update_session(&self, session: &Session) -> Result<(), PokerError> {
        let result = sqlx::query("UPDATE sessions SET expires_at = $1 WHERE id = $2")
            .bind(session.expires_at)
            .bind(session.id.0)
            .execute(&self.pool)
            .await?;
        expect_affected(result.rows_affected(), format!("session {}", session.id))
    }

    async fn delete_session(&self, session_id: SessionId) -> Result<(), PokerError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(session_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_sessions_by_room(&self, room_id: RoomId) -> Result<Vec<Session>, PokerError> {
        let rows = sqlx::query(
            "SELECT id, user_id, room_id, created_at, expires_at FROM sessions WHERE room_id = $1",
        )
        .bind(room_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(session_from_row).collect()
    }

    async fn get_session_by_user(&self, user_id: UserId) -> Result<Option<Session>, PokerError> {
        let row = sqlx::query(
            "SELECT id, user_id, room_id, created_at, expires_at FROM sessions \
             WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(user_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(session_from_row).transpose()
    }

    async fn update_scrum_master(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<(), PokerError> {
        let result = sqlx::query("UPDATE rooms SET scrum_master = $1 WHERE id = $2")
            .bind(user_id.0)
            .bind(room_id.0)
            .execute(&self.pool)
            .await?;
        expect_affected(result.rows_affected(), format!("room {room_id}"))
    }

    async fn upsert_vote(
        &self,
        room_id: RoomId,
        user_id: UserId,
        vote: &str,
    ) -> Result<(), PokerError> {
        sqlx::query(
            "INSERT INTO votes (room_id, user_id, vote) VALUES ($1, $2, $3) \
             ON CONFLICT (room_id, user_id) DO UPDATE SET vote = EXCLUDED.vote",
        )
        .bind(room_id.0)
        .bind(user_id.0)
        .bind(vote)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                PokerError::NotFound(format!("room {room_id}"))
            }
            other => other.into(),
        })?;
        Ok(())
    }

    async fn delete_vote(&self, room_id: RoomId, user_id: UserId) -> Result<(), PokerError> {
        sqlx::query("DELETE FROM votes WHERE room_id = $1 AND user_id = $2")
            .bind(room_id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reset_votes(&self, room_id: RoomId) -> Result<(), PokerError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM votes WHERE room_id = $1")
            .bind(room_id.0)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("UPDATE rooms SET votes_revealed = FALSE WHERE id = $1")
            .bind(room_id.0)
            .execute(&mut *tx)
            .await?;
        expect_affected(result.rows_affected(), format!("room {room_id}"))?;

        tx.commit().await?;
        Ok(())
    }

    async fn set_votes_revealed(
        &self,
        room_id: RoomId,
        revealed: bool,
    ) -> Result<(), PokerError> {
        let result = sqlx::query("UPDATE rooms SET votes_revealed = $1 WHERE id = $2")
            .bind(revealed)
            .bind(room_id.0)
            .execute(&self.pool)
            .await?;
        expect_affected(result.rows_affected(), format!("room {room_id}"))
    }
}
