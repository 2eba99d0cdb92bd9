//! Room handlers.
//!
//! - `POST /api/rooms` - create a room; the creator becomes scrum master
//! - `GET /api/rooms/{roomId}` - room snapshot
//! - `POST /api/rooms/{roomId}/join` - join, or resume with a session cookie

use super::sessions::{session_cookie, session_id_from_jar};
use crate::errors::PokerError;
use crate::models::{RoomSnapshot, User};
use crate::routes::AppState;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::CookieJar;
use common::types::RoomId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    pub user_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    #[serde(default)]
    pub user_name: String,
}

#[derive(Debug, Serialize)]
pub struct JoinRoomResponse {
    pub user: User,
    pub room: RoomSnapshot,
}

/// Handler for POST /api/rooms
///
/// # Response
///
/// - 201 Created: room snapshot
/// - 400 Bad Request: missing or oversized name
#[instrument(skip_all, name = "poker.handlers.rooms.create")]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<RoomSnapshot>), PokerError> {
    let room = state
        .rooms
        .create_room(&request.name, &request.user_name)
        .await?;
    Ok((StatusCode::CREATED, Json(room.snapshot())))
}

/// Handler for GET /api/rooms/{roomId}
#[instrument(skip_all, name = "poker.handlers.rooms.get", fields(room_id = %room_id))]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomSnapshot>, PokerError> {
    let room_id: RoomId = room_id.parse()?;
    let room = state.rooms.get_room(room_id).await?;
    Ok(Json(room.snapshot()))
}

/// Handler for POST /api/rooms/{roomId}/join
///
/// A valid session cookie for this room resumes that user; otherwise a new
/// user named `userName` joins and a session cookie is set.
///
/// # Response
///
/// - 200 OK: `{user, room}`
/// - 400 Bad Request: no usable session and no `userName`
/// - 404 Not Found: unknown room
#[instrument(skip_all, name = "poker.handlers.rooms.join", fields(room_id = %room_id))]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    jar: CookieJar,
    Json(request): Json<JoinRoomRequest>,
) -> Result<(CookieJar, Json<JoinRoomResponse>), PokerError> {
    let room_id: RoomId = room_id.parse()?;

    if let Some(session_id) = session_id_from_jar(&jar) {
        if let Some(resolved) = state.sessions.resume_session(session_id, room_id).await? {
            let response = JoinRoomResponse {
                user: resolved.user,
                room: resolved.room.snapshot(),
            };
            return Ok((jar, Json(response)));
        }
    }

    let (user, _) = state.rooms.join_room(room_id, &request.user_name).await?;
    let session = state.sessions.create_session(user.id, room_id).await?;
    let room = state.rooms.get_room(room_id).await?;
    let user = room.participants.get(&user.id).cloned().unwrap_or(user);

    let jar = jar.add(session_cookie(
        session.id.to_string(),
        state.config.production,
    ));
    Ok((
        jar,
        Json(JoinRoomResponse {
            user,
            room: room.snapshot(),
        }),
    ))
}
