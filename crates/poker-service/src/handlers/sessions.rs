//! Session handlers.
//!
//! - `POST /api/sessions/{userId}/{roomId}` - start a session, set cookie
//! - `GET /api/sessions?roomId=` - resolve the cookie session
//! - `DELETE /api/sessions` - log out and clear the cookie
//!
//! The session id travels in the `sessionId` cookie: `HttpOnly`, path `/`,
//! and `Secure` with `SameSite=None` in production (`SameSite=Lax`
//! otherwise).

use crate::errors::PokerError;
use crate::models::{RoomSnapshot, Session, User};
use crate::routes::AppState;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::cookie::{Cookie, SameSite};
use axum_extra::extract::CookieJar;
use common::types::{RoomId, SessionId, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Name of the session cookie.
pub const SESSION_COOKIE: &str = "sessionId";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQuery {
    pub room_id: String,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: Session,
    pub user: User,
    pub room: RoomSnapshot,
}

/// Build the session cookie.
pub fn session_cookie(value: String, production: bool) -> Cookie<'static> {
    let same_site = if production {
        SameSite::None
    } else {
        SameSite::Lax
    };
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .secure(production)
        .same_site(same_site)
        .build()
}

/// The session id carried by the request, if present and well-formed.
pub fn session_id_from_jar(jar: &CookieJar) -> Option<SessionId> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| cookie.value().parse().ok())
}

/// Handler for POST /api/sessions/{userId}/{roomId}
///
/// # Response
///
/// - 201 Created: `{sessionId}` and the session cookie
/// - 403 Forbidden: user is not a participant of the room
/// - 404 Not Found: unknown user or room
#[instrument(skip_all, name = "poker.handlers.sessions.create", fields(user_id = %user_id, room_id = %room_id))]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Path((user_id, room_id)): Path<(String, String)>,
    jar: CookieJar,
) -> Result<(StatusCode, CookieJar, Json<CreateSessionResponse>), PokerError> {
    let user_id: UserId = user_id.parse()?;
    let room_id: RoomId = room_id.parse()?;

    let session = state.sessions.create_session(user_id, room_id).await?;
    let jar = jar.add(session_cookie(
        session.id.to_string(),
        state.config.production,
    ));
    Ok((
        StatusCode::CREATED,
        jar,
        Json(CreateSessionResponse {
            session_id: session.id,
        }),
    ))
}

/// Handler for GET /api/sessions?roomId=
///
/// # Response
///
/// - 200 OK: `{session, user, room}`; the session is refreshed
/// - 401 Unauthorized: session expired
/// - 403 Forbidden: session belongs to another room
/// - 404 Not Found: no session cookie or unknown session
#[instrument(skip_all, name = "poker.handlers.sessions.get")]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SessionQuery>,
    jar: CookieJar,
) -> Result<Json<SessionResponse>, PokerError> {
    let room_id: RoomId = query.room_id.parse()?;
    let resolved = state
        .sessions
        .lookup_session(session_id_from_jar(&jar), room_id)
        .await?;
    Ok(Json(SessionResponse {
        session: resolved.session,
        user: resolved.user,
        room: resolved.room.snapshot(),
    }))
}

/// Handler for DELETE /api/sessions
///
/// Logs the user out. The cookie is cleared even if the session record is
/// already gone.
///
/// # Response
///
/// - 200 OK
/// - 404 Not Found: no session cookie
#[instrument(skip_all, name = "poker.handlers.sessions.delete")]
pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<(CookieJar, &'static str), PokerError> {
    let cookie = jar
        .get(SESSION_COOKIE)
        .ok_or_else(|| PokerError::NotFound("session".to_string()))?;
    let session_id: SessionId = cookie.value().parse()?;

    match state.sessions.delete_session(session_id).await {
        Ok(()) => {}
        Err(PokerError::NotFound(_)) => {
            debug!(
                target: "poker.handlers.sessions",
                session_id = %session_id,
                "Session already gone, clearing cookie"
            );
        }
        Err(e) => return Err(e),
    }

    let jar = jar.remove(session_cookie(String::new(), state.config.production));
    Ok((jar, "OK"))
}
