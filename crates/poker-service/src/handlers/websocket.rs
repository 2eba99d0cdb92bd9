//! WebSocket upgrade handler.
//!
//! `GET /ws/{roomId}?user_id=` upgrades to a websocket bound to the room and
//! user. The user must already be a participant.

use crate::errors::PokerError;
use crate::hub::{connection::MAX_MESSAGE_SIZE, serve_connection, FrameHandler};
use crate::routes::AppState;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::response::Response;
use common::types::{RoomId, UserId};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub user_id: String,
}

/// Handler for GET /ws/{roomId}
///
/// # Response
///
/// - 101 Switching Protocols
/// - 400 Bad Request: missing or malformed `user_id`
/// - 403 Forbidden: user is not a participant
/// - 404 Not Found: unknown room
#[instrument(skip_all, name = "poker.handlers.websocket", fields(room_id = %room_id))]
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<WsQuery>,
) -> Result<Response, PokerError> {
    let room_id: RoomId = room_id.parse()?;
    if query.user_id.is_empty() {
        return Err(PokerError::Validation("user_id is required".to_string()));
    }
    let user_id: UserId = query.user_id.parse()?;

    let room = state.rooms.get_room(room_id).await?;
    if !room.is_participant(user_id) {
        return Err(PokerError::PermissionDenied(
            "user is not in this room".to_string(),
        ));
    }

    debug!(
        target: "poker.handlers.websocket",
        room_id = %room_id,
        user_id = %user_id,
        "Upgrading connection"
    );

    let registry = state.registry.clone();
    let handler: Arc<dyn FrameHandler> = state.router.clone();
    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            serve_connection(room_id, user_id, sink, stream, registry, handler).await;
        }))
}
