//! Inbound frame dispatch.
//!
//! Every frame arrives bound to the connection's `(room, user)`. Handlers
//! accept a payload `userId` only when it matches the connection's user.
//! Unrecognized actions are re-broadcast to the room verbatim.

use crate::errors::PokerError;
use crate::hub::{ConnectionHandle, FrameHandler};
use crate::observability::metrics;
use crate::protocol::{ActionType, InboundFrame, OutboundMessage};
use crate::services::RoomService;

use common::types::UserId;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActorPayload {
    user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitPayload {
    user_id: UserId,
    vote: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransferPayload {
    user_id: UserId,
    new_scrum_master_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenamePayload {
    user_id: UserId,
    name: String,
}

/// Routes decoded client frames to room operations.
pub struct MessageRouter {
    rooms: Arc<RoomService>,
}

impl MessageRouter {
    #[must_use]
    pub fn new(rooms: Arc<RoomService>) -> Self {
        Self { rooms }
    }

    /// Apply one frame from `connection`.
    pub async fn dispatch(
        &self,
        connection: &ConnectionHandle,
        frame: InboundFrame,
    ) -> Result<(), PokerError> {
        let room_id = connection.room_id();
        let Some(action) = ActionType::parse(&frame.action) else {
            return self.rebroadcast(connection, frame, "unknown").await;
        };

        let result = match action {
            ActionType::Submit => {
                let payload: SubmitPayload = decode_payload(&frame)?;
                authorize(connection, payload.user_id)?;
                self.rooms
                    .submit_vote(room_id, payload.user_id, &payload.vote)
                    .await
            }
            ActionType::Reveal => {
                let payload: ActorPayload = decode_payload(&frame)?;
                authorize(connection, payload.user_id)?;
                self.rooms.reveal(room_id, payload.user_id).await
            }
            ActionType::Reset => {
                let payload: ActorPayload = decode_payload(&frame)?;
                authorize(connection, payload.user_id)?;
                self.rooms.reset(room_id, payload.user_id).await
            }
            ActionType::Transfer => {
                let payload: TransferPayload = decode_payload(&frame)?;
                authorize(connection, payload.user_id)?;
                self.rooms
                    .transfer(room_id, payload.user_id, payload.new_scrum_master_id)
                    .await
            }
            ActionType::Rename => {
                let payload: RenamePayload = decode_payload(&frame)?;
                authorize(connection, payload.user_id)?;
                self.rooms
                    .rename(room_id, payload.user_id, &payload.name)
                    .await
            }
            ActionType::Leave => {
                let payload: ActorPayload = decode_payload(&frame)?;
                authorize(connection, payload.user_id)?;
                self.rooms
                    .leave(room_id, payload.user_id)
                    .await
                    .map(|_| ())
            }
            ActionType::Ping => {
                let pong = OutboundMessage::event(ActionType::Pong, frame.payload).encode()?;
                self.rooms
                    .registry()
                    .send_to(room_id, connection.user_id(), pong)
                    .await;
                Ok(())
            }
            ActionType::Join | ActionType::Online | ActionType::Offline | ActionType::Pong => {
                return self.rebroadcast(connection, frame, action.as_str()).await;
            }
        };

        let outcome = if result.is_ok() { "applied" } else { "rejected" };
        metrics::record_frame(action.as_str(), outcome);
        result
    }

    async fn rebroadcast(
        &self,
        connection: &ConnectionHandle,
        frame: InboundFrame,
        label: &'static str,
    ) -> Result<(), PokerError> {
        debug!(
            target: "poker.router",
            room_id = %connection.room_id(),
            action = %frame.action,
            "Re-broadcasting frame"
        );
        self.rooms
            .registry()
            .broadcast_frame(connection.room_id(), frame.raw)
            .await;
        metrics::record_frame(label, "rebroadcast");
        Ok(())
    }
}

#[async_trait::async_trait]
impl FrameHandler for MessageRouter {
    async fn handle_frame(
        &self,
        connection: &ConnectionHandle,
        frame: InboundFrame,
    ) -> Result<(), PokerError> {
        self.dispatch(connection, frame).await
    }
}

fn decode_payload<T: DeserializeOwned>(frame: &InboundFrame) -> Result<T, PokerError> {
    T::deserialize(&frame.payload).map_err(|e| {
        metrics::record_frame("invalid", "rejected");
        PokerError::Validation(format!("invalid {} payload: {e}", frame.action))
    })
}

fn authorize(connection: &ConnectionHandle, user_id: UserId) -> Result<(), PokerError> {
    if connection.user_id() == user_id {
        Ok(())
    } else {
        metrics::record_frame("unauthorized", "rejected");
        Err(PokerError::PermissionDenied(
            "payload userId does not match connection".to_string(),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hub::{HubMetrics, Registry, RegistryConfig};
    use crate::models::Room;
    use crate::services::SuccessorPolicy;
    use crate::store::{MemoryStore, PresenceStore};
    use common::types::RoomId;
    use serde_json::{json, Value};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        router: MessageRouter,
        registry: Registry,
        store: Arc<MemoryStore>,
        room: Room,
        _departures: mpsc::Receiver<crate::hub::Departure>,
    }

    async fn harness() -> Harness {
        let (tx, rx) = mpsc::channel(16);
        let (registry, _task) = Registry::spawn(
            RegistryConfig::default(),
            tx,
            HubMetrics::new(),
            CancellationToken::new(),
        );
        let store = Arc::new(MemoryStore::new());
        let rooms = Arc::new(RoomService::new(
            store.clone(),
            registry.clone(),
            SuccessorPolicy::from_seed(Some(1)),
        ));
        let room = rooms.create_room("Sprint", "alice").await.unwrap();
        Harness {
            router: MessageRouter::new(rooms),
            registry,
            store,
            room,
            _departures: rx,
        }
    }

    async fn connect(
        h: &Harness,
        room_id: RoomId,
        user_id: UserId,
    ) -> (ConnectionHandle, mpsc::Receiver<String>) {
        let (conn, rx) = ConnectionHandle::new(room_id, user_id, h.registry.child_token());
        h.registry.register(conn.clone()).await.unwrap();
        (conn, rx)
    }

    fn frame(value: &Value) -> InboundFrame {
        InboundFrame::decode(&value.to_string()).unwrap()
    }

    fn next_json(rx: &mut mpsc::Receiver<String>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_submit_is_applied_and_masked() {
        let h = harness().await;
        let alice = h.room.scrum_master;
        let (conn, mut rx) = connect(&h, h.room.id, alice).await;

        h.router
            .dispatch(
                &conn,
                frame(&json!({"action": "submit", "payload": {"userId": alice, "vote": "5"}})),
            )
            .await
            .unwrap();

        let event = next_json(&mut rx);
        assert_eq!(event, json!({"action": "submit", "payload": {"userId": alice, "vote": "voted"}}));
        let stored = h.store.get_room(h.room.id).await.unwrap();
        assert_eq!(stored.votes.get(&alice).map(String::as_str), Some("5"));
    }

    #[tokio::test]
    async fn test_payload_user_must_match_connection() {
        let h = harness().await;
        let (conn, mut rx) = connect(&h, h.room.id, UserId::new()).await;

        let err = h
            .router
            .dispatch(
                &conn,
                frame(&json!({"action": "reveal", "payload": {"userId": h.room.scrum_master}})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PokerError::PermissionDenied(_)));
        assert!(rx.try_recv().is_err());
        assert!(!h.store.get_room(h.room.id).await.unwrap().votes_revealed);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_rejected() {
        let h = harness().await;
        let alice = h.room.scrum_master;
        let (conn, _rx) = connect(&h, h.room.id, alice).await;

        for bad in [
            json!({"action": "submit", "payload": {"userId": alice}}),
            json!({"action": "transfer", "payload": {"userId": alice, "newScrumMasterId": "nope"}}),
            json!({"action": "rename"}),
        ] {
            let err = h.router.dispatch(&conn, frame(&bad)).await.unwrap_err();
            assert!(matches!(err, PokerError::Validation(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_ping_answers_only_sender() {
        let h = harness().await;
        let alice = h.room.scrum_master;
        let (conn, mut rx) = connect(&h, h.room.id, alice).await;
        let (_other, mut other_rx) = connect(&h, h.room.id, UserId::new()).await;

        h.router
            .dispatch(&conn, frame(&json!({"action": "ping", "payload": {"t": 1}})))
            .await
            .unwrap();

        assert_eq!(next_json(&mut rx), json!({"action": "pong", "payload": {"t": 1}}));
        assert!(other_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_action_rebroadcast_verbatim() {
        let h = harness().await;
        let (conn, mut rx) = connect(&h, h.room.id, h.room.scrum_master).await;
        let raw = r#"{"action":"emoji","payload":{"icon":"tada"}}"#;

        h.router
            .dispatch(&conn, InboundFrame::decode(raw).unwrap())
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), raw);
    }

    #[tokio::test]
    async fn test_leave_via_router() {
        let h = harness().await;
        let alice = h.room.scrum_master;
        let (conn, mut rx) = connect(&h, h.room.id, alice).await;

        h.router
            .dispatch(&conn, frame(&json!({"action": "leave", "payload": {"userId": alice}})))
            .await
            .unwrap();
        assert_eq!(next_json(&mut rx)["action"], "leave");
        assert!(h.store.get_room(h.room.id).await.is_err());
    }
}
