//! Fully wired service for integration tests.
//!
//! `TestApp` assembles the same parts `main` does (registry, services,
//! message router, disconnect reconciler, HTTP routes) over an in-memory
//! or injected presence store. Clients connect over
//! [`transport_pair`](crate::transport::transport_pair) instead of a socket.

use crate::fixtures::test_config;
use crate::transport::{transport_pair, ClientTransport};

use axum::extract::ws::Message;
use axum::Router;
use common::types::{RoomId, UserId};
use poker_service::config::Config;
use poker_service::errors::PokerError;
use poker_service::hub::{
    run_connection, ConnectionHandle, ConnectionTimers, FrameHandler, HubMetrics, Registry,
    RegistryConfig, DEPARTURE_CHANNEL_BUFFER,
};
use poker_service::observability::HealthState;
use poker_service::router::MessageRouter;
use poker_service::routes::{build_routes, AppState};
use poker_service::services::{RoomService, SessionManager, SuccessorPolicy};
use poker_service::store::{MemoryStore, PresenceStore};
use poker_service::tasks::start_disconnect_reconciler;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A running service instance.
pub struct TestApp {
    pub config: Config,
    pub store: Arc<dyn PresenceStore>,
    pub registry: Registry,
    pub rooms: Arc<RoomService>,
    pub sessions: Arc<SessionManager>,
    pub router: Arc<MessageRouter>,
    pub state: Arc<AppState>,
    cancel_token: CancellationToken,
}

impl TestApp {
    /// Service over a fresh in-memory store with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), test_config())
    }

    /// Service over `store` with `config`.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn with_store(store: Arc<dyn PresenceStore>, config: Config) -> Self {
        let cancel_token = CancellationToken::new();
        let (departures_tx, departures_rx) = mpsc::channel(DEPARTURE_CHANNEL_BUFFER);
        let (registry, _registry_task) = Registry::spawn(
            RegistryConfig {
                timers: ConnectionTimers::from_config(&config),
                room_lock_timeout: config.room_lock_timeout,
            },
            departures_tx,
            HubMetrics::new(),
            cancel_token.child_token(),
        );

        let rooms = Arc::new(RoomService::new(
            Arc::clone(&store),
            registry.clone(),
            SuccessorPolicy::from_seed(config.successor_seed),
        ));
        let sessions = Arc::new(SessionManager::new(Arc::clone(&rooms), config.session_ttl));
        let router = Arc::new(MessageRouter::new(Arc::clone(&rooms)));

        tokio::spawn(start_disconnect_reconciler(
            Arc::clone(&sessions),
            departures_rx,
            cancel_token.child_token(),
        ));

        let health = Arc::new(HealthState::new());
        health.mark_serving();
        let state = Arc::new(AppState {
            config: config.clone(),
            rooms: Arc::clone(&rooms),
            sessions: Arc::clone(&sessions),
            router: Arc::clone(&router),
            registry: registry.clone(),
            health,
        });

        Self {
            config,
            store,
            registry,
            rooms,
            sessions,
            router,
            state,
            cancel_token,
        }
    }

    /// The HTTP router, as served by `main` minus `/metrics`.
    #[must_use]
    pub fn http(&self) -> Router {
        build_routes(Arc::clone(&self.state))
    }

    /// Connect a client and return once the registry has accepted it.
    pub async fn connect(&self, room_id: RoomId, user_id: UserId) -> TestClient {
        self.try_connect(room_id, user_id)
            .await
            .expect("registration succeeds")
    }

    /// Connect a client, surfacing registration failures.
    pub async fn try_connect(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<TestClient, PokerError> {
        let (server, client) = transport_pair();
        let (handle, outbound) =
            ConnectionHandle::new(room_id, user_id, self.registry.child_token());
        self.registry.register(handle.clone()).await?;

        let handler: Arc<dyn FrameHandler> = self.router.clone();
        let task = tokio::spawn(run_connection(
            handle.clone(),
            outbound,
            server.sink,
            server.stream,
            self.registry.clone(),
            handler,
        ));

        Ok(TestClient {
            room_id,
            user_id,
            handle,
            transport: client,
            task,
        })
    }
}

impl Default for TestApp {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// A connected test client.
pub struct TestClient {
    pub room_id: RoomId,
    pub user_id: UserId,
    handle: ConnectionHandle,
    transport: ClientTransport,
    task: JoinHandle<()>,
}

impl TestClient {
    /// The server-side handle for this connection.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn send_json(&self, value: &Value) {
        self.transport.send(Message::Text(value.to_string()));
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.transport.send(Message::Text(text.into()));
    }

    /// Answer a keepalive probe.
    pub fn send_pong(&self) {
        self.transport.send(Message::Pong(Vec::new()));
    }

    /// Next text frame from the server, skipping keepalive probes.
    ///
    /// `None` once the transport closed or nothing arrived in time.
    pub async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.transport.recv().await? {
                Message::Text(text) => return Some(text),
                Message::Close(_) => return None,
                _ => {}
            }
        }
    }

    /// Next text frame parsed as JSON.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv_text().await?;
        Some(serde_json::from_str(&text).expect("server frames are JSON"))
    }

    /// Skip frames until an event with `action` arrives.
    pub async fn recv_action(&mut self, action: &str) -> Value {
        loop {
            let value = self
                .recv_json()
                .await
                .unwrap_or_else(|| panic!("no {action} event received"));
            if value["action"] == action {
                return value;
            }
        }
    }

    /// Skip frames until a room snapshot arrives.
    pub async fn recv_room_update(&mut self) -> Value {
        loop {
            let value = self
                .recv_json()
                .await
                .expect("no room_update received");
            if value["type"] == "room_update" {
                return value;
            }
        }
    }

    /// Read frames until the server closes the transport; returns them all.
    pub async fn drain_until_closed(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(message) = self.transport.recv().await {
            match message {
                Message::Text(text) => frames.push(text),
                Message::Close(_) => break,
                _ => {}
            }
        }
        frames
    }

    /// Text frames already delivered, without waiting.
    pub fn pending_texts(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Some(message) = self.transport.try_recv() {
            if let Message::Text(text) = message {
                frames.push(text);
            }
        }
        frames
    }

    /// Drop the client's side of the transport and wait for the server to
    /// finish with the connection.
    pub async fn disconnect(mut self) {
        self.transport.hang_up();
        let _ = self.task.await;
    }

    /// Wait for the server to finish with the connection.
    pub async fn finished(self) {
        let _ = self.task.await;
    }
}
