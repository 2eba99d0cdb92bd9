//! Connection registry.
//!
//! Tracks which connections are subscribed to which room and fans frames
//! out to them. Registration and unregistration are serialized through a
//! single coordinator task; broadcasts take only the affected room's lock
//! and never create room entries.
//!
//! # Invariants
//!
//! - At most one registered connection per `(room, user)`; a newer
//!   registration evicts the older one.
//! - A room entry exists only while it has at least one subscriber.
//! - A subscriber whose queue is full is removed from the set during the
//!   same broadcast, so later broadcasts skip it.
//! - Every connection that reached `Registered` yields exactly one
//!   [`Departure`] when it is unregistered.

use super::connection::{ConnectionHandle, ConnectionState, ConnectionTimers, Delivery};
use super::messages::{Departure, RegistryRequest};
use super::metrics::{HubMetrics, RemovalReason};
use crate::errors::PokerError;
use crate::protocol::OutboundMessage;

use common::types::{RoomId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Coordinator mailbox size.
const REGISTRY_CHANNEL_BUFFER: usize = 1024;

/// Departure channel size.
pub const DEPARTURE_CHANNEL_BUFFER: usize = 1024;

type Subscribers = HashMap<UserId, ConnectionHandle>;
type RoomEntry = Arc<Mutex<Subscribers>>;

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Registry settings.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    pub timers: ConnectionTimers,
    /// Bound on waiting for a room's subscriber lock during registration.
    pub room_lock_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            timers: ConnectionTimers::default(),
            room_lock_timeout: Duration::from_secs(
                crate::config::DEFAULT_ROOM_LOCK_TIMEOUT_SECONDS,
            ),
        }
    }
}

struct RegistryShared {
    rooms: RwLock<HashMap<RoomId, RoomEntry>>,
    metrics: Arc<HubMetrics>,
    departures: mpsc::Sender<Departure>,
    room_lock_timeout: Duration,
}

/// Handle to the connection registry.
#[derive(Clone)]
pub struct Registry {
    shared: Arc<RegistryShared>,
    requests: mpsc::Sender<RegistryRequest>,
    timers: ConnectionTimers,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("timers", &self.timers)
            .field("connections", &self.shared.metrics.connections())
            .field("rooms", &self.shared.metrics.rooms())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Spawn the registry coordinator.
    ///
    /// Departures of registered connections are sent on `departures`.
    /// Cancelling `cancel_token` stops the coordinator and closes every
    /// connection created from [`Registry::child_token`].
    pub fn spawn(
        config: RegistryConfig,
        departures: mpsc::Sender<Departure>,
        metrics: Arc<HubMetrics>,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (requests, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let shared = Arc::new(RegistryShared {
            rooms: RwLock::new(HashMap::new()),
            metrics,
            departures,
            room_lock_timeout: config.room_lock_timeout,
        });

        let coordinator = RegistryCoordinator {
            shared: Arc::clone(&shared),
            receiver,
            cancel_token: cancel_token.clone(),
        };
        let task_handle = tokio::spawn(coordinator.run());

        let registry = Self {
            shared,
            requests,
            timers: config.timers,
            cancel_token,
        };
        (registry, task_handle)
    }

    #[must_use]
    pub fn timers(&self) -> ConnectionTimers {
        self.timers
    }

    /// Token for a new connection; cancelled when the registry shuts down.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<HubMetrics> {
        &self.shared.metrics
    }

    /// Register a connection and wait for the coordinator to confirm.
    ///
    /// Fails if the coordinator cannot accept the request within the
    /// hand-off timeout or does not confirm within the acknowledgment
    /// timeout. On failure the caller must close its transport; an insert
    /// that completes after the caller gave up is undone.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), PokerError> {
        let (tx, rx) = oneshot::channel();
        let request = RegistryRequest::Register {
            handle: handle.clone(),
            respond_to: tx,
        };

        match tokio::time::timeout(self.timers.handoff, self.requests.send(request)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(PokerError::Internal(format!("channel send failed: {e}")));
            }
            Err(_) => {
                self.shared.metrics.record_registration_failed("timeout");
                return Err(PokerError::Timeout(
                    "registration hand-off timed out".to_string(),
                ));
            }
        }

        let mut rx = rx;
        match tokio::time::timeout(self.timers.ack, &mut rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(PokerError::Internal(format!(
                "response receive failed: {e}"
            ))),
            Err(_) => {
                self.shared.metrics.record_registration_failed("timeout");
                // Closing the handle makes a queued request fail. Closing
                // `rx` makes a later insert undo itself, and one confirmed
                // just before the close is undone here.
                handle.close();
                rx.close();
                if let Ok(Ok(())) = rx.try_recv() {
                    self.unregister(handle, RemovalReason::Closed).await;
                }
                Err(PokerError::Timeout(
                    "registration acknowledgment timed out".to_string(),
                ))
            }
        }
    }

    /// Ask the coordinator to unregister a connection.
    ///
    /// Returns once the request is queued. If the coordinator is gone the
    /// connection is closed directly.
    pub async fn unregister(&self, handle: ConnectionHandle, reason: RemovalReason) {
        let request = RegistryRequest::Unregister {
            handle: handle.clone(),
            reason,
        };
        if self.requests.send(request).await.is_err() {
            handle.close();
        }
    }

    /// Queue an unregistration without waiting for mailbox capacity.
    pub fn submit_unregister(&self, handle: ConnectionHandle, reason: RemovalReason) {
        let request = RegistryRequest::Unregister { handle, reason };
        match self.requests.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(request)) => {
                let requests = self.requests.clone();
                tokio::spawn(async move {
                    let _ = requests.send(request).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(RegistryRequest::Unregister {
                handle, ..
            })) => handle.close(),
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Encode a message once and fan it out to every subscriber of a room.
    pub async fn broadcast(
        &self,
        room_id: RoomId,
        message: &OutboundMessage,
    ) -> Result<BroadcastReport, PokerError> {
        let frame = message.encode()?;
        Ok(self.broadcast_frame(room_id, frame).await)
    }

    /// Fan an encoded frame out to every subscriber of a room.
    ///
    /// Subscribers whose queue is full or closed are removed from the set
    /// and scheduled for unregistration.
    pub async fn broadcast_frame(&self, room_id: RoomId, frame: String) -> BroadcastReport {
        let Some(room) = self.shared.room_entry(room_id).await else {
            return BroadcastReport::default();
        };

        let mut report = BroadcastReport::default();
        let mut removed = Vec::new();
        {
            let mut subscribers = room.lock().await;
            subscribers.retain(|_, connection| match connection.deliver(frame.clone()) {
                Delivery::Delivered => {
                    report.delivered += 1;
                    true
                }
                Delivery::Full | Delivery::Closed => {
                    removed.push(connection.clone());
                    false
                }
            });
        }

        report.dropped = removed.len();
        for connection in removed {
            self.shared.metrics.connection_removed();
            self.shared.metrics.record_removed(RemovalReason::SlowConsumer);
            warn!(
                target: "poker.hub.registry",
                room_id = %room_id,
                user_id = %connection.user_id(),
                connection_id = %connection.connection_id(),
                "Dropping subscriber that cannot keep up"
            );
            self.submit_unregister(connection, RemovalReason::SlowConsumer);
        }

        self.shared
            .metrics
            .record_broadcast(report.delivered, report.dropped);
        report
    }

    /// Deliver a frame to one user's connection in a room.
    pub async fn send_to(&self, room_id: RoomId, user_id: UserId, frame: String) -> Delivery {
        let Some(room) = self.shared.room_entry(room_id).await else {
            return Delivery::Closed;
        };

        let (delivery, removed) = {
            let mut subscribers = room.lock().await;
            let Some(connection) = subscribers.get(&user_id) else {
                return Delivery::Closed;
            };
            match connection.deliver(frame) {
                Delivery::Delivered => (Delivery::Delivered, None),
                other => (other, subscribers.remove(&user_id)),
            }
        };

        if let Some(connection) = removed {
            self.shared.metrics.connection_removed();
            self.shared.metrics.record_removed(RemovalReason::SlowConsumer);
            self.submit_unregister(connection, RemovalReason::SlowConsumer);
        }
        delivery
    }

    /// Whether the user has a live connection subscribed to the room.
    pub async fn is_connected(&self, room_id: RoomId, user_id: UserId) -> bool {
        let Some(room) = self.shared.room_entry(room_id).await else {
            return false;
        };
        let subscribers = room.lock().await;
        subscribers
            .get(&user_id)
            .is_some_and(|connection| !connection.is_closed())
    }

    pub async fn subscriber_count(&self, room_id: RoomId) -> usize {
        match self.shared.room_entry(room_id).await {
            Some(room) => room.lock().await.len(),
            None => 0,
        }
    }

    pub async fn room_count(&self) -> usize {
        self.shared.rooms.read().await.len()
    }

    /// Snapshot of every subscribed connection.
    pub async fn connections(&self) -> Vec<ConnectionHandle> {
        let rooms: Vec<RoomEntry> = self.shared.rooms.read().await.values().cloned().collect();
        let mut connections = Vec::new();
        for room in rooms {
            connections.extend(room.lock().await.values().cloned());
        }
        connections
    }
}

impl RegistryShared {
    async fn room_entry(&self, room_id: RoomId) -> Option<RoomEntry> {
        self.rooms.read().await.get(&room_id).cloned()
    }

    async fn room_entry_or_insert(&self, room_id: RoomId) -> RoomEntry {
        if let Some(room) = self.room_entry(room_id).await {
            return room;
        }
        let mut rooms = self.rooms.write().await;
        let room = Arc::clone(rooms.entry(room_id).or_default());
        self.metrics.set_rooms(rooms.len());
        room
    }

    async fn lock_room<'a>(
        &self,
        room: &'a Mutex<Subscribers>,
        room_id: RoomId,
    ) -> Result<MutexGuard<'a, Subscribers>, PokerError> {
        tokio::time::timeout(self.room_lock_timeout, room.lock())
            .await
            .map_err(|_| PokerError::Timeout(format!("subscriber lock for room {room_id}")))
    }

    /// Drop the room entry if it is still `room` and has no subscribers.
    async fn prune_room(&self, room_id: RoomId, room: &RoomEntry) {
        let mut rooms = self.rooms.write().await;
        let current = rooms
            .get(&room_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, room));
        if !current {
            return;
        }
        let empty = match tokio::time::timeout(self.room_lock_timeout, room.lock()).await {
            Ok(subscribers) => subscribers.is_empty(),
            Err(_) => false,
        };
        if empty {
            rooms.remove(&room_id);
            self.metrics.set_rooms(rooms.len());
        }
    }

    fn emit_departure(&self, departure: Departure) {
        match self.departures.try_send(departure) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(departure)) => {
                warn!(
                    target: "poker.hub.registry",
                    room_id = %departure.room_id,
                    user_id = %departure.user_id,
                    "Departure channel full, delivering asynchronously"
                );
                let departures = self.departures.clone();
                tokio::spawn(async move {
                    let _ = departures.send(departure).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(departure)) => {
                debug!(
                    target: "poker.hub.registry",
                    room_id = %departure.room_id,
                    user_id = %departure.user_id,
                    "Departure channel closed"
                );
            }
        }
    }
}

/// Single task that applies registrations and unregistrations in order.
struct RegistryCoordinator {
    shared: Arc<RegistryShared>,
    receiver: mpsc::Receiver<RegistryRequest>,
    cancel_token: CancellationToken,
}

impl RegistryCoordinator {
    #[instrument(skip_all, name = "poker.hub.registry")]
    async fn run(mut self) {
        debug!(target: "poker.hub.registry", "Registry coordinator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "poker.hub.registry",
                        "Registry coordinator received cancellation signal"
                    );
                    break;
                }

                request = self.receiver.recv() => {
                    match request {
                        Some(request) => self.handle_request(request).await,
                        None => break,
                    }
                }
            }
        }

        self.close_all().await;
        info!(
            target: "poker.hub.registry",
            registrations = self.shared.metrics.snapshot().registrations,
            "Registry coordinator stopped"
        );
    }

    async fn handle_request(&self, request: RegistryRequest) {
        match request {
            RegistryRequest::Register { handle, respond_to } => {
                let result = self.register(&handle).await;
                match &result {
                    Ok(()) => self.shared.metrics.record_registered(),
                    Err(PokerError::Timeout(_)) => {
                        self.shared.metrics.record_registration_failed("timeout");
                    }
                    Err(_) => self.shared.metrics.record_registration_failed("error"),
                }
                let registered = result.is_ok();
                if respond_to.send(result).is_err() && registered {
                    debug!(
                        target: "poker.hub.registry",
                        connection_id = %handle.connection_id(),
                        "Registration caller gone, undoing insert"
                    );
                    self.unregister(handle, RemovalReason::Closed).await;
                }
            }

            RegistryRequest::Unregister { handle, reason } => {
                self.unregister(handle, reason).await;
            }
        }
    }

    async fn register(&self, handle: &ConnectionHandle) -> Result<(), PokerError> {
        if handle.is_closed() {
            return Err(PokerError::Internal(
                "connection closed before registration".to_string(),
            ));
        }

        let room_id = handle.room_id();
        let room = self.shared.room_entry_or_insert(room_id).await;
        let previous = {
            let mut subscribers = match self.shared.lock_room(&room, room_id).await {
                Ok(subscribers) => subscribers,
                Err(e) => {
                    warn!(
                        target: "poker.hub.registry",
                        room_id = %room_id,
                        user_id = %handle.user_id(),
                        "Timed out waiting for room subscriber lock"
                    );
                    self.shared.prune_room(room_id, &room).await;
                    return Err(e);
                }
            };
            if !handle.mark_registered() {
                drop(subscribers);
                self.shared.prune_room(room_id, &room).await;
                return Err(PokerError::Internal(
                    "connection closed during registration".to_string(),
                ));
            }
            subscribers.insert(handle.user_id(), handle.clone())
        };

        match previous {
            Some(previous) if previous.connection_id() != handle.connection_id() => {
                info!(
                    target: "poker.hub.registry",
                    room_id = %room_id,
                    user_id = %handle.user_id(),
                    replaced = %previous.connection_id(),
                    "Replacing existing connection for user"
                );
                let previous_state = previous.begin_unregister();
                previous.notify_disconnect();
                previous.close();
                self.shared.metrics.record_removed(RemovalReason::Duplicate);
                if previous_state == ConnectionState::Registered {
                    self.shared.emit_departure(Departure {
                        room_id,
                        user_id: previous.user_id(),
                        connection_id: previous.connection_id(),
                        reason: RemovalReason::Duplicate,
                    });
                }
            }
            Some(_) => {}
            None => self.shared.metrics.connection_added(),
        }

        debug!(
            target: "poker.hub.registry",
            room_id = %room_id,
            user_id = %handle.user_id(),
            connection_id = %handle.connection_id(),
            "Connection registered"
        );
        Ok(())
    }

    async fn unregister(&self, handle: ConnectionHandle, reason: RemovalReason) {
        let previous_state = handle.begin_unregister();
        let room_id = handle.room_id();
        let user_id = handle.user_id();
        let mut removed = false;

        if let Some(room) = self.shared.room_entry(room_id).await {
            match self.shared.lock_room(&room, room_id).await {
                Ok(mut subscribers) => {
                    let is_current = subscribers
                        .get(&user_id)
                        .is_some_and(|c| c.connection_id() == handle.connection_id());
                    if is_current {
                        subscribers.remove(&user_id);
                        removed = true;
                    }
                    let now_empty = subscribers.is_empty();
                    drop(subscribers);
                    if now_empty {
                        self.shared.prune_room(room_id, &room).await;
                    }
                }
                Err(e) => {
                    // The closed handle is pruned by the next broadcast.
                    warn!(
                        target: "poker.hub.registry",
                        room_id = %room_id,
                        user_id = %user_id,
                        error = %e,
                        "Unregistering without subscriber lock"
                    );
                }
            }
        }

        handle.notify_disconnect();
        handle.close();

        if removed {
            self.shared.metrics.connection_removed();
            self.shared.metrics.record_removed(reason);
        }

        if removed || previous_state == ConnectionState::Registered {
            debug!(
                target: "poker.hub.registry",
                room_id = %room_id,
                user_id = %user_id,
                connection_id = %handle.connection_id(),
                reason = reason.as_str(),
                "Connection unregistered"
            );
            self.shared.emit_departure(Departure {
                room_id,
                user_id,
                connection_id: handle.connection_id(),
                reason,
            });
        }
    }

    async fn close_all(&self) {
        let rooms: Vec<RoomEntry> = {
            let mut rooms = self.shared.rooms.write().await;
            let entries = rooms.drain().map(|(_, room)| room).collect();
            self.shared.metrics.set_rooms(0);
            entries
        };
        for room in rooms {
            let mut subscribers = room.lock().await;
            for (_, connection) in subscribers.drain() {
                connection.notify_disconnect();
                connection.close();
                self.shared.metrics.connection_removed();
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hub::connection::{serve_connection, FrameHandler};
    use crate::protocol::{InboundFrame, DISCONNECT_NOTICE};
    use axum::extract::ws::Message;
    use futures::StreamExt;
    use std::convert::Infallible;

    fn spawn_registry() -> (Registry, mpsc::Receiver<Departure>, CancellationToken) {
        spawn_registry_with(RegistryConfig::default())
    }

    fn spawn_registry_with(
        config: RegistryConfig,
    ) -> (Registry, mpsc::Receiver<Departure>, CancellationToken) {
        let (tx, rx) = mpsc::channel(DEPARTURE_CHANNEL_BUFFER);
        let cancel = CancellationToken::new();
        let (registry, _task) = Registry::spawn(config, tx, HubMetrics::new(), cancel.clone());
        (registry, rx, cancel)
    }

    fn short_lock_timeout(ack: Duration, room_lock_timeout: Duration) -> RegistryConfig {
        RegistryConfig {
            timers: ConnectionTimers {
                ack,
                ..ConnectionTimers::default()
            },
            room_lock_timeout,
        }
    }

    struct IgnoreFrames;

    #[async_trait::async_trait]
    impl FrameHandler for IgnoreFrames {
        async fn handle_frame(
            &self,
            _connection: &ConnectionHandle,
            _frame: InboundFrame,
        ) -> Result<(), PokerError> {
            Ok(())
        }
    }

    fn connect(
        registry: &Registry,
        room_id: RoomId,
        user_id: UserId,
    ) -> (ConnectionHandle, mpsc::Receiver<String>) {
        ConnectionHandle::new(room_id, user_id, registry.child_token())
    }

    #[tokio::test]
    async fn test_register_then_broadcast() {
        let (registry, _departures, _cancel) = spawn_registry();
        let room = RoomId::new();
        let (a, mut rx_a) = connect(&registry, room, UserId::new());
        let (b, mut rx_b) = connect(&registry, room, UserId::new());
        registry.register(a.clone()).await.unwrap();
        registry.register(b.clone()).await.unwrap();

        let report = registry.broadcast_frame(room, "hello".to_string()).await;
        assert_eq!(report, BroadcastReport { delivered: 2, dropped: 0 });
        assert_eq!(rx_a.recv().await.as_deref(), Some("hello"));
        assert_eq!(rx_b.recv().await.as_deref(), Some("hello"));
        assert_eq!(a.state(), ConnectionState::Registered);
        assert_eq!(registry.metrics().connections(), 2);
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_room_creates_no_entry() {
        let (registry, _departures, _cancel) = spawn_registry();
        let report = registry
            .broadcast_frame(RoomId::new(), "x".to_string())
            .await;
        assert_eq!(report, BroadcastReport::default());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_registration_evicts_previous() {
        let (registry, mut departures, _cancel) = spawn_registry();
        let room = RoomId::new();
        let user = UserId::new();
        let (first, mut rx_first) = connect(&registry, room, user);
        let (second, _rx_second) = connect(&registry, room, user);

        registry.register(first.clone()).await.unwrap();
        registry.register(second.clone()).await.unwrap();

        assert_eq!(rx_first.recv().await.as_deref(), Some(DISCONNECT_NOTICE));
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.subscriber_count(room).await, 1);
        assert_eq!(registry.metrics().snapshot().evictions, 1);

        let departure = departures.recv().await.unwrap();
        assert_eq!(departure.connection_id, first.connection_id());
        assert_eq!(departure.reason, RemovalReason::Duplicate);

        // The evicted connection's pump unregisters it later; that must
        // neither remove the replacement nor emit a second departure.
        registry.unregister(first.clone(), RemovalReason::Closed).await;
        let (probe, _probe_rx) = connect(&registry, RoomId::new(), UserId::new());
        registry.register(probe).await.unwrap();
        assert!(departures.try_recv().is_err());
        assert!(registry.is_connected(room, user).await);
    }

    #[tokio::test]
    async fn test_unregister_emits_one_departure_and_prunes_room() {
        let (registry, mut departures, _cancel) = spawn_registry();
        let room = RoomId::new();
        let user = UserId::new();
        let (conn, mut rx) = connect(&registry, room, user);
        registry.register(conn.clone()).await.unwrap();

        registry.unregister(conn.clone(), RemovalReason::Closed).await;
        registry.unregister(conn.clone(), RemovalReason::Closed).await;

        let departure = departures.recv().await.unwrap();
        assert_eq!(departure.user_id, user);
        assert_eq!(departure.room_id, room);
        assert_eq!(rx.recv().await.as_deref(), Some(DISCONNECT_NOTICE));

        // Flush the coordinator with a round trip before checking.
        let (probe, _probe_rx) = connect(&registry, RoomId::new(), UserId::new());
        registry.register(probe).await.unwrap();
        assert!(departures.try_recv().is_err());
        assert_eq!(registry.subscriber_count(room).await, 0);
        assert!(!registry.is_connected(room, user).await);
        assert_eq!(registry.room_count().await, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_subscriber() {
        let (registry, mut departures, _cancel) = spawn_registry();
        let room = RoomId::new();
        let (slow, _rx_slow) = connect(&registry, room, UserId::new());
        let (fast, mut rx_fast) = connect(&registry, room, UserId::new());
        registry.register(slow.clone()).await.unwrap();
        registry.register(fast.clone()).await.unwrap();

        for i in 0..crate::hub::connection::OUTBOUND_QUEUE_CAPACITY {
            assert_eq!(slow.deliver(format!("{i}")), Delivery::Delivered);
        }

        let report = registry.broadcast_frame(room, "next".to_string()).await;
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 1 });
        assert_eq!(rx_fast.recv().await.as_deref(), Some("next"));

        let departure = departures.recv().await.unwrap();
        assert_eq!(departure.connection_id, slow.connection_id());
        assert_eq!(departure.reason, RemovalReason::SlowConsumer);
        assert!(slow.is_closed());

        let report = registry.broadcast_frame(room, "again".to_string()).await;
        assert_eq!(report, BroadcastReport { delivered: 1, dropped: 0 });
    }

    #[tokio::test]
    async fn test_closed_handle_is_rejected() {
        let (registry, _departures, _cancel) = spawn_registry();
        let (conn, _rx) = connect(&registry, RoomId::new(), UserId::new());
        conn.close();
        assert!(registry.register(conn).await.is_err());
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_to_targets_one_user() {
        let (registry, _departures, _cancel) = spawn_registry();
        let room = RoomId::new();
        let user = UserId::new();
        let (a, mut rx_a) = connect(&registry, room, user);
        let (b, mut rx_b) = connect(&registry, room, UserId::new());
        registry.register(a).await.unwrap();
        registry.register(b).await.unwrap();

        let delivery = registry.send_to(room, user, "pong".to_string()).await;
        assert_eq!(delivery, Delivery::Delivered);
        assert_eq!(rx_a.recv().await.as_deref(), Some("pong"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let (registry, _departures, cancel) = spawn_registry();
        let (conn, _rx) = connect(&registry, RoomId::new(), UserId::new());
        registry.register(conn.clone()).await.unwrap();

        cancel.cancel();
        conn.cancel_token().cancelled().await;
        assert!(conn.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_lock_timeout_closes_new_transport_and_keeps_existing() {
        let config = short_lock_timeout(Duration::from_secs(30), Duration::from_millis(100));
        let (registry, mut departures, _cancel) = spawn_registry_with(config);
        let room = RoomId::new();
        let user = UserId::new();
        let (existing, mut rx_existing) = connect(&registry, room, user);
        registry.register(existing.clone()).await.unwrap();

        let entry = registry.shared.room_entry(room).await.unwrap();
        let held = entry.lock().await;

        let (sink, mut client_rx) = futures::channel::mpsc::unbounded::<Message>();
        let (_client_tx, stream) =
            futures::channel::mpsc::unbounded::<Result<Message, Infallible>>();
        serve_connection(room, user, sink, stream, registry.clone(), Arc::new(IgnoreFrames)).await;
        drop(held);

        // The rejected transport only ever sees a close.
        assert!(matches!(client_rx.next().await, Some(Message::Close(_))));
        assert!(client_rx.next().await.is_none());

        assert!(!existing.is_closed());
        assert_eq!(existing.state(), ConnectionState::Registered);
        assert!(rx_existing.try_recv().is_err());
        assert!(registry.is_connected(room, user).await);
        assert_eq!(registry.subscriber_count(room).await, 1);
        assert!(departures.try_recv().is_err());
        assert_eq!(registry.metrics().snapshot().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_lock_timeout_prunes_empty_room() {
        let config = short_lock_timeout(Duration::from_secs(30), Duration::from_millis(100));
        let (registry, _departures, _cancel) = spawn_registry_with(config);
        let room = RoomId::new();

        let entry = registry.shared.room_entry_or_insert(room).await;
        let held = Arc::clone(&entry).lock_owned().await;
        // Released after the registration gives up but before the prune
        // stops waiting.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            drop(held);
        });

        let (conn, _rx) = connect(&registry, room, UserId::new());
        let err = registry.register(conn).await.unwrap_err();
        assert!(matches!(err, PokerError::Timeout(_)));
        assert_eq!(registry.room_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_timeout_closes_handle_and_queued_insert_fails() {
        let config = short_lock_timeout(Duration::from_millis(100), Duration::from_secs(5));
        let (registry, mut departures, _cancel) = spawn_registry_with(config);
        let room = RoomId::new();

        let entry = registry.shared.room_entry_or_insert(room).await;
        let held = Arc::clone(&entry).lock_owned().await;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(held);
        });

        let (conn, _rx) = connect(&registry, room, UserId::new());
        let err = registry.register(conn.clone()).await.unwrap_err();
        assert!(matches!(err, PokerError::Timeout(_)));
        assert!(conn.is_closed());

        // Once the stalled request drains, nothing of it remains.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(registry.subscriber_count(room).await, 0);
        assert_eq!(registry.room_count().await, 0);
        assert!(departures.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_insert_for_departed_caller_is_undone() {
        let (registry, mut departures, _cancel) = spawn_registry();
        let room = RoomId::new();
        let user = UserId::new();
        let (conn, mut rx) = connect(&registry, room, user);

        let (respond_to, response) = oneshot::channel();
        drop(response);
        registry
            .requests
            .send(RegistryRequest::Register {
                handle: conn.clone(),
                respond_to,
            })
            .await
            .unwrap();

        let departure = departures.recv().await.unwrap();
        assert_eq!(departure.connection_id, conn.connection_id());
        assert_eq!(departure.reason, RemovalReason::Closed);
        assert!(conn.is_closed());
        assert_eq!(rx.recv().await.as_deref(), Some(DISCONNECT_NOTICE));
        assert!(!registry.is_connected(room, user).await);
        assert_eq!(registry.subscriber_count(room).await, 0);
    }
}
