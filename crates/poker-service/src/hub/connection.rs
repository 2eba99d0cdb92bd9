//! Per-connection state and transport pumps.
//!
//! A connection is one client transport bound to a `(room, user)` pair.
//! The registry and the router only ever see its [`ConnectionHandle`]; the
//! transport itself is owned by two pumps started from
//! [`serve_connection`]:
//!
//! - the read pump decodes inbound frames and hands them to a
//!   [`FrameHandler`], enforcing the liveness deadline
//! - the write pump drains the bounded outbound queue, coalescing frames
//!   that are already queued into one flush, and sends keepalive probes
//!
//! # Lifecycle
//!
//! ```text
//! Connecting -> Registered -> Unregistering -> Closed
//!      |                                         ^
//!      +-----------------------------------------+
//! ```
//!
//! Once a handle is `Closed` its queue accepts nothing and its pumps wind
//! down. The transport is closed exactly once, by the write pump.

use super::metrics::RemovalReason;
use super::registry::Registry;
use crate::config::{
    Config, DEFAULT_LIVENESS_WINDOW_SECONDS, DEFAULT_REGISTRATION_ACK_SECONDS,
    DEFAULT_REGISTRATION_HANDOFF_MS, DEFAULT_WRITE_WAIT_SECONDS,
};
use crate::errors::PokerError;
use crate::protocol::{InboundFrame, DISCONNECT_NOTICE};

use axum::extract::ws::Message;
use common::types::{ConnectionId, RoomId, UserId};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Capacity of each connection's outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Largest inbound text frame accepted, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 2048;

/// Upper bound on frames written per flush.
const MAX_BATCH: usize = 64;

/// Timing parameters shared by every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimers {
    /// How long a caller waits to hand a registration to the coordinator.
    pub handoff: Duration,
    /// How long a caller waits for the coordinator to confirm registration.
    pub ack: Duration,
    /// Inbound silence tolerated before the transport is considered dead.
    pub liveness_window: Duration,
    /// Deadline for a single outbound flush.
    pub write_wait: Duration,
}

impl Default for ConnectionTimers {
    fn default() -> Self {
        Self {
            handoff: Duration::from_millis(DEFAULT_REGISTRATION_HANDOFF_MS),
            ack: Duration::from_secs(DEFAULT_REGISTRATION_ACK_SECONDS),
            liveness_window: Duration::from_secs(DEFAULT_LIVENESS_WINDOW_SECONDS),
            write_wait: Duration::from_secs(DEFAULT_WRITE_WAIT_SECONDS),
        }
    }
}

impl ConnectionTimers {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            handoff: config.registration_handoff,
            ack: config.registration_ack,
            liveness_window: config.liveness_window,
            write_wait: config.write_wait,
        }
    }

    /// Keepalive probe interval: nine tenths of the liveness window.
    #[must_use]
    pub fn probe_period(&self) -> Duration {
        (self.liveness_window * 9 / 10).max(Duration::from_millis(1))
    }

    /// Age of the last acknowledgment after which a connection is stale.
    #[must_use]
    pub fn stale_after(&self) -> Duration {
        self.liveness_window * 2
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Registered = 1,
    Unregistering = 2,
    Closed = 3,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Registered,
            2 => ConnectionState::Unregistering,
            _ => ConnectionState::Closed,
        }
    }
}

/// Result of offering a frame to a connection's outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The queue is at capacity; the consumer is too slow.
    Full,
    /// The connection is closed.
    Closed,
}

#[derive(Debug)]
struct Lifecycle {
    state: AtomicU8,
    started: Instant,
    /// Milliseconds after `started` of the last pong.
    last_ack_ms: AtomicU64,
}

/// Handle to one client connection.
///
/// Cloning is cheap; all clones share the same queue and lifecycle.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    connection_id: ConnectionId,
    room_id: RoomId,
    user_id: UserId,
    sender: mpsc::Sender<String>,
    cancel_token: CancellationToken,
    lifecycle: Arc<Lifecycle>,
}

impl ConnectionHandle {
    /// Create a handle in the `Connecting` state.
    ///
    /// Returns the handle and the receiving end of its outbound queue, which
    /// belongs to the write pump.
    #[must_use]
    pub fn new(
        room_id: RoomId,
        user_id: UserId,
        cancel_token: CancellationToken,
    ) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let handle = Self {
            connection_id: ConnectionId::new(),
            room_id,
            user_id,
            sender,
            cancel_token,
            lifecycle: Arc::new(Lifecycle {
                state: AtomicU8::new(ConnectionState::Connecting as u8),
                started: Instant::now(),
                last_ack_ms: AtomicU64::new(0),
            }),
        };
        (handle, receiver)
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.lifecycle.state.load(Ordering::SeqCst))
    }

    /// Move to `to` if the current state is one of `from`.
    ///
    /// Returns the previous state on success and the current one otherwise.
    fn transition(
        &self,
        from: &[ConnectionState],
        to: ConnectionState,
    ) -> Result<ConnectionState, ConnectionState> {
        let mut current = self.lifecycle.state.load(Ordering::SeqCst);
        loop {
            let state = ConnectionState::from_u8(current);
            if !from.contains(&state) {
                return Err(state);
            }
            match self.lifecycle.state.compare_exchange(
                current,
                to as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(state),
                Err(actual) => current = actual,
            }
        }
    }

    /// `Connecting -> Registered`. Returns false if the connection has
    /// already started closing.
    pub(crate) fn mark_registered(&self) -> bool {
        self.transition(&[ConnectionState::Connecting], ConnectionState::Registered)
            .is_ok()
    }

    /// Enter `Unregistering`, returning the state held before.
    pub(crate) fn begin_unregister(&self) -> ConnectionState {
        match self.transition(
            &[ConnectionState::Connecting, ConnectionState::Registered],
            ConnectionState::Unregistering,
        ) {
            Ok(previous) | Err(previous) => previous,
        }
    }

    /// Close the connection: no further frames are accepted and both pumps
    /// stop.
    pub fn close(&self) {
        self.lifecycle
            .state
            .store(ConnectionState::Closed as u8, Ordering::SeqCst);
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed || self.cancel_token.is_cancelled()
    }

    /// Offer a frame to the outbound queue without waiting.
    pub fn deliver(&self, frame: String) -> Delivery {
        if self.is_closed() {
            return Delivery::Closed;
        }
        match self.sender.try_send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    /// Queue the disconnect notice ahead of closing. Best effort.
    pub(crate) fn notify_disconnect(&self) {
        if !self.is_closed() {
            let _ = self.sender.try_send(DISCONNECT_NOTICE.to_string());
        }
    }

    /// Record a liveness acknowledgment from the peer.
    pub fn record_ack(&self) {
        let elapsed = Instant::now().saturating_duration_since(self.lifecycle.started);
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.lifecycle.last_ack_ms.store(millis, Ordering::SeqCst);
    }

    /// Time since the last acknowledgment, or since the connection was
    /// created if none has arrived yet.
    #[must_use]
    pub fn since_last_ack(&self, now: Instant) -> Duration {
        let last = self.lifecycle.started
            + Duration::from_millis(self.lifecycle.last_ack_ms.load(Ordering::SeqCst));
        now.saturating_duration_since(last)
    }

    /// Token cancelled when the connection closes.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }
}

/// Receives decoded frames from a connection's read pump.
#[async_trait::async_trait]
pub trait FrameHandler: Send + Sync {
    /// Handle one frame. Errors are logged by the read pump and do not
    /// close the connection.
    async fn handle_frame(
        &self,
        connection: &ConnectionHandle,
        frame: InboundFrame,
    ) -> Result<(), PokerError>;
}

/// Register a new connection and run it until the transport ends.
///
/// If registration fails the transport is closed immediately and no
/// departure is produced.
pub async fn serve_connection<Si, St, E>(
    room_id: RoomId,
    user_id: UserId,
    mut sink: Si,
    stream: St,
    registry: Registry,
    handler: Arc<dyn FrameHandler>,
) where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send,
{
    let timers = registry.timers();
    let (handle, outbound) = ConnectionHandle::new(room_id, user_id, registry.child_token());

    if let Err(e) = registry.register(handle.clone()).await {
        warn!(
            target: "poker.hub.connection",
            room_id = %room_id,
            user_id = %user_id,
            error = %e,
            "Registration failed, closing transport"
        );
        handle.close();
        close_transport(&mut sink, timers.write_wait).await;
        return;
    }

    run_connection(handle, outbound, sink, stream, registry, handler).await;
}

/// Run both pumps for an already registered connection.
#[instrument(
    skip_all,
    name = "poker.hub.connection",
    fields(
        connection_id = %handle.connection_id(),
        room_id = %handle.room_id(),
        user_id = %handle.user_id()
    )
)]
pub async fn run_connection<Si, St, E>(
    handle: ConnectionHandle,
    outbound: mpsc::Receiver<String>,
    sink: Si,
    stream: St,
    registry: Registry,
    handler: Arc<dyn FrameHandler>,
) where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display,
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send,
{
    let timers = registry.timers();
    let mut writer = tokio::spawn(write_pump(handle.clone(), outbound, sink, timers));

    read_pump(&handle, stream, handler.as_ref(), timers.liveness_window).await;

    // The coordinator queues the disconnect notice and closes the handle,
    // which lets the write pump drain and close the transport.
    registry.unregister(handle.clone(), RemovalReason::Closed).await;

    if tokio::time::timeout(timers.ack, &mut writer).await.is_err() {
        handle.close();
        let _ = writer.await;
    }

    debug!(
        target: "poker.hub.connection",
        connection_id = %handle.connection_id(),
        "Connection finished"
    );
}

async fn read_pump<St, E>(
    handle: &ConnectionHandle,
    mut stream: St,
    handler: &dyn FrameHandler,
    liveness_window: Duration,
) where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display + Send,
{
    loop {
        let next = tokio::select! {
            () = handle.cancel_token.cancelled() => break,
            next = tokio::time::timeout(liveness_window, stream.next()) => next,
        };

        let message = match next {
            Err(_) => {
                debug!(
                    target: "poker.hub.connection",
                    connection_id = %handle.connection_id(),
                    "No inbound traffic within liveness window"
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(
                    target: "poker.hub.connection",
                    connection_id = %handle.connection_id(),
                    error = %e,
                    "Transport read failed"
                );
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                if text.len() > MAX_MESSAGE_SIZE {
                    warn!(
                        target: "poker.hub.connection",
                        connection_id = %handle.connection_id(),
                        size = text.len(),
                        "Inbound frame exceeds size limit"
                    );
                    break;
                }
                match InboundFrame::decode(&text) {
                    Ok(frame) => {
                        if let Err(e) = handler.handle_frame(handle, frame).await {
                            debug!(
                                target: "poker.hub.connection",
                                connection_id = %handle.connection_id(),
                                error = %e,
                                "Frame rejected"
                            );
                        }
                    }
                    Err(e) => {
                        warn!(
                            target: "poker.hub.connection",
                            connection_id = %handle.connection_id(),
                            error = %e,
                            "Discarding malformed frame"
                        );
                    }
                }
            }
            Message::Binary(bytes) => {
                if bytes.len() > MAX_MESSAGE_SIZE {
                    break;
                }
                warn!(
                    target: "poker.hub.connection",
                    connection_id = %handle.connection_id(),
                    "Discarding binary frame"
                );
            }
            Message::Pong(_) => handle.record_ack(),
            // The transport answers pings itself.
            Message::Ping(_) => {}
            Message::Close(_) => break,
        }
    }
}

async fn write_pump<Si>(
    handle: ConnectionHandle,
    mut outbound: mpsc::Receiver<String>,
    mut sink: Si,
    timers: ConnectionTimers,
) where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let probe_period = timers.probe_period();
    let mut probe = tokio::time::interval_at(Instant::now() + probe_period, probe_period);
    probe.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            () = handle.cancel_token.cancelled() => {
                outbound.close();
                let mut pending = Vec::new();
                while let Ok(frame) = outbound.try_recv() {
                    pending.push(Message::Text(frame));
                }
                if !pending.is_empty() {
                    let _ = write_frames(&mut sink, pending, timers.write_wait).await;
                }
                break;
            }

            frame = outbound.recv() => {
                let Some(first) = frame else { break };
                let mut batch = vec![Message::Text(first)];
                while batch.len() < MAX_BATCH {
                    match outbound.try_recv() {
                        Ok(frame) => batch.push(Message::Text(frame)),
                        Err(_) => break,
                    }
                }
                if let Err(e) = write_frames(&mut sink, batch, timers.write_wait).await {
                    debug!(
                        target: "poker.hub.connection",
                        connection_id = %handle.connection_id(),
                        error = %e,
                        "Outbound write failed"
                    );
                    break;
                }
            }

            _ = probe.tick() => {
                if let Err(e) = write_frames(&mut sink, vec![Message::Ping(Vec::new())], timers.write_wait).await {
                    debug!(
                        target: "poker.hub.connection",
                        connection_id = %handle.connection_id(),
                        error = %e,
                        "Keepalive probe failed"
                    );
                    break;
                }
            }
        }
    }

    // Stops the read pump if the write side failed first.
    handle.cancel_token.cancel();
    close_transport(&mut sink, timers.write_wait).await;
}

/// Write frames and flush once, within a single deadline.
async fn write_frames<Si>(
    sink: &mut Si,
    frames: Vec<Message>,
    deadline: Duration,
) -> Result<(), PokerError>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let write = async {
        for frame in frames {
            sink.feed(frame)
                .await
                .map_err(|e| PokerError::Internal(format!("transport write failed: {e}")))?;
        }
        sink.flush()
            .await
            .map_err(|e| PokerError::Internal(format!("transport flush failed: {e}")))
    };

    tokio::time::timeout(deadline, write)
        .await
        .map_err(|_| PokerError::Timeout("transport write deadline exceeded".to_string()))?
}

async fn close_transport<Si>(sink: &mut Si, deadline: Duration)
where
    Si: Sink<Message> + Unpin,
{
    let _ = tokio::time::timeout(deadline, async {
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
    })
    .await;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hub::messages::Departure;
    use crate::hub::metrics::HubMetrics;
    use crate::hub::registry::RegistryConfig;
    use std::convert::Infallible;
    use std::sync::atomic::AtomicUsize;

    fn handle() -> (ConnectionHandle, mpsc::Receiver<String>) {
        ConnectionHandle::new(RoomId::new(), UserId::new(), CancellationToken::new())
    }

    #[derive(Default)]
    struct CountingHandler {
        frames: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FrameHandler for CountingHandler {
        async fn handle_frame(
            &self,
            _connection: &ConnectionHandle,
            _frame: InboundFrame,
        ) -> Result<(), PokerError> {
            self.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// A registered connection whose pumps run over in-memory channels.
    struct Running {
        registry: Registry,
        departures: mpsc::Receiver<Departure>,
        handle: ConnectionHandle,
        handler: Arc<CountingHandler>,
        client_tx: futures::channel::mpsc::UnboundedSender<Result<Message, Infallible>>,
        client_rx: futures::channel::mpsc::UnboundedReceiver<Message>,
        task: tokio::task::JoinHandle<()>,
    }

    async fn start_running(liveness_window: Duration) -> Running {
        let (tx, departures) = mpsc::channel(16);
        let config = RegistryConfig {
            timers: ConnectionTimers {
                liveness_window,
                ..ConnectionTimers::default()
            },
            ..RegistryConfig::default()
        };
        let (registry, _task) =
            Registry::spawn(config, tx, HubMetrics::new(), CancellationToken::new());

        let (handle, outbound) =
            ConnectionHandle::new(RoomId::new(), UserId::new(), registry.child_token());
        registry.register(handle.clone()).await.unwrap();

        let (sink, client_rx) = futures::channel::mpsc::unbounded::<Message>();
        let (client_tx, stream) = futures::channel::mpsc::unbounded();
        let handler = Arc::new(CountingHandler::default());
        let task = tokio::spawn(run_connection(
            handle.clone(),
            outbound,
            sink,
            stream,
            registry.clone(),
            Arc::clone(&handler) as Arc<dyn FrameHandler>,
        ));
        Running {
            registry,
            departures,
            handle,
            handler,
            client_tx,
            client_rx,
            task,
        }
    }

    /// Everything the client saw, up to the transport closing.
    async fn drain(
        client_rx: &mut futures::channel::mpsc::UnboundedReceiver<Message>,
    ) -> Vec<Message> {
        let mut seen = Vec::new();
        while let Some(message) = client_rx.next().await {
            seen.push(message);
        }
        seen
    }

    async fn assert_torn_down(mut running: Running) {
        tokio::time::timeout(Duration::from_secs(30), running.task)
            .await
            .expect("pumps stop")
            .unwrap();

        let departure = running.departures.recv().await.unwrap();
        assert_eq!(departure.connection_id, running.handle.connection_id());
        assert_eq!(departure.reason, RemovalReason::Closed);
        assert!(running.handle.is_closed());
        assert!(
            !running
                .registry
                .is_connected(running.handle.room_id(), running.handle.user_id())
                .await
        );

        let seen = drain(&mut running.client_rx).await;
        assert!(seen
            .iter()
            .any(|m| matches!(m, Message::Text(text) if text == DISCONNECT_NOTICE)));
        assert!(matches!(seen.last(), Some(Message::Close(_))));
    }

    #[test]
    fn test_timer_derivations() {
        let timers = ConnectionTimers::default();
        assert_eq!(timers.probe_period(), Duration::from_secs(54));
        assert_eq!(timers.stale_after(), Duration::from_secs(120));
        assert_eq!(timers.handoff, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (conn, _rx) = handle();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert!(conn.mark_registered());
        assert!(!conn.mark_registered());
        assert_eq!(conn.begin_unregister(), ConnectionState::Registered);
        assert_eq!(conn.state(), ConnectionState::Unregistering);
        assert_eq!(conn.begin_unregister(), ConnectionState::Unregistering);
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert!(!conn.mark_registered());
    }

    #[tokio::test]
    async fn test_deliver_reports_full_and_closed() {
        let (conn, mut rx) = handle();
        for i in 0..OUTBOUND_QUEUE_CAPACITY {
            assert_eq!(conn.deliver(format!("{i}")), Delivery::Delivered);
        }
        assert_eq!(conn.deliver("overflow".to_string()), Delivery::Full);
        assert_eq!(rx.recv().await.as_deref(), Some("0"));

        conn.close();
        assert_eq!(conn.deliver("late".to_string()), Delivery::Closed);
    }

    #[tokio::test]
    async fn test_notify_disconnect_after_close_is_dropped() {
        let (conn, mut rx) = handle();
        conn.notify_disconnect();
        conn.close();
        conn.notify_disconnect();
        drop(conn);
        assert_eq!(rx.recv().await.as_deref(), Some(DISCONNECT_NOTICE));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_age_tracks_pongs() {
        let (conn, _rx) = handle();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(conn.since_last_ack(Instant::now()), Duration::from_secs(30));

        conn.record_ack();
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(conn.since_last_ack(Instant::now()), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_frames_times_out_on_stalled_sink() {
        // A zero-capacity channel whose receiver is never polled stalls
        // after the first buffered item.
        let (mut tx, _rx) = futures::channel::mpsc::channel::<Message>(0);
        let frames = vec![
            Message::Text("a".to_string()),
            Message::Text("b".to_string()),
            Message::Text("c".to_string()),
        ];
        let result = write_frames(&mut tx, frames, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(PokerError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_is_unregistered_after_liveness_window() {
        let running = start_running(Duration::from_secs(1)).await;

        // Frames keep the connection alive; silence afterwards does not.
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(600)).await;
            running
                .client_tx
                .unbounded_send(Ok(Message::Text(r#"{"action":"ping"}"#.to_string())))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!running.handle.is_closed());
        assert_eq!(running.handler.frames.load(Ordering::SeqCst), 3);

        assert_torn_down(running).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversize_frame_ends_connection() {
        let running = start_running(Duration::from_secs(60)).await;

        let oversize = "x".repeat(MAX_MESSAGE_SIZE + 1);
        running
            .client_tx
            .unbounded_send(Ok(Message::Text(oversize)))
            .unwrap();
        running
            .client_tx
            .unbounded_send(Ok(Message::Text(r#"{"action":"ping"}"#.to_string())))
            .unwrap();

        let handler = Arc::clone(&running.handler);
        assert_torn_down(running).await;
        assert_eq!(handler.frames.load(Ordering::SeqCst), 0);
    }
}
