//! In-process websocket transport.
//!
//! The server half satisfies the sink and stream bounds of
//! `poker_service::hub::serve_connection`; the client half drives it from a
//! test.

use axum::extract::ws::Message;
use futures::channel::mpsc;
use futures::StreamExt;
use std::convert::Infallible;
use std::time::Duration;

/// How long a client waits for the next server frame.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Server end: frames written by the service and frames read from the client.
pub struct ServerTransport {
    pub sink: mpsc::UnboundedSender<Message>,
    pub stream: mpsc::UnboundedReceiver<Result<Message, Infallible>>,
}

/// Client end of an in-process transport.
pub struct ClientTransport {
    outgoing: Option<mpsc::UnboundedSender<Result<Message, Infallible>>>,
    incoming: mpsc::UnboundedReceiver<Message>,
}

/// Create a connected transport pair.
#[must_use]
pub fn transport_pair() -> (ServerTransport, ClientTransport) {
    let (server_tx, client_rx) = mpsc::unbounded();
    let (client_tx, server_rx) = mpsc::unbounded();
    (
        ServerTransport {
            sink: server_tx,
            stream: server_rx,
        },
        ClientTransport {
            outgoing: Some(client_tx),
            incoming: client_rx,
        },
    )
}

impl ClientTransport {
    /// Send a message to the server. Ignored after [`Self::hang_up`].
    pub fn send(&self, message: Message) {
        if let Some(outgoing) = &self.outgoing {
            let _ = outgoing.unbounded_send(Ok(message));
        }
    }

    /// End the client's stream, as when the peer goes away.
    pub fn hang_up(&mut self) {
        self.outgoing = None;
    }

    /// Next message from the server, or `None` once the server closed the
    /// transport or nothing arrived within [`RECV_TIMEOUT`].
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::time::timeout(RECV_TIMEOUT, self.incoming.next())
            .await
            .ok()
            .flatten()
    }

    /// Next message if one is already queued.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.incoming.try_next().ok().flatten()
    }
}
