//! Message types for the connection registry.
//!
//! Registration and unregistration are serialized through the registry
//! coordinator's mailbox. Departures flow the other way, from the
//! coordinator to disconnect reconciliation.

use super::connection::ConnectionHandle;
use super::metrics::RemovalReason;
use crate::errors::PokerError;
use common::types::{ConnectionId, RoomId, UserId};
use tokio::sync::oneshot;

/// Requests handled by the registry coordinator.
#[derive(Debug)]
pub enum RegistryRequest {
    /// Insert a connection into its room's subscriber set.
    Register {
        handle: ConnectionHandle,
        respond_to: oneshot::Sender<Result<(), PokerError>>,
    },

    /// Remove a connection and close its outbound queue.
    Unregister {
        handle: ConnectionHandle,
        reason: RemovalReason,
    },
}

/// A registered connection went away.
///
/// Emitted once per connection that was in a subscriber set (or had
/// completed registration) when it was unregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Departure {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub reason: RemovalReason,
}
