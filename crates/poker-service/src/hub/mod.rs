//! Real-time fan-out hub.
//!
//! - [`connection`] - per-connection handle, lifecycle and transport pumps
//! - [`registry`] - room subscriber sets, registration coordinator and
//!   broadcast
//! - [`messages`] - coordinator requests and departures
//! - [`metrics`] - registry counters

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;

pub use connection::{
    run_connection, serve_connection, ConnectionHandle, ConnectionState, ConnectionTimers,
    Delivery, FrameHandler,
};
pub use messages::Departure;
pub use metrics::{HubMetrics, RemovalReason};
pub use registry::{BroadcastReport, Registry, RegistryConfig, DEPARTURE_CHANNEL_BUFFER};
