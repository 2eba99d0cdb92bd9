//! Scrum Poker Service Library
//!
//! Realtime estimation rooms: participants join a room over HTTP, then
//! connect a websocket that carries vote, reveal, reset, transfer, rename
//! and leave actions. Every accepted action is persisted and fanned out to
//! all connections in the room.
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> services/*.rs -> store/*.rs
//!                       |                 |
//!                  hub::serve_connection  +--> hub::Registry (fan-out)
//!                       |
//!                  router::MessageRouter -> services::RoomService
//!
//! Registry coordinator (one task)
//! └── subscriber sets, one per room
//!     └── Connection (read pump + write pump per websocket)
//!
//! Background tasks: session sweeper, liveness checker,
//! disconnect reconciler
//! ```
//!
//! # Key Design Decisions
//!
//! - **One connection per (room, user)**: a new registration evicts the
//!   previous one
//! - **Write-through**: mutations reach the presence store before they are
//!   broadcast
//! - **Per-room serialization**: a room lock spans mutate, persist and
//!   broadcast
//! - **Masked votes**: raw votes leave the server only after reveal
//!
//! # Modules
//!
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with HTTP status code mapping
//! - [`models`] - Rooms, users and sessions
//! - [`protocol`] - Websocket frame encoding
//! - [`store`] - Presence store (Postgres or in-memory)
//! - [`hub`] - Connection registry and fan-out
//! - [`services`] - Room and session operations
//! - [`router`] - Inbound frame dispatch
//! - [`tasks`] - Background loops
//! - [`handlers`] / [`routes`] - HTTP surface
//! - [`observability`] - Metrics and health probes

pub mod config;
pub mod errors;
pub mod handlers;
pub mod hub;
pub mod models;
pub mod observability;
pub mod protocol;
pub mod router;
pub mod routes;
pub mod services;
pub mod store;
pub mod tasks;
