//! Domain services.
//!
//! - [`rooms::RoomService`] - room mutations and their broadcasts
//! - [`sessions::SessionManager`] - session lifecycle, sweep, disconnect
//!   reconciliation
//! - [`room_locks::RoomLocks`] - per-room mutation serialization
//! - [`successor::SuccessorPolicy`] - role reassignment

pub mod room_locks;
pub mod rooms;
pub mod sessions;
pub mod successor;

pub use room_locks::{RoomGuard, RoomLocks};
pub use rooms::{DepartureOutcome, RoomService};
pub use sessions::{DisconnectOutcome, ResolvedSession, SessionManager, SweepReport};
pub use successor::SuccessorPolicy;
