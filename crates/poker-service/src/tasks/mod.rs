//! Background tasks.
//!
//! Each task loops until its cancellation token fires:
//!
//! - [`session_sweeper`] - refreshes or evicts expired sessions every TTL/3
//! - [`liveness_checker`] - unregisters connections with no recent pong
//! - [`disconnect_reconciler`] - marks departed users offline

pub mod disconnect_reconciler;
pub mod liveness_checker;
pub mod session_sweeper;

pub use disconnect_reconciler::start_disconnect_reconciler;
pub use liveness_checker::start_liveness_checker;
pub use session_sweeper::start_session_sweeper;
