//! # Poker Test Utilities
//!
//! Shared test utilities for the Scrum Poker service.
//!
//! ## Modules
//!
//! - `fixtures` - Seeded rooms, configs and frame builders
//! - `transport` - In-process websocket transport pair
//! - `flaky_store` - Presence store wrapper with injected failures
//! - `harness` - Fully wired service with in-process clients
//!
//! ## Usage
//!
//! ```rust,ignore
//! use poker_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let app = TestApp::new();
//!     let seeded = seed_room(&app.rooms, "Sprint 12", "alice", &["bob"]).await;
//!     let mut alice = app.connect(seeded.room.id, seeded.scrum_master.id).await;
//!
//!     alice.send_json(&frame("reveal", json!({"userId": seeded.scrum_master.id})));
//!     let event = alice.recv_action("reveal").await;
//! }
//! ```

pub mod fixtures;
pub mod flaky_store;
pub mod harness;
pub mod transport;

pub use fixtures::*;
pub use flaky_store::FlakyStore;
pub use harness::{TestApp, TestClient};
pub use transport::{transport_pair, ClientTransport, ServerTransport};
