//! HTTP request handlers.

pub mod rooms;
pub mod sessions;
pub mod websocket;

pub use rooms::{create_room, get_room, join_room};
pub use sessions::{create_session, delete_session, get_session};
pub use websocket::ws_upgrade;
