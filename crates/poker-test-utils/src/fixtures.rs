//! Pre-configured test data.

use poker_service::config::Config;
use poker_service::models::{Room, User};
use poker_service::services::RoomService;
use serde_json::{json, Value};
use std::collections::HashMap;

/// A room created through the service, with its members.
#[derive(Debug, Clone)]
pub struct SeededRoom {
    /// Room as stored after every member joined.
    pub room: Room,
    /// The creator, who holds the scrum master role.
    pub scrum_master: User,
    /// Members in join order, excluding the creator.
    pub members: Vec<User>,
}

impl SeededRoom {
    /// Find a member by name (the creator included).
    #[must_use]
    pub fn user(&self, name: &str) -> &User {
        std::iter::once(&self.scrum_master)
            .chain(self.members.iter())
            .find(|user| user.name == name)
            .unwrap_or_else(|| panic!("no seeded user named {name}"))
    }
}

/// Create a room held by `holder` and join each of `members`.
pub async fn seed_room(
    rooms: &RoomService,
    name: &str,
    holder: &str,
    members: &[&str],
) -> SeededRoom {
    let room = rooms
        .create_room(name, holder)
        .await
        .expect("create room");
    let scrum_master = room
        .scrum_master()
        .cloned()
        .expect("creator is a participant");

    let mut joined = Vec::with_capacity(members.len());
    for member in members {
        let (user, _) = rooms
            .join_room(room.id, member)
            .await
            .expect("join room");
        joined.push(user);
    }

    let room = rooms.get_room(room.id).await.expect("reload room");
    SeededRoom {
        room,
        scrum_master,
        members: joined,
    }
}

/// Configuration with defaults and a fixed succession seed.
#[must_use]
pub fn test_config() -> Config {
    test_config_with(&[])
}

/// Configuration with the given environment overrides.
#[must_use]
pub fn test_config_with(overrides: &[(&str, &str)]) -> Config {
    let mut vars = HashMap::from([("SUCCESSOR_SEED".to_string(), "7".to_string())]);
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).expect("valid test config")
}

/// Build an inbound `{action, payload}` frame.
#[must_use]
pub fn frame(action: &str, payload: Value) -> Value {
    json!({ "action": action, "payload": payload })
}

/// Poll `check` every 10ms until it holds, for up to two seconds.
///
/// Returns whether it ever held.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    false
}
