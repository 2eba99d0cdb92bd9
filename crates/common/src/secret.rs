//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used across Scrum Poker. The database
//! connection string carries credentials and must never reach a log line,
//! so configuration holds it as a [`SecretString`]. Its `Debug` output is
//! redacted and the inner value is only reachable via
//! [`ExposeSecret::expose_secret`].
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let url = SecretString::from("postgres://poker:hunter2@db/poker");
//! assert!(!format!("{url:?}").contains("hunter2"));
//! assert!(url.expose_secret().starts_with("postgres://"));
//! ```

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("hunter2");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("postgres://localhost/poker");
        assert_eq!(secret.expose_secret(), "postgres://localhost/poker");
    }

    #[test]
    fn test_deserialize_keeps_value_hidden() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct DbSettings {
            host: String,
            url: SecretString,
        }

        let json = r#"{"host": "db", "url": "postgres://u:pw@db/poker"}"#;
        let settings: DbSettings = serde_json::from_str(json).expect("deserialize");

        assert_eq!(settings.url.expose_secret(), "postgres://u:pw@db/poker");

        let debug = format!("{settings:?}");
        assert!(debug.contains("db"));
        assert!(!debug.contains("u:pw"));
    }
}
