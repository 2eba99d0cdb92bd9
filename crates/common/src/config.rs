//! Common configuration types for Scrum Poker components.

use crate::secret::SecretString;

/// Default maximum number of pooled database connections.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string (contains credentials)
    pub url: SecretString,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

impl DatabaseConfig {
    /// Create a database configuration with the default pool size.
    #[must_use]
    pub fn new(url: SecretString) -> Self {
        Self {
            url,
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Emit JSON-formatted logs instead of human-readable ones
    pub json_logs: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_debug_hides_url() {
        let config = DatabaseConfig::new(SecretString::from("postgres://u:secret@db/poker"));
        let debug = format!("{config:?}");

        assert_eq!(config.max_connections, DEFAULT_DB_MAX_CONNECTIONS);
        assert!(!debug.contains("secret@db"));
    }

    #[test]
    fn test_observability_defaults_to_text_logs() {
        assert!(!ObservabilityConfig::default().json_logs);
    }
}
