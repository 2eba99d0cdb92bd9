//! Scrum Poker service configuration.
//!
//! Configuration is loaded from environment variables. The database URL is
//! the only sensitive field and is redacted in Debug output.

use common::config::{DatabaseConfig, ObservabilityConfig};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default session time-to-live in seconds.
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 180;

/// Default peer liveness window in seconds.
pub const DEFAULT_LIVENESS_WINDOW_SECONDS: u64 = 60;

/// Default per-room lock acquisition timeout during (un)registration.
pub const DEFAULT_ROOM_LOCK_TIMEOUT_SECONDS: u64 = 5;

/// Default deadline for handing a registration request to the registry.
pub const DEFAULT_REGISTRATION_HANDOFF_MS: u64 = 2000;

/// Default deadline for the registry to acknowledge a registration.
pub const DEFAULT_REGISTRATION_ACK_SECONDS: u64 = 10;

/// Default deadline for a single outbound transport write.
pub const DEFAULT_WRITE_WAIT_SECONDS: u64 = 10;

/// Scrum Poker service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8080").
    pub bind_address: String,

    /// Postgres settings. `None` selects the in-memory presence store.
    pub database: Option<DatabaseConfig>,

    /// Production deployment: cookies are `Secure` and `SameSite=None`.
    pub production: bool,

    /// Origins allowed to make credentialed cross-origin requests.
    pub allowed_origins: Vec<String>,

    /// Session TTL (default: 180s). The sweep runs every TTL/3.
    pub session_ttl: Duration,

    /// Peer liveness window (default: 60s).
    pub liveness_window: Duration,

    /// Room lock acquisition timeout for the registry (default: 5s).
    pub room_lock_timeout: Duration,

    /// Registration hand-off deadline (default: 2s).
    pub registration_handoff: Duration,

    /// Registration acknowledgment deadline (default: 10s).
    pub registration_ack: Duration,

    /// Outbound write deadline (default: 10s).
    pub write_wait: Duration,

    /// Seconds to wait after a shutdown signal before exiting (default: 0).
    pub drain_seconds: u64,

    /// Seed for scrum master succession. Unseeded uses OS entropy.
    pub successor_seed: Option<u64>,

    /// Logging settings.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field(
                "database",
                &self.database.as_ref().map(|_| "[REDACTED]"),
            )
            .field("production", &self.production)
            .field("allowed_origins", &self.allowed_origins)
            .field("session_ttl", &self.session_ttl)
            .field("liveness_window", &self.liveness_window)
            .field("room_lock_timeout", &self.room_lock_timeout)
            .field("registration_handoff", &self.registration_handoff)
            .field("registration_ack", &self.registration_ack)
            .field("write_wait", &self.write_wait)
            .field("drain_seconds", &self.drain_seconds)
            .field("successor_seed", &self.successor_seed)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = match (vars.get("BIND_ADDRESS"), vars.get("BACKEND_PORT")) {
            (Some(address), _) => address.clone(),
            (None, Some(port)) => {
                let port: u16 = port.parse().map_err(|e| {
                    ConfigError::InvalidValue(format!(
                        "BACKEND_PORT must be a valid port, got '{port}': {e}"
                    ))
                })?;
                format!("0.0.0.0:{port}")
            }
            (None, None) => DEFAULT_BIND_ADDRESS.to_string(),
        };

        let database = match vars.get("DATABASE_URL").filter(|url| !url.is_empty()) {
            Some(url) => {
                let mut database = DatabaseConfig::new(SecretString::from(url.clone()));
                if vars.contains_key("DB_MAX_CONNECTIONS") {
                    let max = positive_u64(vars, "DB_MAX_CONNECTIONS", 0)?;
                    database.max_connections = u32::try_from(max).map_err(|_| {
                        ConfigError::InvalidValue(format!(
                            "DB_MAX_CONNECTIONS is too large: {max}"
                        ))
                    })?;
                }
                Some(database)
            }
            None => None,
        };

        let production = vars
            .get("ENV")
            .map(|env| env.trim().to_ascii_lowercase())
            .is_some_and(|env| env == "prod" || env == "production");

        let allowed_origins = vars
            .get("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(str::trim)
                    .filter(|origin| !origin.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let session_ttl = Duration::from_secs(positive_u64(
            vars,
            "SESSION_TTL_SECONDS",
            DEFAULT_SESSION_TTL_SECONDS,
        )?);

        let liveness_window = Duration::from_secs(positive_u64(
            vars,
            "LIVENESS_WINDOW_SECONDS",
            DEFAULT_LIVENESS_WINDOW_SECONDS,
        )?);

        let room_lock_timeout = Duration::from_secs(positive_u64(
            vars,
            "ROOM_LOCK_TIMEOUT_SECONDS",
            DEFAULT_ROOM_LOCK_TIMEOUT_SECONDS,
        )?);

        let registration_handoff = Duration::from_millis(positive_u64(
            vars,
            "REGISTRATION_HANDOFF_MS",
            DEFAULT_REGISTRATION_HANDOFF_MS,
        )?);

        let registration_ack = Duration::from_secs(positive_u64(
            vars,
            "REGISTRATION_ACK_SECONDS",
            DEFAULT_REGISTRATION_ACK_SECONDS,
        )?);

        let write_wait = Duration::from_secs(positive_u64(
            vars,
            "WRITE_WAIT_SECONDS",
            DEFAULT_WRITE_WAIT_SECONDS,
        )?);

        let drain_seconds = match vars.get("SHUTDOWN_DRAIN_SECONDS") {
            Some(value) => value.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "SHUTDOWN_DRAIN_SECONDS must be a non-negative integer, got '{value}': {e}"
                ))
            })?,
            None => 0,
        };

        let successor_seed = match vars.get("SUCCESSOR_SEED") {
            Some(value) => Some(value.parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "SUCCESSOR_SEED must be an unsigned integer, got '{value}': {e}"
                ))
            })?),
            None => None,
        };

        let observability = ObservabilityConfig {
            json_logs: vars
                .get("LOG_FORMAT")
                .is_some_and(|format| format.eq_ignore_ascii_case("json")),
        };

        Ok(Config {
            bind_address,
            database,
            production,
            allowed_origins,
            session_ttl,
            liveness_window,
            room_lock_timeout,
            registration_handoff,
            registration_ack,
            write_wait,
            drain_seconds,
            successor_seed,
            observability,
        })
    }

    /// Period of the presence sweep (one third of the session TTL).
    pub fn sweep_period(&self) -> Duration {
        (self.session_ttl / 3).max(Duration::from_secs(1))
    }
}

/// Parse a strictly positive integer variable, falling back to `default`.
fn positive_u64(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        )));
    }

    Ok(value)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("defaults should load");

        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.database.is_none());
        assert!(!config.production);
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.session_ttl, Duration::from_secs(180));
        assert_eq!(config.liveness_window, Duration::from_secs(60));
        assert_eq!(config.room_lock_timeout, Duration::from_secs(5));
        assert_eq!(config.registration_handoff, Duration::from_millis(2000));
        assert_eq!(config.registration_ack, Duration::from_secs(10));
        assert_eq!(config.write_wait, Duration::from_secs(10));
        assert_eq!(config.drain_seconds, 0);
        assert_eq!(config.successor_seed, None);
        assert!(!config.observability.json_logs);
    }

    #[test]
    fn test_sweep_period_is_a_third_of_ttl() {
        let config = Config::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config.sweep_period(), Duration::from_secs(60));
    }

    #[test]
    fn test_backend_port_sets_bind_address() {
        let vars = HashMap::from([("BACKEND_PORT".to_string(), "9090".to_string())]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:9090");
    }

    #[test]
    fn test_bind_address_wins_over_backend_port() {
        let vars = HashMap::from([
            ("BIND_ADDRESS".to_string(), "127.0.0.1:7000".to_string()),
            ("BACKEND_PORT".to_string(), "9090".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:7000");
    }

    #[test]
    fn test_backend_port_rejects_non_numeric() {
        let vars = HashMap::from([("BACKEND_PORT".to_string(), "http".to_string())]);
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(msg) if msg.contains("BACKEND_PORT")));
    }

    #[test]
    fn test_database_url_enables_postgres() {
        let vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgres://poker:pw@localhost/poker".to_string(),
            ),
            ("DB_MAX_CONNECTIONS".to_string(), "7".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        let database = config.database.expect("database configured");
        assert_eq!(
            database.url.expose_secret(),
            "postgres://poker:pw@localhost/poker"
        );
        assert_eq!(database.max_connections, 7);
    }

    #[test]
    fn test_production_env_values() {
        for value in ["prod", "production", " PROD "] {
            let vars = HashMap::from([("ENV".to_string(), value.to_string())]);
            assert!(Config::from_vars(&vars).unwrap().production, "{value}");
        }

        let vars = HashMap::from([("ENV".to_string(), "dev".to_string())]);
        assert!(!Config::from_vars(&vars).unwrap().production);
    }

    #[test]
    fn test_allowed_origins_are_split_and_trimmed() {
        let vars = HashMap::from([(
            "ALLOWED_ORIGINS".to_string(),
            "http://localhost:3000, https://poker.example.com,".to_string(),
        )]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.allowed_origins,
            vec![
                "http://localhost:3000".to_string(),
                "https://poker.example.com".to_string()
            ]
        );
    }

    #[test]
    fn test_timer_overrides() {
        let vars = HashMap::from([
            ("SESSION_TTL_SECONDS".to_string(), "30".to_string()),
            ("LIVENESS_WINDOW_SECONDS".to_string(), "20".to_string()),
            ("REGISTRATION_HANDOFF_MS".to_string(), "250".to_string()),
            ("SUCCESSOR_SEED".to_string(), "42".to_string()),
        ]);
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.session_ttl, Duration::from_secs(30));
        assert_eq!(config.sweep_period(), Duration::from_secs(10));
        assert_eq!(config.liveness_window, Duration::from_secs(20));
        assert_eq!(config.registration_handoff, Duration::from_millis(250));
        assert_eq!(config.successor_seed, Some(42));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let vars = HashMap::from([("SESSION_TTL_SECONDS".to_string(), "0".to_string())]);
        let err = Config::from_vars(&vars).unwrap_err();
        assert!(
            matches!(err, ConfigError::InvalidValue(msg) if msg.contains("greater than 0"))
        );
    }

    #[test]
    fn test_non_numeric_liveness_rejected() {
        let vars = HashMap::from([("LIVENESS_WINDOW_SECONDS".to_string(), "soon".to_string())]);
        assert!(Config::from_vars(&vars).is_err());
    }

    #[test]
    fn test_json_log_format() {
        let vars = HashMap::from([("LOG_FORMAT".to_string(), "JSON".to_string())]);
        assert!(Config::from_vars(&vars).unwrap().observability.json_logs);
    }

    #[test]
    fn test_debug_redacts_database_url() {
        let vars = HashMap::from([(
            "DATABASE_URL".to_string(),
            "postgres://poker:hunter2@db/poker".to_string(),
        )]);
        let config = Config::from_vars(&vars).unwrap();
        let debug = format!("{config:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }
}
