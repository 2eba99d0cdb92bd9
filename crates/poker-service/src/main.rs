//! Scrum Poker Service
//!
//! HTTP and websocket server for realtime estimation rooms.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Open the presence store (Postgres when `DATABASE_URL` is set)
//! 4. Spawn the connection registry
//! 5. Start the session sweeper, liveness checker and disconnect reconciler
//! 6. Serve HTTP until a shutdown signal arrives

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use common::secret::ExposeSecret;
use poker_service::config::Config;
use poker_service::hub::{
    ConnectionTimers, HubMetrics, Registry, RegistryConfig, DEPARTURE_CHANNEL_BUFFER,
};
use poker_service::observability::{metrics::init_metrics_recorder, HealthState};
use poker_service::router::MessageRouter;
use poker_service::routes::{self, AppState};
use poker_service::services::{RoomService, SessionManager, SuccessorPolicy};
use poker_service::store::{MemoryStore, PgPresenceStore, PresenceStore};
use poker_service::tasks::{
    start_disconnect_reconciler, start_liveness_checker, start_session_sweeper,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first so the log format can follow it
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "poker_service=debug,tower_http=debug".into());
    if config.observability.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting Scrum Poker service");
    info!(
        bind_address = %config.bind_address,
        production = config.production,
        persistent = config.database.is_some(),
        session_ttl_seconds = config.session_ttl.as_secs(),
        liveness_window_seconds = config.liveness_window.as_secs(),
        allowed_origins = ?config.allowed_origins,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let store: Arc<dyn PresenceStore> = match &config.database {
        Some(database) => {
            info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(database.max_connections)
                .min_connections(1)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .connect(database.url.expose_secret())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to database");
                    e
                })?;
            let store = PgPresenceStore::new(pool);
            store.migrate().await.map_err(|e| {
                error!(error = %e, "Failed to apply schema");
                e
            })?;
            info!("Database connection established");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set, presence state is kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let shutdown_token = CancellationToken::new();

    let (departures_tx, departures_rx) = mpsc::channel(DEPARTURE_CHANNEL_BUFFER);
    let (registry, registry_task) = Registry::spawn(
        RegistryConfig {
            timers: ConnectionTimers::from_config(&config),
            room_lock_timeout: config.room_lock_timeout,
        },
        departures_tx,
        HubMetrics::new(),
        shutdown_token.child_token(),
    );

    let rooms = Arc::new(RoomService::new(
        store,
        registry.clone(),
        SuccessorPolicy::from_seed(config.successor_seed),
    ));
    let sessions = Arc::new(SessionManager::new(Arc::clone(&rooms), config.session_ttl));
    let message_router = Arc::new(MessageRouter::new(Arc::clone(&rooms)));

    tokio::spawn(start_session_sweeper(
        Arc::clone(&sessions),
        config.sweep_period(),
        shutdown_token.child_token(),
    ));
    tokio::spawn(start_liveness_checker(
        registry.clone(),
        shutdown_token.child_token(),
    ));
    tokio::spawn(start_disconnect_reconciler(
        Arc::clone(&sessions),
        departures_rx,
        shutdown_token.child_token(),
    ));
    info!("Background tasks started");

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        e
    })?;
    let drain_seconds = config.drain_seconds;

    let state = Arc::new(AppState {
        config,
        rooms,
        sessions,
        router: message_router,
        registry,
        health: Arc::clone(&health_state),
    });

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let app = routes::build_routes(state).merge(metrics_router);

    // Bind before marking ready to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind listener");
        e
    })?;
    health_state.mark_serving();
    info!(addr = %addr, "Scrum Poker service listening");

    let server_health = Arc::clone(&health_state);
    let server_token = shutdown_token.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal(drain_seconds).await;
        // Stop advertising readiness and close websockets so the server can drain
        server_health.mark_draining();
        server_token.cancel();
    })
    .await?;

    shutdown_token.cancel();
    if let Err(e) = registry_task.await {
        warn!(error = %e, "Registry task ended abnormally");
    }

    info!("Scrum Poker service shutdown complete");
    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
/// Returns when a shutdown signal is received and the drain period is complete.
async fn shutdown_signal(drain_seconds: u64) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    if drain_seconds > 0 {
        warn!("Draining connections for {} seconds...", drain_seconds);
        tokio::time::sleep(Duration::from_secs(drain_seconds)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (SHUTDOWN_DRAIN_SECONDS=0)");
    }
}
