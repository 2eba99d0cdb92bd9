//! HTTP routes for the poker service.
//!
//! Defines the Axum router and application state.

use crate::config::Config;
use crate::handlers;
use crate::hub::Registry;
use crate::observability::{health_router, HealthState};
use crate::router::MessageRouter;
use crate::services::{RoomService, SessionManager};

use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::warn;

/// REST request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    pub rooms: Arc<RoomService>,

    pub sessions: Arc<SessionManager>,

    /// Inbound frame dispatch for websocket connections.
    pub router: Arc<MessageRouter>,

    pub registry: Registry,

    pub health: Arc<HealthState>,
}

/// Build the application routes.
///
/// - `/api/rooms`, `/api/rooms/:roomId`, `/api/rooms/:roomId/join`
/// - `/api/sessions/:userId/:roomId`, `/api/sessions`
/// - `/ws/:roomId` - websocket upgrade (no request timeout)
/// - `/api/health`, `/health`, `/ready`
///
/// Everything sits behind CORS for the configured origins with
/// credentials allowed.
pub fn build_routes(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/api/rooms", post(handlers::create_room))
        .route("/api/rooms/:roomId", get(handlers::get_room))
        .route("/api/rooms/:roomId/join", post(handlers::join_room))
        .route(
            "/api/sessions/:userId/:roomId",
            post(handlers::create_session),
        )
        .route(
            "/api/sessions",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .with_state(state.clone())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    let ws_routes = Router::new()
        .route("/ws/:roomId", get(handlers::ws_upgrade))
        .with_state(state.clone());

    // Layer order (bottom-to-top execution):
    // 1. TraceLayer - Log request details
    // 2. CorsLayer - Preflight and response headers (outermost)
    api_routes
        .merge(ws_routes)
        .merge(health_router(state.health.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.allowed_origins))
}

/// CORS for credentialed requests from `origins`.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(
                    target: "poker.routes",
                    origin = %origin,
                    error = %e,
                    "Ignoring invalid allowed origin"
                );
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}
