//! Health endpoints.
//!
//! The service moves through three phases, tracked by [`HealthState`]:
//!
//! ```text
//! Starting -> Serving -> Draining
//! ```
//!
//! `GET /api/health` (polled by the web client) and `GET /health` answer
//! `OK` in every phase: the process is up. `GET /ready` answers 200 only
//! while `Serving` and drops to 503 when the shutdown signal arrives, while
//! open websockets are still draining. Its body names the current phase.

use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Lifecycle phase of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServicePhase {
    /// Store and registry are still being set up.
    Starting = 0,
    Serving = 1,
    /// Shutdown began; existing connections are closing.
    Draining = 2,
}

impl ServicePhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ServicePhase::Starting => "starting",
            ServicePhase::Serving => "serving",
            ServicePhase::Draining => "draining",
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => ServicePhase::Starting,
            1 => ServicePhase::Serving,
            _ => ServicePhase::Draining,
        }
    }
}

/// Shared service phase, read by the probes and advanced by `main`.
#[derive(Debug, Default)]
pub struct HealthState {
    phase: AtomicU8,
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self) -> ServicePhase {
        ServicePhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Start accepting traffic. Has no effect once draining.
    pub fn mark_serving(&self) {
        let _ = self.phase.compare_exchange(
            ServicePhase::Starting as u8,
            ServicePhase::Serving as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn mark_draining(&self) {
        self.phase.store(ServicePhase::Draining as u8, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_serving(&self) -> bool {
        self.phase() == ServicePhase::Serving
    }
}

pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/api/health", get(process_up))
        .route("/health", get(process_up))
        .route("/ready", get(readiness))
        .with_state(health_state)
}

async fn process_up() -> &'static str {
    "OK"
}

async fn readiness(State(state): State<Arc<HealthState>>) -> (StatusCode, &'static str) {
    let phase = state.phase();
    let status = if phase == ServicePhase::Serving {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, phase.as_str())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn get_status(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn test_phase_only_moves_forward() {
        let state = HealthState::new();
        assert_eq!(state.phase(), ServicePhase::Starting);
        state.mark_serving();
        assert!(state.is_serving());
        state.mark_draining();
        state.mark_serving();
        assert_eq!(state.phase(), ServicePhase::Draining);
    }

    #[tokio::test]
    async fn test_process_probes_ok_in_every_phase() {
        let state = Arc::new(HealthState::new());
        for phase in [ServicePhase::Starting, ServicePhase::Serving, ServicePhase::Draining] {
            match phase {
                ServicePhase::Starting => {}
                ServicePhase::Serving => state.mark_serving(),
                ServicePhase::Draining => state.mark_draining(),
            }
            assert_eq!(state.phase(), phase);
            for uri in ["/api/health", "/health"] {
                let (status, body) = get_status(health_router(Arc::clone(&state)), uri).await;
                assert_eq!((status, body.as_str()), (StatusCode::OK, "OK"), "{uri}");
            }
        }
    }

    #[tokio::test]
    async fn test_readiness_reports_phase() {
        let state = Arc::new(HealthState::new());
        let (status, body) = get_status(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!((status, body.as_str()), (StatusCode::SERVICE_UNAVAILABLE, "starting"));

        state.mark_serving();
        let (status, body) = get_status(health_router(Arc::clone(&state)), "/ready").await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "serving"));

        state.mark_draining();
        let (status, body) = get_status(health_router(state), "/ready").await;
        assert_eq!((status, body.as_str()), (StatusCode::SERVICE_UNAVAILABLE, "draining"));
    }
}
