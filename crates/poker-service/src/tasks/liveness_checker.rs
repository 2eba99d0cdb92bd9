//! Liveness checker background task.
//!
//! Connections are probed by their write pump; a connection whose last
//! pong is older than twice the liveness window is unregistered here even
//! if its read pump has not noticed yet.

use crate::hub::{Registry, RemovalReason};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Start the liveness checker. Checks once per liveness window.
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "poker.hub.liveness")]
pub async fn start_liveness_checker(registry: Registry, cancel_token: CancellationToken) {
    let timers = registry.timers();
    let period = timers.liveness_window;
    info!(
        target: "poker.hub.liveness",
        period_seconds = period.as_secs(),
        stale_after_seconds = timers.stale_after().as_secs(),
        "Starting liveness checker"
    );

    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let stale = check_once(&registry, Instant::now()).await;
                if stale > 0 {
                    warn!(
                        target: "poker.hub.liveness",
                        stale_count = stale,
                        "Unregistered stale connections"
                    );
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "poker.hub.liveness",
                    "Liveness checker received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "poker.hub.liveness", "Liveness checker stopped");
}

/// Unregister every connection whose last acknowledgment is older than the
/// stale threshold. Returns how many were submitted.
pub async fn check_once(registry: &Registry, now: Instant) -> usize {
    let stale_after = registry.timers().stale_after();
    let mut stale = 0;
    for connection in registry.connections().await {
        if connection.since_last_ack(now) > stale_after {
            stale += 1;
            registry.unregister(connection, RemovalReason::Stale).await;
        }
    }
    stale
}
