//! Session sweeper background task.
//!
//! Runs a sweep every period (TTL/3 by default). A failed sweep is logged
//! and the next tick runs normally.

use crate::services::SessionManager;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Start the session sweeper.
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "poker.session.sweeper")]
pub async fn start_session_sweeper(
    sessions: Arc<SessionManager>,
    period: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "poker.session.sweeper",
        period_seconds = period.as_secs(),
        ttl_seconds = sessions.ttl().as_secs(),
        "Starting session sweeper"
    );

    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = sessions.sweep().await;
                if report.errors > 0 {
                    warn!(
                        target: "poker.session.sweeper",
                        errors = report.errors,
                        evicted = report.evicted,
                        refreshed = report.refreshed,
                        "Sweep completed with errors"
                    );
                } else if report.evicted > 0 || report.refreshed > 0 {
                    info!(
                        target: "poker.session.sweeper",
                        evicted = report.evicted,
                        refreshed = report.refreshed,
                        rooms_deleted = report.rooms_deleted,
                        "Sweep completed"
                    );
                } else {
                    debug!(
                        target: "poker.session.sweeper",
                        rooms = report.rooms_scanned,
                        "Sweep found nothing to do"
                    );
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "poker.session.sweeper",
                    "Session sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "poker.session.sweeper", "Session sweeper stopped");
}
