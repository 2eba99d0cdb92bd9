//! Disconnect reconciliation background task.
//!
//! Consumes departures from the registry and brings presence state in line:
//! a participant with no remaining live connection is marked offline and
//! keeps a refreshed session so they can rejoin within the TTL.

use crate::hub::Departure;
use crate::observability::metrics;
use crate::services::SessionManager;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Start the reconciler.
///
/// Returns when the cancellation token is triggered or the departure
/// channel closes.
#[instrument(skip_all, name = "poker.session.reconciler")]
pub async fn start_disconnect_reconciler(
    sessions: Arc<SessionManager>,
    mut departures: mpsc::Receiver<Departure>,
    cancel_token: CancellationToken,
) {
    info!(target: "poker.session.reconciler", "Starting disconnect reconciler");

    loop {
        tokio::select! {
            departure = departures.recv() => {
                let Some(departure) = departure else {
                    debug!(
                        target: "poker.session.reconciler",
                        "Departure channel closed, exiting"
                    );
                    break;
                };
                match sessions.reconcile_disconnect(departure).await {
                    Ok(outcome) => metrics::record_disconnect(outcome.as_str()),
                    Err(e) => {
                        error!(
                            target: "poker.session.reconciler",
                            room_id = %departure.room_id,
                            user_id = %departure.user_id,
                            error = %e,
                            "Failed to reconcile disconnect"
                        );
                        metrics::record_disconnect("error");
                    }
                }
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "poker.session.reconciler",
                    "Disconnect reconciler received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "poker.session.reconciler", "Disconnect reconciler stopped");
}
