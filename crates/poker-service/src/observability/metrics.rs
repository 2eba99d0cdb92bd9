//! Metrics definitions for the Scrum Poker service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `poker_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `result`: success, timeout, error
//! - `action`: the fixed wire action set plus `unknown`
//! - `outcome`: applied, rejected
//! - `reason`: duplicate, slow_consumer, stale, closed
//!
//! Room and user ids are never used as labels.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize the Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if the recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Sweeps touch every room; allow for slow stores
        .set_buckets_for_metric(
            Matcher::Full("poker_sweep_duration_seconds".to_string()),
            &[0.001, 0.005, 0.010, 0.050, 0.100, 0.250, 0.500, 1.000, 5.000],
        )
        .map_err(|e| format!("Failed to set sweep buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Full("poker_broadcast_fanout".to_string()),
            &[1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0],
        )
        .map_err(|e| format!("Failed to set fan-out buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Registry Metrics
// ============================================================================

/// Record a registration attempt.
///
/// Metric: `poker_registrations_total`
/// Labels: `result`
pub fn record_registration(result: &'static str) {
    counter!("poker_registrations_total", "result" => result).increment(1);
}

/// Record a connection being removed from the registry.
///
/// Metric: `poker_unregistrations_total`
/// Labels: `reason`
pub fn record_unregistration(reason: &'static str) {
    counter!("poker_unregistrations_total", "reason" => reason).increment(1);
}

/// Set the number of live connections and rooms with subscribers.
///
/// Metrics: `poker_connections_active`, `poker_rooms_active`
pub fn set_registry_size(connections: usize, rooms: usize) {
    gauge!("poker_connections_active").set(connections as f64);
    gauge!("poker_rooms_active").set(rooms as f64);
}

/// Record one fan-out.
///
/// Metrics: `poker_broadcast_fanout`, `poker_broadcast_dropped_total`
pub fn record_broadcast(delivered: usize, dropped: usize) {
    histogram!("poker_broadcast_fanout").record(delivered as f64);
    if dropped > 0 {
        counter!("poker_broadcast_dropped_total").increment(dropped as u64);
    }
}

// ============================================================================
// Router Metrics
// ============================================================================

/// Record a client frame dispatch.
///
/// Metric: `poker_frames_total`
/// Labels: `action`, `outcome`
pub fn record_frame(action: &'static str, outcome: &'static str) {
    counter!("poker_frames_total", "action" => action, "outcome" => outcome).increment(1);
}

// ============================================================================
// Presence Metrics
// ============================================================================

/// Record a completed sweep cycle.
///
/// Metrics: `poker_sweep_duration_seconds`, `poker_sweep_evictions_total`,
/// `poker_sweep_refreshes_total`, `poker_sweep_errors_total`
pub fn record_sweep(duration: Duration, evicted: usize, refreshed: usize, errors: usize) {
    histogram!("poker_sweep_duration_seconds").record(duration.as_secs_f64());
    counter!("poker_sweep_evictions_total").increment(evicted as u64);
    counter!("poker_sweep_refreshes_total").increment(refreshed as u64);
    counter!("poker_sweep_errors_total").increment(errors as u64);
}

/// Record a disconnect reconciliation.
///
/// Metric: `poker_disconnects_total`
/// Labels: `outcome` (offline, still_connected, not_participant, error)
pub fn record_disconnect(outcome: &'static str) {
    counter!("poker_disconnects_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    struct Captured {
        kind: MetricKind,
        name: String,
        labels: Vec<(String, String)>,
        value: DebugValue,
    }

    /// Run `record` against a thread-local debugging recorder.
    fn capture(record: impl FnOnce()) -> Vec<Captured> {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, record);

        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, value)| {
                let (kind, key) = key.into_parts();
                Captured {
                    kind,
                    name: key.name().to_string(),
                    labels: key
                        .labels()
                        .map(|l| (l.key().to_string(), l.value().to_string()))
                        .collect(),
                    value,
                }
            })
            .collect()
    }

    fn find<'a>(
        captured: &'a [Captured],
        name: &str,
        labels: &[(&str, &str)],
    ) -> Option<&'a Captured> {
        captured.iter().find(|c| {
            c.name == name
                && labels
                    .iter()
                    .all(|(k, v)| c.labels.iter().any(|(lk, lv)| lk == k && lv == v))
        })
    }

    fn counter(captured: &[Captured], name: &str, labels: &[(&str, &str)]) -> Option<u64> {
        match find(captured, name, labels).map(|c| &c.value) {
            Some(DebugValue::Counter(value)) => Some(*value),
            _ => None,
        }
    }

    fn histogram_len(captured: &[Captured], name: &str) -> usize {
        match find(captured, name, &[]).map(|c| &c.value) {
            Some(DebugValue::Histogram(values)) => values.len(),
            _ => 0,
        }
    }

    #[test]
    fn test_frame_counter_is_labelled_by_action_and_outcome() {
        let captured = capture(|| {
            record_frame("submit", "applied");
            record_frame("submit", "applied");
            record_frame("submit", "rejected");
            record_frame("unknown", "rebroadcast");
        });

        let applied = [("action", "submit"), ("outcome", "applied")];
        assert_eq!(counter(&captured, "poker_frames_total", &applied), Some(2));
        let rejected = [("action", "submit"), ("outcome", "rejected")];
        assert_eq!(counter(&captured, "poker_frames_total", &rejected), Some(1));
        let rebroadcast = [("action", "unknown"), ("outcome", "rebroadcast")];
        assert_eq!(counter(&captured, "poker_frames_total", &rebroadcast), Some(1));
        assert!(captured
            .iter()
            .filter(|c| c.name == "poker_frames_total")
            .all(|c| c.kind == MetricKind::Counter));
    }

    #[test]
    fn test_sweep_records_duration_and_counts() {
        let captured = capture(|| {
            record_sweep(Duration::from_millis(12), 2, 3, 0);
            record_sweep(Duration::from_millis(4), 1, 0, 1);
        });

        assert_eq!(histogram_len(&captured, "poker_sweep_duration_seconds"), 2);
        assert_eq!(counter(&captured, "poker_sweep_evictions_total", &[]), Some(3));
        assert_eq!(counter(&captured, "poker_sweep_refreshes_total", &[]), Some(3));
        assert_eq!(counter(&captured, "poker_sweep_errors_total", &[]), Some(1));
    }

    #[test]
    fn test_broadcast_drops_counted_only_when_present() {
        let captured = capture(|| record_broadcast(4, 0));
        assert_eq!(histogram_len(&captured, "poker_broadcast_fanout"), 1);
        assert!(find(&captured, "poker_broadcast_dropped_total", &[]).is_none());

        let captured = capture(|| {
            record_broadcast(4, 0);
            record_broadcast(3, 2);
        });
        assert_eq!(histogram_len(&captured, "poker_broadcast_fanout"), 2);
        assert_eq!(counter(&captured, "poker_broadcast_dropped_total", &[]), Some(2));
    }

    #[test]
    fn test_registry_size_gauges() {
        let captured = capture(|| set_registry_size(10, 3));
        let gauge = |name: &str| match find(&captured, name, &[]).map(|c| &c.value) {
            Some(DebugValue::Gauge(value)) => Some(value.into_inner()),
            _ => None,
        };
        assert_eq!(gauge("poker_connections_active"), Some(10.0));
        assert_eq!(gauge("poker_rooms_active"), Some(3.0));
    }

    #[test]
    fn test_ids_never_become_labels() {
        let captured = capture(|| {
            record_registration("success");
            record_unregistration("slow_consumer");
            record_disconnect("offline");
        });
        assert_eq!(
            counter(&captured, "poker_registrations_total", &[("result", "success")]),
            Some(1)
        );
        let allowed = ["result", "reason", "outcome", "action"];
        assert!(captured
            .iter()
            .flat_map(|c| c.labels.iter())
            .all(|(key, _)| allowed.contains(&key.as_str())));
    }
}
