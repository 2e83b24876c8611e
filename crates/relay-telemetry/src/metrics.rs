//! Prometheus recorder install and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder as the global `metrics` recorder.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

// Metric name constants to avoid typos across crates.

/// Connections registered with the hub (counter).
pub const CONNECTIONS_TOTAL: &str = "relay_connections_total";
/// Connections removed from the hub (counter, labels: cause).
pub const DISCONNECTIONS_TOTAL: &str = "relay_disconnections_total";
/// Connections currently registered (gauge).
pub const CONNECTIONS_ACTIVE: &str = "relay_connections_active";
/// Frames from registered connections handled by the hub (counter).
pub const FRAMES_INBOUND_TOTAL: &str = "relay_frames_inbound_total";
/// Frames that arrived after their connection left the hub (counter).
pub const FRAMES_ORPHANED_TOTAL: &str = "relay_frames_orphaned_total";
/// Frames pushed onto outbound queues (counter, labels: cmd).
pub const FRAMES_ROUTED_TOTAL: &str = "relay_frames_routed_total";
/// Inbound frames discarded as undecodable (counter, labels: reason).
pub const DECODE_FAILURES_TOTAL: &str = "relay_decode_failures_total";
/// Connections evicted because their outbound queue was full (counter).
pub const BACKPRESSURE_EVICTIONS_TOTAL: &str = "relay_backpressure_evictions_total";
/// Conversations currently held (gauge).
pub const CONVERSATIONS_ACTIVE: &str = "relay_conversations_active";
/// Connection-fatal transport errors (counter, labels: kind).
pub const TRANSPORT_ERRORS_TOTAL: &str = "relay_transport_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_renders_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        assert!(!handle.render().contains("relay_"));
    }

    #[test]
    fn metric_names_are_prefixed_snake_case() {
        let names = [
            CONNECTIONS_TOTAL,
            DISCONNECTIONS_TOTAL,
            CONNECTIONS_ACTIVE,
            FRAMES_INBOUND_TOTAL,
            FRAMES_ORPHANED_TOTAL,
            FRAMES_ROUTED_TOTAL,
            DECODE_FAILURES_TOTAL,
            BACKPRESSURE_EVICTIONS_TOTAL,
            CONVERSATIONS_ACTIVE,
            TRANSPORT_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(name.starts_with("relay_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
