//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup; a second call fails because a recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Registered connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Inbound messages relayed (counter).
pub const RELAY_MESSAGES_TOTAL: &str = "relay_messages_total";
/// Frames that could not be queued for a recipient (counter, labels: reason).
pub const RELAY_SEND_FAILURES_TOTAL: &str = "relay_send_failures_total";
/// Suggestion batches delivered (counter).
pub const SUGGESTIONS_DELIVERED_TOTAL: &str = "suggestions_delivered_total";
/// Hide signals sent instead of suggestions (counter, labels: reason).
pub const SUGGESTIONS_SUPPRESSED_TOTAL: &str = "suggestions_suppressed_total";
/// Enrichment tasks currently running (gauge).
pub const ENRICHMENTS_IN_FLIGHT: &str = "enrichments_in_flight";
/// Generation requests total (counter, labels: backend).
pub const GENERATION_REQUESTS_TOTAL: &str = "generation_requests_total";
/// Generation errors total (counter, labels: backend, kind).
pub const GENERATION_ERRORS_TOTAL: &str = "generation_errors_total";
/// Generation request duration seconds (histogram, labels: backend).
pub const GENERATION_DURATION_SECONDS: &str = "generation_duration_seconds";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // Build a recorder + handle (no global install to avoid test conflicts).
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            RELAY_MESSAGES_TOTAL,
            RELAY_SEND_FAILURES_TOTAL,
            SUGGESTIONS_DELIVERED_TOTAL,
            SUGGESTIONS_SUPPRESSED_TOTAL,
            ENRICHMENTS_IN_FLIGHT,
            GENERATION_REQUESTS_TOTAL,
            GENERATION_ERRORS_TOTAL,
            GENERATION_DURATION_SECONDS,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "not snake_case: {name}"
            );
        }
    }
}
