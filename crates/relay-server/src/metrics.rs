//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Fails if a global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// Procedure calls total (counter, labels: procedure, kind).
pub const RPC_REQUESTS_TOTAL: &str = "relay_rpc_requests_total";
/// Procedure errors total (counter, labels: procedure, code).
pub const RPC_ERRORS_TOTAL: &str = "relay_rpc_errors_total";
/// Unary call duration seconds (histogram, labels: procedure).
pub const RPC_REQUEST_DURATION_SECONDS: &str = "relay_rpc_request_duration_seconds";
/// SSE streams opened total (counter, labels: kind).
pub const SSE_STREAMS_TOTAL: &str = "relay_sse_streams_total";
/// Active SSE streams (gauge).
pub const SSE_STREAMS_ACTIVE: &str = "relay_sse_streams_active";
/// SSE data events written total (counter).
pub const SSE_EVENTS_TOTAL: &str = "relay_sse_events_total";
/// SSE heartbeats written total (counter).
pub const SSE_HEARTBEATS_TOTAL: &str = "relay_sse_heartbeats_total";
/// SSE streams ended by a disconnect-class failure (counter, labels: reason).
pub const SSE_DISCONNECTS_TOTAL: &str = "relay_sse_disconnects_total";
/// Terminal error envelopes written (counter, labels: code).
pub const SSE_ERRORS_TOTAL: &str = "relay_sse_errors_total";
/// Undelivered atom snapshots replaced by newer ones (counter).
pub const ATOM_COALESCED_TOTAL: &str = "relay_atom_coalesced_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_prefixed_snake_case() {
        let names = [
            RPC_REQUESTS_TOTAL,
            RPC_ERRORS_TOTAL,
            RPC_REQUEST_DURATION_SECONDS,
            SSE_STREAMS_TOTAL,
            SSE_STREAMS_ACTIVE,
            SSE_EVENTS_TOTAL,
            SSE_HEARTBEATS_TOTAL,
            SSE_DISCONNECTS_TOTAL,
            SSE_ERRORS_TOTAL,
            ATOM_COALESCED_TOTAL,
        ];
        for name in names {
            assert!(name.starts_with("relay_"), "{name}");
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{name}"
            );
        }
    }
}
