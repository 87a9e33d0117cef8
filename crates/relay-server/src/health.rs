//! `/health` endpoint.

use std::time::Instant;

use serde::Serialize;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: String,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Open SSE streams.
    pub active_streams: usize,
    /// Registered procedures.
    pub procedures: usize,
}

/// Build a health response from live counters.
pub fn health_check(start_time: Instant, active_streams: usize, procedures: usize) -> HealthResponse {
    HealthResponse {
        status: "ok".into(),
        uptime_secs: start_time.elapsed().as_secs(),
        active_streams,
        procedures,
    }
}
