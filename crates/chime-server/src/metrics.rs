//! Prometheus recorder and metric names.
//!
//! Code records through the `metrics` facade using the constants below;
//! `/metrics` renders whatever the installed recorder has collected.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Fails if another global recorder is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Prometheus text exposition of everything recorded so far.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Sockets accepted (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "chime_ws_connections_total";
/// Sockets closed (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "chime_ws_disconnections_total";
/// Sockets currently registered (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "chime_ws_connections_active";
/// Socket lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "chime_ws_connection_duration_seconds";
/// Upgrades refused by the admission limit (counter).
pub const WS_CONNECTIONS_REJECTED_TOTAL: &str = "chime_ws_connections_rejected_total";
/// Inbound frames that failed to decode (counter).
pub const PROTOCOL_ERRORS_TOTAL: &str = "chime_protocol_errors_total";
/// Out-of-band sends that timed out or hit a closed queue (counter).
pub const OOB_SEND_FAILURES_TOTAL: &str = "chime_oob_send_failures_total";
/// User turns finished (counter, labels: outcome).
pub const TURNS_TOTAL: &str = "chime_turns_total";
/// User turn duration in seconds (histogram).
pub const TURN_DURATION_SECONDS: &str = "chime_turn_duration_seconds";
/// Error frames sent to clients (counter, labels: code).
pub const ERROR_FRAMES_TOTAL: &str = "chime_error_frames_total";
