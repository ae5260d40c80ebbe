use std::net::SocketAddr;
use std::time::Duration;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::market_data::connection::ConnectionState;

/// Start the Prometheus HTTP exporter on `0.0.0.0:port`.
/// After this call, anything recorded through the helpers below is
/// exported at /metrics. Without it the `metrics` macros are no-ops.
pub fn init_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    Ok(())
}

// ── Stream metrics ───────────────────────────────────────────────

pub fn record_frame(topic: &str) {
    counter!("stream_frames_total", "topic" => topic.to_string()).increment(1);
}

pub fn record_decode_error() {
    counter!("stream_decode_errors_total").increment(1);
}

pub fn record_flow_events(kind: &str, count: usize) {
    counter!("flow_events_total", "kind" => kind.to_string()).increment(count as u64);
}

// ── Connection metrics ───────────────────────────────────────────

pub fn record_reconnect(delay: Duration) {
    counter!("stream_reconnects_total").increment(1);
    histogram!("stream_reconnect_delay_ms").record(delay.as_millis() as f64);
}

pub fn record_connection_state(state: ConnectionState) {
    let code = match state {
        ConnectionState::Idle => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Open => 2.0,
        ConnectionState::Closed => 3.0,
        ConnectionState::Error => 4.0,
    };
    gauge!("stream_connection_state").set(code);
}

// ── Watchlist metrics ────────────────────────────────────────────

pub fn record_watchlist_request(op: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!("watchlist_requests_total", "op" => op.to_string(), "outcome" => outcome).increment(1);
}
