use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total actions handled. Labels: action, status.
pub const ACTIONS_TOTAL: &str = "floorbook_actions_total";

/// Histogram: action latency in seconds. Labels: action.
pub const ACTION_DURATION_SECONDS: &str = "floorbook_action_duration_seconds";

/// Counter: actions rejected by the engine. Labels: action, kind.
pub const ACTION_ERRORS_TOTAL: &str = "floorbook_action_errors_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "floorbook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "floorbook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "floorbook_connections_rejected_total";

/// Counter: failed auth handshakes.
pub const AUTH_FAILURES_TOTAL: &str = "floorbook_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "floorbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "floorbook_wal_flush_batch_size";

/// Counter: journal compactions run by the background compactor.
pub const WAL_COMPACTIONS_TOTAL: &str = "floorbook_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a request to a short label for metrics.
pub fn action_label(req: &Request) -> &'static str {
    match req {
        Request::Auth { .. } => "auth",
        Request::Create { .. } => "create",
        Request::WalkIn { .. } => "walk_in",
        Request::CheckIn { .. } => "check_in",
        Request::Close { .. } => "close",
        Request::Cancel { .. } => "cancel",
        Request::Merge { .. } => "merge",
        Request::Split { .. } => "split",
        Request::Lock { .. } => "lock",
        Request::Unlock { .. } => "unlock",
        Request::Cell { .. } => "cell",
        Request::Booking { .. } => "booking",
        Request::Floor => "floor",
        Request::Summary => "summary",
        Request::Search { .. } => "search",
        Request::Locks => "locks",
    }
}
