use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: bookings created. Labels: none.
pub const BOOKINGS_CREATED_TOTAL: &str = "rentd_bookings_created_total";

/// Counter: booking requests rejected as unavailable.
pub const BOOKING_CONFLICTS_TOTAL: &str = "rentd_booking_conflicts_total";

/// Counter: successful status transitions. Labels: status.
pub const STATUS_CHANGES_TOTAL: &str = "rentd_status_changes_total";

/// Counter: notifications written. Labels: kind.
pub const NOTIFICATIONS_EMITTED_TOTAL: &str = "rentd_notifications_emitted_total";

/// Counter: notification writes that failed (best-effort path).
pub const NOTIFICATION_FAILURES_TOTAL: &str = "rentd_notification_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: vehicles in the catalog.
pub const VEHICLES_ACTIVE: &str = "rentd_vehicles_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentd_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentd_wal_flush_batch_size";

/// Install the Prometheus metrics exporter on the given port. No-op if `None`.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Install the default fmt tracing subscriber. For embedders that don't
/// bring their own.
pub fn init_tracing() {
    tracing_subscriber::fmt::init();
}
