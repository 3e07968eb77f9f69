use std::net::SocketAddr;

use crate::sql::Command;

// Request-side (RED) metrics.

/// Counter of executed statements, labelled by command and status.
pub const QUERIES_TOTAL: &str = "slotd_queries_total";

/// Statement latency histogram in seconds, labelled by command.
pub const QUERY_DURATION_SECONDS: &str = "slotd_query_duration_seconds";

/// Reservation attempts rejected by the conflict or travel check.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotd_booking_conflicts_total";

// Resource-side (USE) metrics.

/// Currently open client connections.
pub const CONNECTIONS_ACTIVE: &str = "slotd_connections_active";

/// Connections accepted over the process lifetime.
pub const CONNECTIONS_TOTAL: &str = "slotd_connections_total";

/// Connections turned away at the limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotd_connections_rejected_total";

/// Tenants with a loaded engine.
pub const TENANTS_ACTIVE: &str = "slotd_tenants_active";

/// Seconds spent per WAL group-commit fsync.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotd_wal_flush_duration_seconds";

/// Events written per WAL group-commit batch.
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotd_wal_flush_batch_size";

/// Start the Prometheus exporter, or do nothing when no port is configured.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("serving metrics at http://0.0.0.0:{port}/metrics");
}

/// Short per-command label for the RED counters.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertService { .. } => "insert_service",
        Command::SetServiceActive { .. } => "set_service_active",
        Command::DeleteService { .. } => "delete_service",
        Command::InsertStaff { .. } => "insert_staff",
        Command::SetStaffActive { .. } => "set_staff_active",
        Command::DeleteStaff { .. } => "delete_staff",
        Command::InsertStaffHours { .. } => "insert_staff_hours",
        Command::DeleteStaffHours { .. } => "delete_staff_hours",
        Command::InsertTimeOff { .. } => "insert_time_off",
        Command::DeleteTimeOff { .. } => "delete_time_off",
        Command::InsertBusinessHours { .. } => "insert_business_hours",
        Command::DeleteBusinessHours { .. } => "delete_business_hours",
        Command::InsertServiceArea { .. } => "insert_service_area",
        Command::DeleteServiceArea { .. } => "delete_service_area",
        Command::InsertSettings { .. } => "insert_settings",
        Command::InsertBooking { .. } => "insert_booking",
        Command::SetBookingStatus { .. } => "set_booking_status",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectServices => "select_services",
        Command::SelectStaff => "select_staff",
        Command::SelectAreas => "select_areas",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
