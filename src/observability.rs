use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "slotwise_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "slotwise_query_duration_seconds";

// ── Scheduling metrics ──────────────────────────────────────────

/// Histogram: slots returned per availability query.
pub const SLOTS_OFFERED: &str = "slotwise_slots_offered";

/// Counter: appointments committed.
pub const BOOKINGS_TOTAL: &str = "slotwise_bookings_total";

/// Counter: booking attempts refused by a conflict. Labels: reason.
pub const BOOKING_CONFLICTS_TOTAL: &str = "slotwise_booking_conflicts_total";

/// Counter: reminder scan outcomes. Labels: outcome (sent, skipped, failed).
pub const REMINDERS_TOTAL: &str = "slotwise_reminders_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotwise_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotwise_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotwise_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "slotwise_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotwise_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotwise_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// A failed install is logged and the server keeps running without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SelectAvailability { .. } => "select_availability",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::UpdateAppointmentStatus { .. } => "update_appointment_status",
        Command::InsertRule(_) => "insert_rule",
        Command::UpdateRule { .. } => "update_rule",
        Command::DeleteRule { .. } => "delete_rule",
        Command::SelectRules => "select_rules",
        Command::InsertBlockOut(_) => "insert_block_out",
        Command::UpdateBlockOut { .. } => "update_block_out",
        Command::DeleteBlockOut { .. } => "delete_block_out",
        Command::SelectBlockOuts => "select_block_outs",
        Command::UpsertCustomer(_) => "upsert_customer",
        Command::SelectCustomers { .. } => "select_customers",
    }
}
