use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "covers_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "covers_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "covers_connections_active";
pub const CONNECTIONS_TOTAL: &str = "covers_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "covers_connections_rejected_total";

/// Gauge: loaded tenant engines.
pub const TENANTS_ACTIVE: &str = "covers_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "covers_wal_flush_duration_seconds";

/// Histogram: events per WAL group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "covers_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: reservations placed on a table. Labels: path (create, update).
pub const RESERVATIONS_ASSIGNED_TOTAL: &str = "covers_reservations_assigned_total";

/// Counter: table searches that found nothing. Labels: reason.
pub const ASSIGNMENT_FAILURES_TOTAL: &str = "covers_assignment_failures_total";

/// Install the Prometheus exporter on `bind:port`. No-op without a port.
pub fn init(bind: &str, port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .unwrap_or_else(|_| ([0, 0, 0, 0], port).into());
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://{addr}/metrics");
    Ok(())
}

/// Short metric label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertRestaurant(_) => "insert_restaurant",
        Command::InsertTable(_) => "insert_table",
        Command::InsertCustomer(_) => "insert_customer",
        Command::InsertReservation(_) => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectRestaurants { .. } => "select_restaurants",
        Command::SelectTables { .. } | Command::SelectTable { .. } => "select_tables",
        Command::SelectCustomers { .. } => "select_customers",
        Command::SelectReservation { .. } => "select_reservation",
        Command::SelectReservationsForDate { .. } => "select_reservations_for_date",
        Command::SelectSchedule { .. } => "select_schedule",
        Command::SelectAvailableTables { .. } => "select_available_tables",
    }
}
