use std::net::SocketAddr;

use metrics_exporter_prometheus::BuildError;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "opsched_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "opsched_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "opsched_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "opsched_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "opsched_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "opsched_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "opsched_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "opsched_wal_flush_batch_size";

// ── Scheduling rule metrics ─────────────────────────────────────

/// Counter: reschedule attempts that reached validation. Labels: outcome (accepted, rejected).
pub const RESCHEDULES_TOTAL: &str = "opsched_reschedules_total";

/// Counter: rejected reschedules. Labels: kind.
pub const RULE_VIOLATIONS_TOTAL: &str = "opsched_rule_violations_total";

/// Counter: valid-slot searches. Labels: outcome (found, none).
pub const SLOT_SEARCHES_TOTAL: &str = "opsched_slot_searches_total";

/// Counter: WAL compactions. Labels: status.
pub const COMPACTIONS_TOTAL: &str = "opsched_compactions_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertWorkOrder { .. } => "insert_work_order",
        Command::DeleteWorkOrder { .. } => "delete_work_order",
        Command::InsertOperations { .. } => "insert_operations",
        Command::UpdateOperation { .. } => "update_operation",
        Command::SelectWorkOrders => "select_work_orders",
        Command::SelectOperations { .. } => "select_operations",
        Command::SelectValidation { .. } => "select_validation",
        Command::SelectValidSlot { .. } => "select_valid_slot",
        Command::SelectConstraints { .. } => "select_constraints",
        Command::SelectMachineConflicts { .. } => "select_machine_conflicts",
        Command::SelectSequenceCheck { .. } => "select_sequence_check",
        Command::SelectFloorConflicts => "select_floor_conflicts",
    }
}
