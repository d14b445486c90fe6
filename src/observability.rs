use std::net::SocketAddr;

use crate::command::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const COMMANDS_TOTAL: &str = "activityhub_commands_total";

/// Histogram: command latency in seconds. Labels: command.
pub const COMMAND_DURATION_SECONDS: &str = "activityhub_command_duration_seconds";

/// Counter: eligibility outcomes of write attempts. Labels: kind, outcome.
pub const REGISTRATIONS_TOTAL: &str = "activityhub_registrations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: open client connections.
pub const CONNECTIONS_ACTIVE: &str = "activityhub_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "activityhub_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "activityhub_connections_rejected_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
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
        Command::CreateActivity { .. } => "create_activity",
        Command::UpdateActivity { .. } => "update_activity",
        Command::DeleteActivity { .. } => "delete_activity",
        Command::GetActivity { .. } => "get_activity",
        Command::ListActivities { .. } => "list_activities",
        Command::UpsertUser { .. } => "upsert_user",
        Command::Evaluate { .. } => "evaluate",
        Command::Register { .. } => "register",
        Command::Cancel { .. } => "cancel",
        Command::Match { .. } => "match",
        Command::Available { .. } => "available",
        Command::Bookings { .. } => "bookings",
        Command::Quota { .. } => "quota",
        Command::Subscribe { .. } => "subscribe",
        Command::Dashboard => "dashboard",
        Command::WeeklyTrends { .. } => "weekly_trends",
        Command::Attendance { .. } => "attendance",
        Command::ProgramBreakdown { .. } => "program_breakdown",
        Command::RangeReport { .. } => "range_report",
    }
}
