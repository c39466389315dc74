use std::net::SocketAddr;

use crate::model::ReminderStatus;

// ── Detection ───────────────────────────────────────────────────

/// Counter: conflicts emitted by detection passes. Labels: category, severity.
pub const CONFLICTS_DETECTED_TOTAL: &str = "famsched_conflicts_detected_total";

/// Histogram: detection pass latency in seconds.
pub const DETECTION_DURATION_SECONDS: &str = "famsched_detection_duration_seconds";

/// Gauge: unresolved conflicts held in the ledger.
pub const CONFLICTS_OPEN: &str = "famsched_conflicts_open";

/// Counter: resolved conflicts purged after the audit window.
pub const CONFLICTS_PURGED_TOTAL: &str = "famsched_conflicts_purged_total";

// ── Reminders ───────────────────────────────────────────────────

/// Counter: reminders created. Labels: kind.
pub const REMINDERS_SCHEDULED_TOTAL: &str = "famsched_reminders_scheduled_total";

/// Counter: reminders dropped because their fire time had already passed.
pub const REMINDERS_DROPPED_TOTAL: &str = "famsched_reminders_dropped_total";

/// Counter: delivery attempts. Labels: kind, status.
pub const REMINDERS_DELIVERED_TOTAL: &str = "famsched_reminders_delivered_total";

/// Counter: reminders pushed out of the quiet-hours window.
pub const REMINDERS_DEFERRED_TOTAL: &str = "famsched_reminders_deferred_total";

/// Gauge: armed reminder timers.
pub const REMINDER_TIMERS_ACTIVE: &str = "famsched_reminder_timers_active";

// ── Inbox & persistence ─────────────────────────────────────────

/// Gauge: notifications currently in the in-app log.
pub const NOTIFICATIONS_STORED: &str = "famsched_notifications_stored";

/// Counter: notifications evicted by the capacity limit.
pub const NOTIFICATIONS_EVICTED_TOTAL: &str = "famsched_notifications_evicted_total";

/// Histogram: state-log group-commit flush duration in seconds.
pub const PERSIST_FLUSH_DURATION_SECONDS: &str = "famsched_persist_flush_duration_seconds";

/// Histogram: state-log batch size (records per flush).
pub const PERSIST_BATCH_SIZE: &str = "famsched_persist_batch_size";

/// Counter: failed saves. Labels: record.
pub const PERSIST_FAILURES_TOTAL: &str = "famsched_persist_failures_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
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

/// Short label for a delivery outcome.
pub fn status_label(status: ReminderStatus) -> &'static str {
    match status {
        ReminderStatus::Pending => "pending",
        ReminderStatus::Sent => "sent",
        ReminderStatus::Acknowledged => "acknowledged",
        ReminderStatus::Failed => "failed",
    }
}
