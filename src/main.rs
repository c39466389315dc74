use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::info;

use famsched::clock::SystemClock;
use famsched::model::{Event, Person};
use famsched::reaper::{run_reaper, REAPER_INTERVAL};
use famsched::service::{FamilyScheduler, SchedulerConfig};
use famsched::sink::TracingSink;

/// The calendar file handed over by the calendar subsystem.
#[derive(Debug, Default, Deserialize)]
struct CalendarFile {
    #[serde(default)]
    people: Vec<Person>,
    #[serde(default)]
    events: Vec<Event>,
}

fn load_calendar(path: &Path) -> Result<CalendarFile, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("FAMSCHED_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    famsched::observability::init(metrics_port);

    let data_dir = std::env::var("FAMSCHED_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let calendar_path = std::env::var("FAMSCHED_CALENDAR").ok().map(PathBuf::from);
    let compact_threshold: u64 = std::env::var("FAMSCHED_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(famsched::limits::DEFAULT_COMPACT_THRESHOLD);
    let retention_hours: i64 = std::env::var("FAMSCHED_CONFLICT_RETENTION_HOURS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(famsched::limits::DEFAULT_CONFLICT_RETENTION_HOURS);

    std::fs::create_dir_all(&data_dir)?;

    let config = SchedulerConfig {
        compact_threshold,
        conflict_retention: chrono::Duration::hours(retention_hours),
        ..SchedulerConfig::persistent(&data_dir)
    };
    let service = FamilyScheduler::open(
        config,
        Arc::new(TracingSink { push_permitted: true }),
        Arc::new(SystemClock),
    )
    .await?;

    info!("famsched started");
    info!("  data_dir: {data_dir}");
    info!("  compact_threshold: {compact_threshold}");
    info!("  conflict_retention: {retention_hours}h");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let calendar = match &calendar_path {
        Some(path) => match load_calendar(path) {
            Ok(calendar) => calendar,
            Err(e) => {
                tracing::error!("failed to load calendar {}: {e}", path.display());
                CalendarFile::default()
            }
        },
        None => CalendarFile::default(),
    };
    let mut total = 0usize;
    for event in &calendar.events {
        total += service
            .event_saved(event, &calendar.events, &calendar.people)
            .await
            .len();
    }
    info!(
        events = calendar.events.len(),
        people = calendar.people.len(),
        conflicts = total,
        open = service.ledger().active().len(),
        pending_reminders = service.reminders().pending().len(),
        "calendar loaded"
    );

    let reaper = tokio::spawn(run_reaper(service.clone(), REAPER_INTERVAL));

    // Reminders fire from their own tasks; just wait for SIGTERM/ctrl-c.
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("shutdown signal received");
    reaper.abort();
    info!("famsched stopped");
    Ok(())
}
