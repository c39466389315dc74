use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::service::FamilyScheduler;

/// How often the reaper wakes up by default.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that purges resolved conflicts past their retention window
/// and sends the email digest when one is due.
pub async fn run_reaper(service: Arc<FamilyScheduler>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep(&service).await;
    }
}

/// One reaper pass. Returns how many conflicts were purged.
pub async fn sweep(service: &FamilyScheduler) -> usize {
    let purged = service.purge_resolved();
    match service.send_digest().await {
        Ok(true) => info!("digest delivered"),
        Ok(false) => {}
        Err(e) => {
            // Retried on the next pass.
            tracing::warn!("digest delivery failed: {e}");
        }
    }
    purged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::*;
    use crate::service::SchedulerConfig;
    use crate::sink::RecordingSink;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn event(id: &str, h: u32) -> Event {
        Event::new(
            id,
            PersonScope::person("alice"),
            id,
            NaiveDate::from_ymd_opt(2025, 1, 10).unwrap(),
            NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
            90,
        )
    }

    async fn service_with_resolved_conflict() -> (Arc<FamilyScheduler>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let service = FamilyScheduler::open(
            SchedulerConfig::default(),
            Arc::new(RecordingSink::new()),
            clock.clone(),
        )
        .await
        .unwrap();
        let a = event("a", 9);
        let b = event("b", 10);
        let conflicts = service.event_saved(&a, &[b], &[]).await;
        assert_eq!(conflicts.len(), 1);
        service.resolve_conflict(&conflicts[0].id).unwrap();
        (service, clock)
    }

    #[tokio::test]
    async fn sweep_purges_after_retention() {
        let (service, clock) = service_with_resolved_conflict().await;

        assert_eq!(sweep(&service).await, 0);
        clock.advance(chrono::Duration::hours(25));
        assert_eq!(sweep(&service).await, 1);
        assert!(service.ledger().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_loop_runs_periodically() {
        let (service, clock) = service_with_resolved_conflict().await;
        clock.advance(chrono::Duration::hours(25));

        let handle = tokio::spawn(run_reaper(service.clone(), Duration::from_secs(5)));
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(service.ledger().is_empty());
        handle.abort();
    }
}
