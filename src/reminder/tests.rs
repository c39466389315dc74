use super::*;
use crate::clock::ManualClock;
use crate::inbox::NotificationFilter;
use crate::settings::{NotificationSettings, SettingsStore};
use crate::sink::RecordingSink;
use chrono::{NaiveDate, NaiveTime};

struct Harness {
    scheduler: Arc<ReminderScheduler>,
    clock: Arc<ManualClock>,
    sink: Arc<RecordingSink>,
    inbox: Arc<NotificationStore>,
}

fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 1, day)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn harness_with(sink: RecordingSink, settings: NotificationSettings) -> Harness {
    let clock = Arc::new(ManualClock::new(at(10, 8, 0)));
    let sink = Arc::new(sink);
    let hub = Arc::new(NotifyHub::new());
    let inbox = NotificationStore::new(Vec::new(), clock.clone(), Persister::disabled(), hub.clone());
    let scheduler = ReminderScheduler::new(ReminderDeps {
        clock: clock.clone(),
        settings: Arc::new(SettingsStore::new(settings, Persister::disabled())),
        sink: sink.clone(),
        inbox: inbox.clone(),
        hub,
        persister: Persister::disabled(),
    });
    Harness {
        scheduler,
        clock,
        sink,
        inbox,
    }
}

fn harness() -> Harness {
    harness_with(RecordingSink::new(), NotificationSettings::default())
}

fn event(id: &str, category: EventCategory, day: u32, h: u32, m: u32) -> Event {
    Event::new(
        id,
        PersonScope::person("alice"),
        format!("{id} title"),
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap(),
        NaiveTime::from_hms_opt(h, m, 0).unwrap(),
        60,
    )
    .with_category(category)
}

// ── Scheduling ───────────────────────────────────────────

#[tokio::test]
async fn past_offsets_are_dropped() {
    let h = harness();
    // Appointment offsets are a day and an hour; the day-before one is already gone.
    let created = h
        .scheduler
        .schedule_for_event(&event("dentist", EventCategory::Appointment, 10, 10, 0))
        .await;
    assert_eq!(created.len(), 1);
    let r = &created[0];
    assert_eq!(r.offset_minutes, 60);
    assert_eq!(r.scheduled_for, at(10, 9, 0));
    assert_eq!(r.kind, DeliveryKind::Push);
    assert_eq!(r.status, ReminderStatus::Pending);
    assert_eq!(r.metadata.as_ref().unwrap().title, "dentist title");
    assert!(r.metadata.as_ref().unwrap().body.contains("1 hour"));
    assert_eq!(h.scheduler.armed_timers(), 1);
}

#[tokio::test]
async fn event_entirely_in_past_gets_nothing() {
    let h = harness();
    let created = h
        .scheduler
        .schedule_for_event(&event("gone", EventCategory::Work, 9, 10, 0))
        .await;
    assert!(created.is_empty());
    assert!(h.scheduler.pending().is_empty());
    assert_eq!(h.scheduler.armed_timers(), 0);
}

#[tokio::test]
async fn scheduling_again_replaces_the_set() {
    let h = harness();
    let e = event("standup", EventCategory::Work, 10, 10, 0);
    let first = h.scheduler.schedule_for_event(&e).await;
    let second = h.scheduler.schedule_for_event(&e).await;
    assert_ne!(first[0].id, second[0].id);
    let all = h.scheduler.for_event("standup");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].id, second[0].id);
    assert_eq!(h.scheduler.armed_timers(), 1);
}

#[tokio::test]
async fn no_channels_no_reminders() {
    let mut settings = NotificationSettings::default();
    settings.channels.push = false;
    settings.channels.in_app = false;
    settings.channels.email = false;
    let h = harness_with(RecordingSink::new(), settings);
    let created = h
        .scheduler
        .schedule_for_event(&event("e", EventCategory::Work, 10, 10, 0))
        .await;
    assert!(created.is_empty());
}

#[tokio::test]
async fn in_app_channel_when_push_is_off() {
    let mut settings = NotificationSettings::default();
    settings.channels.push = false;
    let h = harness_with(RecordingSink::new(), settings);
    let created = h
        .scheduler
        .schedule_for_event(&event("e", EventCategory::Work, 10, 10, 0))
        .await;
    assert_eq!(created[0].kind, DeliveryKind::InApp);
}

// ── Firing ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn fires_when_due() {
    let h = harness();
    let created = h
        .scheduler
        .schedule_for_event(&event("standup", EventCategory::Work, 10, 10, 0))
        .await;
    let id = created[0].id;
    assert_eq!(created[0].scheduled_for, at(10, 9, 45));

    h.clock.set(at(10, 9, 45));
    tokio::time::sleep(std::time::Duration::from_secs(2 * 3600)).await;

    let r = h.scheduler.get(id).unwrap();
    assert_eq!(r.status, ReminderStatus::Sent);
    assert_eq!(r.sent_at, Some(at(10, 9, 45)));
    assert_eq!(h.sink.count(DeliveryKind::Push), 1);
    assert_eq!(h.scheduler.armed_timers(), 0);
}

#[tokio::test(start_paused = true)]
async fn rearmed_twice_fires_once() {
    let h = harness();
    let created = h
        .scheduler
        .schedule_for_event(&event("standup", EventCategory::Work, 10, 10, 0))
        .await;
    let id = created[0].id;
    h.scheduler.reschedule(id, at(10, 9, 0)).await.unwrap();
    h.scheduler.reschedule(id, at(10, 9, 30)).await.unwrap();
    assert_eq!(h.scheduler.armed_timers(), 1);

    tokio::time::sleep(std::time::Duration::from_secs(3 * 3600)).await;
    assert_eq!(h.sink.count(DeliveryKind::Push), 1);
}

#[tokio::test]
async fn quiet_hours_defer_to_window_end() {
    let mut settings = NotificationSettings::default();
    settings.quiet_hours.enabled = true;
    let h = harness_with(RecordingSink::new(), settings);
    // `other` uses the 30 minute fallback: fires at 23:00.
    let created = h
        .scheduler
        .schedule_for_event(&event("late", EventCategory::Other, 10, 23, 30))
        .await;
    let id = created[0].id;
    assert_eq!(created[0].scheduled_for, at(10, 23, 0));

    h.clock.set(at(10, 23, 0));
    h.scheduler.fire(id).await;
    let r = h.scheduler.get(id).unwrap();
    assert_eq!(r.status, ReminderStatus::Pending);
    assert_eq!(r.scheduled_for, at(11, 7, 0));
    assert_eq!(h.sink.deliveries().len(), 0);
    assert_eq!(h.scheduler.armed_timers(), 1);

    h.clock.set(at(11, 7, 0));
    h.scheduler.fire(id).await;
    assert_eq!(h.scheduler.get(id).unwrap().status, ReminderStatus::Sent);
    assert_eq!(h.sink.deliveries().len(), 1);
}

#[tokio::test]
async fn missing_push_permission_falls_back_to_in_app() {
    let h = harness_with(RecordingSink::without_push_permission(), NotificationSettings::default());
    let created = h
        .scheduler
        .schedule_for_event(&event("standup", EventCategory::Work, 10, 10, 0))
        .await;
    let id = created[0].id;
    assert_eq!(created[0].kind, DeliveryKind::Push, "recorded even without permission");

    h.clock.set(at(10, 9, 45));
    h.scheduler.fire(id).await;

    let r = h.scheduler.get(id).unwrap();
    assert_eq!(r.status, ReminderStatus::Sent);
    assert_eq!(r.kind, DeliveryKind::InApp);
    assert_eq!(h.sink.count(DeliveryKind::Push), 0);
    assert_eq!(h.sink.count(DeliveryKind::InApp), 1);

    let notes = h.inbox.list(&NotificationFilter::default()).await;
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].kind, NotificationKind::Reminder);
    assert_eq!(notes[0].related_event_id.as_deref(), Some("standup"));
}

#[tokio::test]
async fn failure_is_terminal_until_retried() {
    let h = harness();
    h.sink.fail(DeliveryKind::Push, true);
    let created = h
        .scheduler
        .schedule_for_event(&event("standup", EventCategory::Work, 10, 10, 0))
        .await;
    let id = created[0].id;

    h.clock.set(at(10, 9, 45));
    h.scheduler.fire(id).await;
    let r = h.scheduler.get(id).unwrap();
    assert_eq!(r.status, ReminderStatus::Failed);
    assert!(r.error.as_deref().unwrap().contains("push"));

    // A failed reminder does not fire again by itself.
    h.scheduler.fire(id).await;
    assert_eq!(h.sink.deliveries().len(), 0);

    h.sink.fail(DeliveryKind::Push, false);
    let retried = h.scheduler.retry(id, at(10, 9, 50)).await.unwrap();
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.status, ReminderStatus::Pending);
    assert_eq!(retried.error, None);

    h.clock.set(at(10, 9, 50));
    h.scheduler.fire(id).await;
    assert_eq!(h.scheduler.get(id).unwrap().status, ReminderStatus::Sent);
}

#[tokio::test]
async fn email_without_recipients_fails() {
    let mut settings = NotificationSettings::default();
    settings.channels.push = false;
    settings.channels.in_app = false;
    settings.channels.email = true;
    let h = harness_with(RecordingSink::new(), settings);
    let created = h
        .scheduler
        .schedule_for_event(&event("e", EventCategory::Work, 10, 10, 0))
        .await;
    assert_eq!(created[0].kind, DeliveryKind::Email);
    h.clock.set(at(10, 9, 45));
    h.scheduler.fire(created[0].id).await;
    let r = h.scheduler.get(created[0].id).unwrap();
    assert_eq!(r.status, ReminderStatus::Failed);
    assert!(r.error.unwrap().contains("recipients"));
}

#[tokio::test]
async fn email_reminder_uses_envelope() {
    let mut settings = NotificationSettings::default();
    settings.channels.push = false;
    settings.channels.in_app = false;
    settings.channels.email = true;
    settings.email.recipients = vec!["mum@example.com".into()];
    let h = harness_with(RecordingSink::new(), settings);
    let created = h
        .scheduler
        .schedule_for_event(&event("e", EventCategory::Work, 10, 10, 0))
        .await;
    h.clock.set(at(10, 9, 45));
    h.scheduler.fire(created[0].id).await;

    let deliveries = h.sink.deliveries();
    assert_eq!(deliveries.len(), 1);
    let DeliveryPayload::Email(envelope) = &deliveries[0].1 else {
        panic!("expected an email payload");
    };
    assert_eq!(envelope.template, EmailTemplate::Reminder);
    assert_eq!(envelope.recipients, vec!["mum@example.com".to_string()]);
    assert_eq!(envelope.data["eventId"], "e");
}

/// Holds the first delivery until the test opens the gate.
struct GatedSink {
    entered: tokio::sync::Notify,
    gate: tokio::sync::Semaphore,
    calls: std::sync::atomic::AtomicUsize,
}

#[async_trait::async_trait]
impl DeliverySink for GatedSink {
    async fn deliver(&self, _kind: DeliveryKind, _payload: &DeliveryPayload) -> Result<(), DeliveryError> {
        let call = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if call == 0 {
            self.entered.notify_one();
            let _permit = self.gate.acquire().await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn rescheduled_during_delivery_stays_pending() {
    let clock = Arc::new(ManualClock::new(at(10, 8, 0)));
    let sink = Arc::new(GatedSink {
        entered: tokio::sync::Notify::new(),
        gate: tokio::sync::Semaphore::new(0),
        calls: std::sync::atomic::AtomicUsize::new(0),
    });
    let hub = Arc::new(NotifyHub::new());
    let inbox = NotificationStore::new(Vec::new(), clock.clone(), Persister::disabled(), hub.clone());
    let scheduler = ReminderScheduler::new(ReminderDeps {
        clock: clock.clone(),
        settings: Arc::new(SettingsStore::new(
            NotificationSettings::default(),
            Persister::disabled(),
        )),
        sink: sink.clone(),
        inbox,
        hub,
        persister: Persister::disabled(),
    });
    let created = scheduler
        .schedule_for_event(&event("standup", EventCategory::Work, 10, 10, 0))
        .await;
    let id = created[0].id;

    clock.set(at(10, 9, 45));
    let firing = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.fire(id).await })
    };
    sink.entered.notified().await;

    let moved = scheduler.reschedule(id, at(10, 12, 0)).await.unwrap();
    assert_eq!(moved.status, ReminderStatus::Pending);
    sink.gate.add_permits(1);
    firing.await.unwrap();

    let r = scheduler.get(id).unwrap();
    assert_eq!(r.status, ReminderStatus::Pending);
    assert_eq!(r.scheduled_for, at(10, 12, 0));
    assert_eq!(r.sent_at, None);
    assert_eq!(scheduler.armed_timers(), 1);

    clock.set(at(10, 12, 0));
    scheduler.fire(id).await;
    assert_eq!(scheduler.get(id).unwrap().status, ReminderStatus::Sent);
    assert_eq!(sink.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn acknowledge_only_after_sent() {
    let h = harness();
    let created = h
        .scheduler
        .schedule_for_event(&event("standup", EventCategory::Work, 10, 10, 0))
        .await;
    let id = created[0].id;

    assert_eq!(
        h.scheduler.acknowledge(id).await,
        Err(ReminderError::InvalidTransition {
            id,
            from: ReminderStatus::Pending,
            to: ReminderStatus::Acknowledged,
        })
    );

    h.clock.set(at(10, 9, 45));
    h.scheduler.fire(id).await;
    h.clock.set(at(10, 9, 47));
    let r = h.scheduler.acknowledge(id).await.unwrap();
    assert_eq!(r.status, ReminderStatus::Acknowledged);
    assert_eq!(r.acknowledged_at, Some(at(10, 9, 47)));

    let acks = h
        .inbox
        .list(&NotificationFilter {
            kind: Some(NotificationKind::Acknowledgement),
            ..Default::default()
        })
        .await;
    assert_eq!(acks.len(), 1);
}

#[tokio::test]
async fn cancel_is_idempotent() {
    let h = harness();
    let created = h
        .scheduler
        .schedule_for_event(&event("dentist", EventCategory::Appointment, 12, 10, 0))
        .await;
    assert_eq!(created.len(), 2);
    assert!(h.scheduler.cancel(created[0].id).await);
    assert!(!h.scheduler.cancel(created[0].id).await);
    assert_eq!(h.scheduler.armed_timers(), 1);

    assert_eq!(h.scheduler.cancel_for_event("dentist").await, 1);
    assert_eq!(h.scheduler.cancel_for_event("dentist").await, 0);
    assert_eq!(h.scheduler.armed_timers(), 0);
}

#[tokio::test]
async fn reschedule_rejects_past_and_unknown() {
    let h = harness();
    let created = h
        .scheduler
        .schedule_for_event(&event("standup", EventCategory::Work, 10, 10, 0))
        .await;
    let past = at(10, 7, 0);
    assert_eq!(
        h.scheduler.reschedule(created[0].id, past).await,
        Err(ReminderError::InPast(past))
    );
    let missing = Ulid::new();
    assert_eq!(
        h.scheduler.reschedule(missing, at(10, 9, 0)).await,
        Err(ReminderError::NotFound(missing))
    );
}

#[tokio::test]
async fn restore_rearms_future_and_fails_missed() {
    let h = harness();
    let base = |scheduled_for, status| Reminder {
        id: Ulid::new(),
        event_id: "e".into(),
        offset_minutes: 15,
        scheduled_for,
        kind: DeliveryKind::Push,
        status,
        retry_count: 0,
        sent_at: None,
        acknowledged_at: None,
        error: None,
        metadata: None,
    };
    let future = base(at(10, 12, 0), ReminderStatus::Pending);
    let missed = base(at(10, 7, 0), ReminderStatus::Pending);
    let sent = base(at(10, 6, 0), ReminderStatus::Sent);

    h.scheduler
        .restore(vec![future.clone(), missed.clone(), sent.clone()])
        .await;

    assert_eq!(h.scheduler.armed_timers(), 1);
    assert_eq!(h.scheduler.pending(), vec![future]);
    let missed = h.scheduler.get(missed.id).unwrap();
    assert_eq!(missed.status, ReminderStatus::Failed);
    assert_eq!(missed.error.as_deref(), Some("missed while offline"));
    assert_eq!(h.scheduler.get(sent.id).unwrap(), sent);
    assert_eq!(h.scheduler.all().len(), 3);
}

#[test]
fn offsets_read_naturally() {
    assert_eq!(describe_offset(1440), "1 day");
    assert_eq!(describe_offset(2880), "2 days");
    assert_eq!(describe_offset(60), "1 hour");
    assert_eq!(describe_offset(90), "90 minutes");
    assert_eq!(describe_offset(1), "1 minute");
}
