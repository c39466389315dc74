mod error;
#[cfg(test)]
mod tests;

pub use error::ReminderError;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::NaiveDateTime;
use dashmap::DashMap;
use serde_json::{json, Map};
use ulid::Ulid;

use crate::clock::Clock;
use crate::inbox::NotificationStore;
use crate::model::*;
use crate::notify::{NotifyHub, ServiceEvent};
use crate::observability::status_label;
use crate::persist::Persister;
use crate::settings::SettingsStore;
use crate::sink::{DeliveryError, DeliveryPayload, DeliverySink, EmailEnvelope, EmailTemplate};
use crate::timer::TimerSet;
use crate::wal::Record;

const MISSED_WHILE_OFFLINE: &str = "missed while offline";

/// Everything the scheduler talks to.
pub struct ReminderDeps {
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<SettingsStore>,
    pub sink: Arc<dyn DeliverySink>,
    pub inbox: Arc<NotificationStore>,
    pub hub: Arc<NotifyHub>,
    pub persister: Persister,
}

/// Owns every reminder and the timer that will fire it.
pub struct ReminderScheduler {
    reminders: DashMap<Ulid, Reminder>,
    timers: TimerSet,
    /// Deliveries awaiting the sink, by fire token. Re-arming or cancelling
    /// drops the entry so a stale outcome is discarded.
    in_flight: DashMap<Ulid, u64>,
    next_token: AtomicU64,
    clock: Arc<dyn Clock>,
    settings: Arc<SettingsStore>,
    sink: Arc<dyn DeliverySink>,
    inbox: Arc<NotificationStore>,
    hub: Arc<NotifyHub>,
    persister: Persister,
    me: Weak<ReminderScheduler>,
}

impl ReminderScheduler {
    pub fn new(deps: ReminderDeps) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            reminders: DashMap::new(),
            timers: TimerSet::new(Some(crate::observability::REMINDER_TIMERS_ACTIVE)),
            in_flight: DashMap::new(),
            next_token: AtomicU64::new(0),
            clock: deps.clock,
            settings: deps.settings,
            sink: deps.sink,
            inbox: deps.inbox,
            hub: deps.hub,
            persister: deps.persister,
            me: me.clone(),
        })
    }

    // ── Scheduling ───────────────────────────────────────

    /// Replace the event's reminders with one per configured offset.
    /// Offsets whose fire time has already passed are dropped.
    pub async fn schedule_for_event(&self, event: &Event) -> Vec<Reminder> {
        self.cancel_matching(|r| r.event_id == event.id);

        let settings = self.settings.get().await;
        let Some(kind) = settings.reminder_kind() else {
            tracing::debug!(event = %event.id, "every delivery channel is off, no reminders");
            self.persist().await;
            return Vec::new();
        };

        let now = self.clock.now();
        let start = event.start_at();
        let mut created = Vec::new();
        for &offset in settings.offsets_for(event.category) {
            let scheduled_for = start - chrono::Duration::minutes(i64::from(offset));
            if scheduled_for <= now {
                metrics::counter!(crate::observability::REMINDERS_DROPPED_TOTAL).increment(1);
                continue;
            }
            let reminder = Reminder {
                id: Ulid::new(),
                event_id: event.id.clone(),
                offset_minutes: offset,
                scheduled_for,
                kind,
                status: ReminderStatus::Pending,
                retry_count: 0,
                sent_at: None,
                acknowledged_at: None,
                error: None,
                metadata: Some(metadata_for(event, offset)),
            };
            self.reminders.insert(reminder.id, reminder.clone());
            self.arm(reminder.id, scheduled_for);
            metrics::counter!(crate::observability::REMINDERS_SCHEDULED_TOTAL, "kind" => kind.as_str())
                .increment(1);
            created.push(reminder);
        }
        tracing::debug!(event = %event.id, reminders = created.len(), "reminders scheduled");
        self.persist().await;
        created
    }

    /// Remove every reminder of an event. Returns how many went.
    pub async fn cancel_for_event(&self, event_id: &str) -> usize {
        let removed = self.cancel_matching(|r| r.event_id == event_id);
        if removed > 0 {
            self.persist().await;
        }
        removed
    }

    /// Remove a reminder whatever its state. Cancelling twice is a no-op.
    pub async fn cancel(&self, id: Ulid) -> bool {
        self.timers.cancel(id);
        self.in_flight.remove(&id);
        let removed = self.reminders.remove(&id).is_some();
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Re-arm a reminder for `at`, clearing any delivery outcome.
    pub async fn reschedule(&self, id: Ulid, at: NaiveDateTime) -> Result<Reminder, ReminderError> {
        self.rearm(id, at, false).await
    }

    /// Like [`reschedule`](Self::reschedule), and counts the attempt.
    pub async fn retry(&self, id: Ulid, at: NaiveDateTime) -> Result<Reminder, ReminderError> {
        self.rearm(id, at, true).await
    }

    async fn rearm(&self, id: Ulid, at: NaiveDateTime, count_retry: bool) -> Result<Reminder, ReminderError> {
        if at <= self.clock.now() {
            return Err(ReminderError::InPast(at));
        }
        let updated = {
            let mut r = self.reminders.get_mut(&id).ok_or(ReminderError::NotFound(id))?;
            r.status = ReminderStatus::Pending;
            r.scheduled_for = at;
            r.sent_at = None;
            r.acknowledged_at = None;
            r.error = None;
            if count_retry {
                r.retry_count += 1;
            }
            self.in_flight.remove(&id);
            r.clone()
        };
        self.arm(id, at);
        self.persist().await;
        self.hub.send(ServiceEvent::ReminderStatusChanged {
            id,
            status: ReminderStatus::Pending,
        });
        Ok(updated)
    }

    /// The user interacted with a delivered reminder.
    pub async fn acknowledge(&self, id: Ulid) -> Result<Reminder, ReminderError> {
        let now = self.clock.now();
        let updated = {
            let mut r = self.reminders.get_mut(&id).ok_or(ReminderError::NotFound(id))?;
            if r.status != ReminderStatus::Sent {
                return Err(ReminderError::InvalidTransition {
                    id,
                    from: r.status,
                    to: ReminderStatus::Acknowledged,
                });
            }
            r.status = ReminderStatus::Acknowledged;
            r.acknowledged_at = Some(now);
            r.clone()
        };
        self.persist().await;
        self.hub.send(ServiceEvent::ReminderStatusChanged {
            id,
            status: ReminderStatus::Acknowledged,
        });

        let title = updated
            .metadata
            .as_ref()
            .map(|m| m.title.clone())
            .unwrap_or_else(|| updated.event_id.clone());
        let mut note = InAppNotification::new(
            NotificationKind::Acknowledgement,
            format!("Reminder acknowledged: {title}"),
            format!("You confirmed the reminder for \"{title}\"."),
            now,
        );
        note.priority = NotificationPriority::Low;
        note.related_event_id = Some(updated.event_id.clone());
        self.inbox.add(note).await;
        Ok(updated)
    }

    /// Load persisted reminders at startup. Pending reminders still ahead are
    /// re-armed; the ones whose time passed while the process was down fail.
    pub async fn restore(&self, reminders: Vec<Reminder>) {
        let now = self.clock.now();
        let mut armed = 0usize;
        let mut missed = 0usize;
        for mut reminder in reminders {
            if reminder.status == ReminderStatus::Pending {
                if reminder.scheduled_for > now {
                    self.arm(reminder.id, reminder.scheduled_for);
                    armed += 1;
                } else {
                    reminder.status = ReminderStatus::Failed;
                    reminder.error = Some(MISSED_WHILE_OFFLINE.to_string());
                    missed += 1;
                }
            }
            self.reminders.insert(reminder.id, reminder);
        }
        if missed > 0 {
            self.persist().await;
        }
        tracing::info!(armed, missed, total = self.reminders.len(), "reminders restored");
    }

    // ── Queries ──────────────────────────────────────────

    pub fn get(&self, id: Ulid) -> Option<Reminder> {
        self.reminders.get(&id).map(|r| r.clone())
    }

    /// An event's reminders, earliest first.
    pub fn for_event(&self, event_id: &str) -> Vec<Reminder> {
        self.sorted_where(|r| r.event_id == event_id)
    }

    /// Reminders still waiting to fire, earliest first.
    pub fn pending(&self) -> Vec<Reminder> {
        self.sorted_where(|r| r.status == ReminderStatus::Pending)
    }

    pub fn all(&self) -> Vec<Reminder> {
        self.sorted_where(|_| true)
    }

    pub fn armed_timers(&self) -> usize {
        self.timers.len()
    }

    fn sorted_where(&self, keep: impl Fn(&Reminder) -> bool) -> Vec<Reminder> {
        let mut out: Vec<Reminder> = self
            .reminders
            .iter()
            .filter(|r| keep(r))
            .map(|r| r.clone())
            .collect();
        out.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for).then(a.id.cmp(&b.id)));
        out
    }

    // ── Firing ───────────────────────────────────────────

    fn arm(&self, id: Ulid, at: NaiveDateTime) {
        let delay = (at - self.clock.now()).to_std().unwrap_or_default();
        let me = self.me.clone();
        self.timers.arm(id, delay, move |generation| async move {
            let Some(scheduler) = me.upgrade() else { return };
            if scheduler.timers.claim(id, generation) {
                scheduler.fire(id).await;
            }
        });
    }

    /// Deliver a due reminder, or push it past quiet hours.
    pub(crate) async fn fire(&self, id: Ulid) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        let reminder = {
            let Some(r) = self.reminders.get(&id) else { return };
            if r.status != ReminderStatus::Pending {
                return;
            }
            self.in_flight.insert(id, token);
            r.clone()
        };
        let settings = self.settings.get().await;
        let now = self.clock.now();

        if let Some(until) = settings.quiet_hours.defer_until(now) {
            {
                let Some(mut r) = self.reminders.get_mut(&id) else { return };
                if self
                    .in_flight
                    .remove_if(&id, |_, current| *current == token)
                    .is_none()
                {
                    return;
                }
                r.scheduled_for = until;
            }
            self.arm(id, until);
            self.persist().await;
            metrics::counter!(crate::observability::REMINDERS_DEFERRED_TOTAL).increment(1);
            tracing::debug!(reminder = %id, %until, "quiet hours, reminder deferred");
            return;
        }

        let kind = if reminder.kind == DeliveryKind::Push && !self.sink.push_permitted() {
            tracing::debug!(reminder = %id, "no push permission, delivering in-app");
            DeliveryKind::InApp
        } else {
            reminder.kind
        };
        let result = match payload_for(&reminder, kind, &settings.email.recipients) {
            Ok(payload) => self.sink.deliver(kind, &payload).await,
            Err(e) => Err(e),
        };

        let status = match &result {
            Ok(()) => ReminderStatus::Sent,
            Err(_) => ReminderStatus::Failed,
        };
        let updated = {
            let Some(mut r) = self.reminders.get_mut(&id) else {
                // Cancelled while the sink was busy.
                return;
            };
            // Re-armed while the sink was busy: the new timer owns it now.
            if self
                .in_flight
                .remove_if(&id, |_, current| *current == token)
                .is_none()
            {
                tracing::debug!(reminder = %id, "re-armed during delivery, outcome discarded");
                return;
            }
            r.kind = kind;
            r.status = status;
            match &result {
                Ok(()) => {
                    r.sent_at = Some(now);
                    r.error = None;
                }
                Err(e) => r.error = Some(e.to_string()),
            }
            r.clone()
        };
        metrics::counter!(
            crate::observability::REMINDERS_DELIVERED_TOTAL,
            "kind" => kind.as_str(),
            "status" => status_label(status)
        )
        .increment(1);
        match &result {
            Ok(()) => tracing::info!(reminder = %id, kind = kind.as_str(), "reminder delivered"),
            Err(e) => tracing::warn!(reminder = %id, kind = kind.as_str(), "reminder delivery failed: {e}"),
        }

        if result.is_ok() && kind == DeliveryKind::InApp {
            self.inbox.add(reminder_notification(&updated, now)).await;
        }
        self.persist().await;
        self.hub.send(ServiceEvent::ReminderStatusChanged { id, status });
    }

    fn cancel_matching(&self, matches: impl Fn(&Reminder) -> bool) -> usize {
        let ids: Vec<Ulid> = self
            .reminders
            .iter()
            .filter(|r| matches(r))
            .map(|r| r.id)
            .collect();
        for id in &ids {
            self.timers.cancel(*id);
            self.in_flight.remove(id);
            self.reminders.remove(id);
        }
        ids.len()
    }

    async fn persist(&self) {
        self.persister.save(Record::Reminders(self.all())).await;
    }
}

fn describe_offset(minutes: u32) -> String {
    let plural = |n: u32, unit: &str| {
        if n == 1 {
            format!("1 {unit}")
        } else {
            format!("{n} {unit}s")
        }
    };
    if minutes >= 1440 && minutes % 1440 == 0 {
        plural(minutes / 1440, "day")
    } else if minutes >= 60 && minutes % 60 == 0 {
        plural(minutes / 60, "hour")
    } else {
        plural(minutes, "minute")
    }
}

fn metadata_for(event: &Event, offset: u32) -> ReminderMetadata {
    let mut body = format!(
        "Starts in {} at {}",
        describe_offset(offset),
        event.start.format("%H:%M")
    );
    if let Some(location) = event.location() {
        body.push_str(&format!(" ({location})"));
    }
    ReminderMetadata {
        title: event.title.clone(),
        body,
        icon: None,
        tag: Some(format!("event-{}", event.id)),
        payload: Some(json!({ "eventId": event.id, "person": event.person.as_str() })),
    }
}

fn payload_for(
    reminder: &Reminder,
    kind: DeliveryKind,
    recipients: &[String],
) -> Result<DeliveryPayload, DeliveryError> {
    let (title, body, icon, tag, data) = match &reminder.metadata {
        Some(m) => (m.title.clone(), m.body.clone(), m.icon.clone(), m.tag.clone(), m.payload.clone()),
        None => (reminder.event_id.clone(), String::new(), None, None, None),
    };
    if kind != DeliveryKind::Email {
        return Ok(DeliveryPayload::Notification { title, body, icon, tag, data });
    }
    if recipients.is_empty() {
        return Err(DeliveryError::Rejected("no email recipients configured".into()));
    }
    let mut fields = Map::new();
    fields.insert("title".into(), json!(title));
    fields.insert("body".into(), json!(body));
    fields.insert("eventId".into(), json!(reminder.event_id));
    fields.insert("scheduledFor".into(), json!(reminder.scheduled_for));
    Ok(DeliveryPayload::Email(EmailEnvelope {
        template: EmailTemplate::Reminder,
        data: fields,
        recipients: recipients.to_vec(),
    }))
}

fn reminder_notification(reminder: &Reminder, now: NaiveDateTime) -> InAppNotification {
    let (title, body) = match &reminder.metadata {
        Some(m) => (m.title.clone(), m.body.clone()),
        None => (reminder.event_id.clone(), String::new()),
    };
    let mut note = InAppNotification::new(NotificationKind::Reminder, title, body, now);
    note.priority = NotificationPriority::High;
    note.action_required = true;
    note.related_event_id = Some(reminder.event_id.clone());
    note.actions = vec![
        NotificationAction::new(format!("acknowledge:{}", reminder.id), "Got it"),
        NotificationAction::new(format!("snooze:{}", reminder.id), "Snooze"),
    ];
    note
}
