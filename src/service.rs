use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use serde_json::{json, Map, Value};

use crate::clock::Clock;
use crate::detect::{
    suggest, ConflictDetector, ConflictLedger, KeywordEstimator, Rule, RuleCatalog, SuggestOptions,
    TravelTimeEstimator,
};
use crate::inbox::{NotificationFilter, NotificationStore};
use crate::limits::{DEFAULT_COMPACT_THRESHOLD, DEFAULT_CONFLICT_RETENTION_HOURS};
use crate::model::*;
use crate::notify::{NotifyHub, ServiceEvent};
use crate::persist::{PersistedState, Persister};
use crate::reminder::{ReminderDeps, ReminderScheduler};
use crate::settings::{EmailCadence, NotificationSettings, SettingsError, SettingsPatch, SettingsStore};
use crate::sink::{DeliveryError, DeliveryPayload, DeliverySink, EmailEnvelope, EmailTemplate};

/// Name of the state log inside the data directory.
pub const STATE_LOG_FILE: &str = "famsched.wal";

/// Startup configuration for [`FamilyScheduler::open`].
pub struct SchedulerConfig {
    /// Where the state log lives. `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    pub compact_threshold: u64,
    /// How long resolved conflicts are kept before the reaper drops them.
    pub conflict_retention: Duration,
    pub rules: Vec<Rule>,
    pub estimator: Arc<dyn TravelTimeEstimator>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            conflict_retention: Duration::hours(DEFAULT_CONFLICT_RETENTION_HOURS),
            rules: RuleCatalog::default_rules(),
            estimator: Arc::new(KeywordEstimator),
        }
    }
}

impl SchedulerConfig {
    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::default()
        }
    }
}

/// The conflict and reminder engine, built once and shared by handle.
pub struct FamilyScheduler {
    detector: ConflictDetector,
    ledger: ConflictLedger,
    reminders: Arc<ReminderScheduler>,
    inbox: Arc<NotificationStore>,
    settings: Arc<SettingsStore>,
    hub: Arc<NotifyHub>,
    sink: Arc<dyn DeliverySink>,
    clock: Arc<dyn Clock>,
    conflict_retention: Duration,
}

impl FamilyScheduler {
    /// Replay persisted state (if any), restore reminders and wire the services.
    pub async fn open(
        config: SchedulerConfig,
        sink: Arc<dyn DeliverySink>,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Arc<Self>> {
        let (persister, state) = match &config.data_dir {
            Some(dir) => Persister::open(&dir.join(STATE_LOG_FILE), config.compact_threshold)?,
            None => (Persister::disabled(), PersistedState::default()),
        };

        let settings = match state.settings {
            Some(s) => match s.validate() {
                Ok(()) => s,
                Err(e) => {
                    tracing::warn!("persisted settings rejected, using defaults: {e}");
                    NotificationSettings::default()
                }
            },
            None => NotificationSettings::default(),
        };
        let settings = Arc::new(SettingsStore::new(settings, persister.clone()));
        let hub = Arc::new(NotifyHub::new());
        let inbox = NotificationStore::new(
            state.notifications,
            clock.clone(),
            persister.clone(),
            hub.clone(),
        );
        let reminders = ReminderScheduler::new(ReminderDeps {
            clock: clock.clone(),
            settings: settings.clone(),
            sink: sink.clone(),
            inbox: inbox.clone(),
            hub: hub.clone(),
            persister,
        });
        reminders.restore(state.reminders).await;

        let detector = ConflictDetector::new(
            RuleCatalog::new(config.rules),
            config.estimator,
            clock.clone(),
        );

        Ok(Arc::new(Self {
            detector,
            ledger: ConflictLedger::new(),
            reminders,
            inbox,
            settings,
            hub,
            sink,
            clock,
            conflict_retention: config.conflict_retention,
        }))
    }

    // ── Calendar mutations ───────────────────────────────

    /// Run detection for a created or edited event, surface new conflicts and
    /// (re)schedule the event's reminders. Returns every conflict found.
    pub async fn event_saved(&self, event: &Event, calendar: &[Event], people: &[Person]) -> Vec<Conflict> {
        let conflicts = self.detector.detect(event, calendar, people);
        let fresh = self.ledger.record(&event.id, conflicts.clone());
        for conflict in &fresh {
            self.hub.send(ServiceEvent::ConflictDetected {
                conflict_id: conflict.id.clone(),
                priority: conflict.priority,
            });
            self.surface(conflict).await;
        }
        self.reminders.schedule_for_event(event).await;
        if !conflicts.is_empty() {
            tracing::info!(
                event = %event.id,
                conflicts = conflicts.len(),
                new = fresh.len(),
                "conflicts detected"
            );
        }
        conflicts
    }

    pub async fn event_deleted(&self, event_id: &str) {
        let reminders = self.reminders.cancel_for_event(event_id).await;
        let conflicts = self.ledger.forget_event(event_id);
        tracing::info!(event = %event_id, reminders, conflicts, "event deleted");
    }

    // ── Conflicts ────────────────────────────────────────

    pub fn resolve_conflict(&self, id: &str) -> Option<Conflict> {
        let resolved = self.ledger.resolve(id, self.clock.now())?;
        self.hub.send(ServiceEvent::ConflictResolved {
            conflict_id: resolved.id.clone(),
        });
        Some(resolved)
    }

    pub fn suggest_reschedule(
        &self,
        event: &Event,
        calendar: &[Event],
        options: &SuggestOptions,
    ) -> Vec<NaiveDateTime> {
        suggest(event, calendar, options)
    }

    pub fn set_rule_enabled(&self, category: RuleCategory, enabled: bool) -> bool {
        self.detector.catalog().set_enabled(category, enabled)
    }

    /// Drop resolved conflicts older than the retention window.
    pub fn purge_resolved(&self) -> usize {
        let purged = self
            .ledger
            .purge_resolved(self.clock.now(), self.conflict_retention);
        if purged > 0 {
            tracing::info!(purged, "purged resolved conflicts");
        }
        purged
    }

    /// In-app notice and, for immediate email cadence, an alert email.
    async fn surface(&self, conflict: &Conflict) {
        let settings = self.settings.get().await;
        if settings.channels.in_app {
            self.inbox.add(conflict_notification(conflict)).await;
        }
        if settings.channels.email
            && settings.email.cadence == EmailCadence::Immediate
            && !settings.email.recipients.is_empty()
        {
            let envelope = EmailEnvelope {
                template: EmailTemplate::ConflictAlert,
                data: conflict_email_data(conflict),
                recipients: settings.email.recipients.clone(),
            };
            if let Err(e) = self
                .sink
                .deliver(DeliveryKind::Email, &DeliveryPayload::Email(envelope))
                .await
            {
                tracing::warn!(conflict = %conflict.id, "conflict alert email failed: {e}");
            }
        }
    }

    // ── Settings & digest ────────────────────────────────

    pub async fn update_settings(&self, patch: &SettingsPatch) -> Result<NotificationSettings, SettingsError> {
        self.settings.update(patch).await
    }

    /// Email a summary of unread notifications if the cadence says one is due.
    /// Returns whether a digest went out.
    pub async fn send_digest(&self) -> Result<bool, DeliveryError> {
        let settings = self.settings.get().await;
        let Some(interval) = settings.email.cadence.digest_interval() else {
            return Ok(false);
        };
        if !settings.channels.email || settings.email.recipients.is_empty() {
            return Ok(false);
        }
        let now = self.clock.now();
        if let Some(last) = settings.email.last_digest_at
            && last + interval > now
        {
            return Ok(false);
        }
        let unread = self.inbox.list(&NotificationFilter::unread()).await;
        if unread.is_empty() {
            return Ok(false);
        }

        let items: Vec<Value> = unread
            .iter()
            .map(|n| {
                json!({
                    "title": n.title,
                    "message": n.message,
                    "kind": n.kind,
                    "priority": n.priority,
                    "timestamp": n.timestamp,
                })
            })
            .collect();
        let mut data = Map::new();
        data.insert("unreadCount".into(), json!(unread.len()));
        data.insert("openConflicts".into(), json!(self.ledger.active().len()));
        data.insert("since".into(), json!(settings.email.last_digest_at));
        data.insert("items".into(), Value::Array(items));
        let envelope = EmailEnvelope {
            template: EmailTemplate::Digest,
            data,
            recipients: settings.email.recipients.clone(),
        };
        self.sink
            .deliver(DeliveryKind::Email, &DeliveryPayload::Email(envelope))
            .await?;
        self.settings.mark_digest_sent(now).await;
        tracing::info!(items = unread.len(), "digest sent");
        Ok(true)
    }

    // ── Accessors ────────────────────────────────────────

    pub fn detector(&self) -> &ConflictDetector {
        &self.detector
    }

    pub fn ledger(&self) -> &ConflictLedger {
        &self.ledger
    }

    pub fn reminders(&self) -> &Arc<ReminderScheduler> {
        &self.reminders
    }

    pub fn inbox(&self) -> &Arc<NotificationStore> {
        &self.inbox
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn hub(&self) -> &Arc<NotifyHub> {
        &self.hub
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

fn conflict_notification(conflict: &Conflict) -> InAppNotification {
    let mut note = InAppNotification::new(
        NotificationKind::Conflict,
        format!("Scheduling conflict: {}", conflict.event.title),
        conflict.description.clone(),
        conflict.detected_at,
    );
    note.priority = conflict.severity.into();
    note.category = if conflict.affected_people.len() > 1
        || conflict.affected_people.contains(&PersonScope::All)
    {
        NotificationCategory::Family
    } else {
        NotificationCategory::Calendar
    };
    note.action_required = true;
    note.related_event_id = Some(conflict.event.id.clone());
    note.related_person_id = match &conflict.event.person {
        PersonScope::Person(id) => Some(id.clone()),
        PersonScope::All => None,
    };
    note.actions = conflict
        .resolutions
        .iter()
        .map(|r| NotificationAction::new(r.id.clone(), r.description.clone()))
        .collect();
    note
}

fn conflict_email_data(conflict: &Conflict) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("conflictId".into(), json!(conflict.id));
    data.insert("category".into(), json!(conflict.category));
    data.insert("severity".into(), json!(conflict.severity));
    data.insert("priority".into(), json!(conflict.priority));
    data.insert("description".into(), json!(conflict.description));
    data.insert("eventTitle".into(), json!(conflict.event.title));
    data.insert("eventStart".into(), json!(conflict.event.start_at()));
    data.insert(
        "resolutions".into(),
        json!(conflict
            .resolutions
            .iter()
            .map(|r| r.description.clone())
            .collect::<Vec<_>>()),
    );
    data
}
