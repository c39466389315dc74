use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::limits::*;
use crate::model::{DeliveryKind, EventCategory};
use crate::persist::Persister;
use crate::wal::Record;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
    pub push: bool,
    pub email: bool,
    pub in_app: bool,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            push: true,
            email: false,
            in_app: true,
        }
    }
}

/// Local-time window in which nothing is delivered. `start > end` wraps past midnight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self {
            enabled: false,
            start: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            end: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
        }
    }
}

impl QuietHours {
    pub fn contains(&self, t: NaiveTime) -> bool {
        if !self.enabled || self.start == self.end {
            return false;
        }
        if self.start < self.end {
            self.start <= t && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// The end of the quiet window `now` falls in, or `None` when delivery may proceed.
    pub fn defer_until(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if !self.contains(now.time()) {
            return None;
        }
        let end_today = now.date().and_time(self.end);
        if end_today > now {
            Some(end_today)
        } else {
            Some(end_today + Duration::days(1))
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailCadence {
    Immediate,
    #[default]
    Daily,
    Weekly,
    Never,
}

impl EmailCadence {
    /// Minimum spacing between digests, if this cadence sends digests at all.
    pub fn digest_interval(&self) -> Option<Duration> {
        match self {
            EmailCadence::Daily => Some(Duration::days(1)),
            EmailCadence::Weekly => Some(Duration::weeks(1)),
            EmailCadence::Immediate | EmailCadence::Never => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSettings {
    pub cadence: EmailCadence,
    pub recipients: Vec<String>,
    pub last_digest_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub channels: ChannelSettings,
    /// Minutes before the event start, per event category.
    pub reminder_offsets: BTreeMap<EventCategory, Vec<u32>>,
    /// Used for categories without their own entry.
    pub default_offsets: Vec<u32>,
    pub quiet_hours: QuietHours,
    pub email: EmailSettings,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        let reminder_offsets = BTreeMap::from([
            (EventCategory::Appointment, vec![1440, 60]),
            (EventCategory::Activity, vec![30]),
            (EventCategory::School, vec![60]),
            (EventCategory::Work, vec![15]),
            (EventCategory::Social, vec![120]),
        ]);
        Self {
            channels: ChannelSettings::default(),
            reminder_offsets,
            default_offsets: vec![30],
            quiet_hours: QuietHours::default(),
            email: EmailSettings::default(),
        }
    }
}

impl NotificationSettings {
    pub fn offsets_for(&self, category: EventCategory) -> &[u32] {
        self.reminder_offsets
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_offsets)
    }

    /// Channel new reminders are delivered on. `None` when every channel is off.
    pub fn reminder_kind(&self) -> Option<DeliveryKind> {
        if self.channels.push {
            Some(DeliveryKind::Push)
        } else if self.channels.in_app {
            Some(DeliveryKind::InApp)
        } else if self.channels.email {
            Some(DeliveryKind::Email)
        } else {
            None
        }
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let per_category = self
            .reminder_offsets
            .iter()
            .map(|(c, offsets)| (Some(*c), offsets))
            .chain(std::iter::once((None, &self.default_offsets)));
        for (category, offsets) in per_category {
            if offsets.len() > MAX_OFFSETS_PER_CATEGORY {
                return Err(SettingsError::TooManyOffsets { category, count: offsets.len() });
            }
            if let Some(&minutes) = offsets
                .iter()
                .find(|&&m| m == 0 || m > MAX_REMINDER_OFFSET_MINUTES)
            {
                return Err(SettingsError::OffsetOutOfRange { category, minutes });
            }
        }
        if self.quiet_hours.enabled && self.quiet_hours.start == self.quiet_hours.end {
            return Err(SettingsError::EmptyQuietHours);
        }
        if let Some(bad) = self.email.recipients.iter().find(|r| !r.contains('@')) {
            return Err(SettingsError::InvalidRecipient(bad.clone()));
        }
        Ok(())
    }

    /// Apply a patch field by field and validate the result. `self` is left untouched.
    pub fn merged(&self, patch: &SettingsPatch) -> Result<Self, SettingsError> {
        let mut next = self.clone();
        if let Some(ch) = &patch.channels {
            if let Some(v) = ch.push {
                next.channels.push = v;
            }
            if let Some(v) = ch.email {
                next.channels.email = v;
            }
            if let Some(v) = ch.in_app {
                next.channels.in_app = v;
            }
        }
        if let Some(offsets) = &patch.reminder_offsets {
            for (category, list) in offsets {
                next.reminder_offsets.insert(*category, normalized_offsets(list));
            }
        }
        if let Some(defaults) = &patch.default_offsets {
            next.default_offsets = normalized_offsets(defaults);
        }
        if let Some(q) = &patch.quiet_hours {
            if let Some(v) = q.enabled {
                next.quiet_hours.enabled = v;
            }
            if let Some(v) = q.start {
                next.quiet_hours.start = v;
            }
            if let Some(v) = q.end {
                next.quiet_hours.end = v;
            }
        }
        if let Some(e) = &patch.email {
            if let Some(v) = e.cadence {
                next.email.cadence = v;
            }
            if let Some(v) = &e.recipients {
                next.email.recipients = v.clone();
            }
        }
        next.validate()?;
        Ok(next)
    }
}

/// Earliest reminder first, one reminder per offset.
fn normalized_offsets(list: &[u32]) -> Vec<u32> {
    let mut list = list.to_vec();
    list.sort_unstable_by(|a, b| b.cmp(a));
    list.dedup();
    list
}

// ── Patches ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelPatch {
    pub push: Option<bool>,
    pub email: Option<bool>,
    pub in_app: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuietHoursPatch {
    pub enabled: Option<bool>,
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailPatch {
    pub cadence: Option<EmailCadence>,
    pub recipients: Option<Vec<String>>,
}

/// A partial settings update. Unknown keys are rejected at parse time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsPatch {
    pub channels: Option<ChannelPatch>,
    pub reminder_offsets: Option<BTreeMap<EventCategory, Vec<u32>>>,
    pub default_offsets: Option<Vec<u32>>,
    pub quiet_hours: Option<QuietHoursPatch>,
    pub email: Option<EmailPatch>,
}

impl SettingsPatch {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        serde_json::from_str(json).map_err(|e| SettingsError::InvalidPatch(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsError {
    InvalidPatch(String),
    OffsetOutOfRange {
        category: Option<EventCategory>,
        minutes: u32,
    },
    TooManyOffsets {
        category: Option<EventCategory>,
        count: usize,
    },
    EmptyQuietHours,
    InvalidRecipient(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::InvalidPatch(e) => write!(f, "invalid settings patch: {e}"),
            SettingsError::OffsetOutOfRange { category, minutes } => write!(
                f,
                "reminder offset {minutes}m for {category:?} outside 1..={MAX_REMINDER_OFFSET_MINUTES}"
            ),
            SettingsError::TooManyOffsets { category, count } => write!(
                f,
                "{count} reminder offsets for {category:?}, at most {MAX_OFFSETS_PER_CATEGORY} allowed"
            ),
            SettingsError::EmptyQuietHours => write!(f, "quiet hours start and end must differ"),
            SettingsError::InvalidRecipient(r) => write!(f, "invalid email recipient: {r}"),
        }
    }
}

impl std::error::Error for SettingsError {}

// ── Store ────────────────────────────────────────────────────────

/// Owner of the process-wide settings. All mutation goes through here.
pub struct SettingsStore {
    settings: RwLock<NotificationSettings>,
    persister: Persister,
}

impl SettingsStore {
    pub fn new(settings: NotificationSettings, persister: Persister) -> Self {
        Self {
            settings: RwLock::new(settings),
            persister,
        }
    }

    pub async fn get(&self) -> NotificationSettings {
        self.settings.read().await.clone()
    }

    pub async fn update(&self, patch: &SettingsPatch) -> Result<NotificationSettings, SettingsError> {
        let mut guard = self.settings.write().await;
        let next = guard.merged(patch)?;
        *guard = next.clone();
        drop(guard);
        tracing::info!("settings updated");
        self.persister.save(Record::Settings(next.clone())).await;
        Ok(next)
    }

    pub(crate) async fn mark_digest_sent(&self, at: NaiveDateTime) {
        let mut guard = self.settings.write().await;
        guard.email.last_digest_at = Some(at);
        let snapshot = guard.clone();
        drop(guard);
        self.persister.save(Record::Settings(snapshot)).await;
    }
}
