use std::collections::BTreeSet;
use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Calendar-owned identifiers.
pub type EventId = String;
pub type PersonId = String;

/// Sentinel person id meaning "everyone in the family".
pub const ALL_SCOPE: &str = "all";

/// Half-open interval `[start, end)` of local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Span {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Length of the shared part of two spans; zero when disjoint.
    pub fn overlap_with(&self, other: &Span) -> Duration {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start < end { end - start } else { Duration::zero() }
    }

    pub fn contains_instant(&self, t: NaiveDateTime) -> bool {
        self.start <= t && t < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Like [`overlaps`](Self::overlaps), but a zero-length span also collides
    /// with a span starting at the same instant or containing it.
    pub fn collides(&self, other: &Span) -> bool {
        self.overlaps(other)
            || self.start == other.start
            || (self.is_empty() && other.contains_instant(self.start))
            || (other.is_empty() && self.contains_instant(other.start))
    }
}

/// Who an event belongs to: one person, or the whole family.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PersonScope {
    All,
    Person(PersonId),
}

impl PersonScope {
    pub fn person(id: impl Into<PersonId>) -> Self {
        PersonScope::from(id.into())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, PersonScope::All)
    }

    /// Two scopes share when either is the whole family or the ids match.
    pub fn shares_with(&self, other: &PersonScope) -> bool {
        match (self, other) {
            (PersonScope::All, _) | (_, PersonScope::All) => true,
            (PersonScope::Person(a), PersonScope::Person(b)) => a == b,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            PersonScope::All => ALL_SCOPE,
            PersonScope::Person(id) => id,
        }
    }
}

impl From<String> for PersonScope {
    fn from(s: String) -> Self {
        if s == ALL_SCOPE {
            PersonScope::All
        } else {
            PersonScope::Person(s)
        }
    }
}

impl From<PersonScope> for String {
    fn from(scope: PersonScope) -> Self {
        match scope {
            PersonScope::All => ALL_SCOPE.to_string(),
            PersonScope::Person(id) => id,
        }
    }
}

impl fmt::Display for PersonScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Union of scopes where `all` absorbs every individual id.
pub fn affected_people<'a>(scopes: impl IntoIterator<Item = &'a PersonScope>) -> BTreeSet<PersonScope> {
    let mut set = BTreeSet::new();
    for scope in scopes {
        if scope.is_all() {
            set.clear();
            set.insert(PersonScope::All);
            return set;
        }
        set.insert(scope.clone());
    }
    set
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Appointment,
    Activity,
    School,
    Work,
    Social,
    #[default]
    Other,
}

impl EventCategory {
    pub const ALL: [EventCategory; 6] = [
        EventCategory::Appointment,
        EventCategory::Activity,
        EventCategory::School,
        EventCategory::Work,
        EventCategory::Social,
        EventCategory::Other,
    ];
}

/// A calendar entry. Owned by the calendar subsystem; treated as immutable here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub person: PersonScope,
    pub title: String,
    #[serde(default)]
    pub category: EventCategory,
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub duration_minutes: u32,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl Event {
    pub fn new(
        id: impl Into<EventId>,
        person: PersonScope,
        title: impl Into<String>,
        date: NaiveDate,
        start: NaiveTime,
        duration_minutes: u32,
    ) -> Self {
        Self {
            id: id.into(),
            person,
            title: title.into(),
            category: EventCategory::Other,
            date,
            start,
            duration_minutes,
            location: None,
            cost: None,
            notes: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_category(mut self, category: EventCategory) -> Self {
        self.category = category;
        self
    }

    pub fn start_at(&self) -> NaiveDateTime {
        self.date.and_time(self.start)
    }

    pub fn end_at(&self) -> NaiveDateTime {
        self.start_at() + Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn span(&self) -> Span {
        Span::new(self.start_at(), self.end_at())
    }

    /// Trimmed location, if any non-blank one is set.
    pub fn location(&self) -> Option<&str> {
        self.location.as_deref().map(str::trim).filter(|l| !l.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    #[serde(default)]
    pub color: Option<String>,
}

// ── Conflicts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    TimeOverlap,
    DoubleBooking,
    LocationConflict,
    TravelTime,
    FamilyConflict,
}

impl RuleCategory {
    pub const ALL: [RuleCategory; 5] = [
        RuleCategory::TimeOverlap,
        RuleCategory::DoubleBooking,
        RuleCategory::LocationConflict,
        RuleCategory::TravelTime,
        RuleCategory::FamilyConflict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleCategory::TimeOverlap => "time_overlap",
            RuleCategory::DoubleBooking => "double_booking",
            RuleCategory::LocationConflict => "location_conflict",
            RuleCategory::TravelTime => "travel_time",
            RuleCategory::FamilyConflict => "family_conflict",
        }
    }

    /// Contribution of the rule type to a conflict's priority.
    pub fn type_score(&self) -> u8 {
        match self {
            RuleCategory::TimeOverlap => 2,
            RuleCategory::DoubleBooking => 3,
            RuleCategory::LocationConflict | RuleCategory::TravelTime => 1,
            RuleCategory::FamilyConflict => 2,
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl Severity {
    pub fn score(&self) -> u8 {
        match self {
            Severity::Minor => 3,
            Severity::Major => 6,
            Severity::Critical => 9,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Major => "major",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    Reschedule,
    Relocate,
    Cancel,
    ModifyDuration,
    SplitEvent,
}

/// The concrete proposal behind a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionAction {
    RescheduleNew,
    RescheduleExisting,
    ModifyDuration { trim_minutes: u32 },
    CancelNew,
    CancelExisting,
    RescheduleBuffer { minutes: u32 },
    RelocateNew,
    MakeVirtual,
    RescheduleIndividual,
    RescheduleFamily,
    SplitFamily,
}

impl ResolutionAction {
    pub fn slug(&self) -> &'static str {
        match self {
            ResolutionAction::RescheduleNew => "reschedule-new",
            ResolutionAction::RescheduleExisting => "reschedule-existing",
            ResolutionAction::ModifyDuration { .. } => "modify-duration",
            ResolutionAction::CancelNew => "cancel-new",
            ResolutionAction::CancelExisting => "cancel-existing",
            ResolutionAction::RescheduleBuffer { .. } => "reschedule-buffer",
            ResolutionAction::RelocateNew => "relocate-new",
            ResolutionAction::MakeVirtual => "make-virtual",
            ResolutionAction::RescheduleIndividual => "reschedule-individual",
            ResolutionAction::RescheduleFamily => "reschedule-family",
            ResolutionAction::SplitFamily => "split-family",
        }
    }

    pub fn kind(&self) -> ResolutionKind {
        match self {
            ResolutionAction::RescheduleNew
            | ResolutionAction::RescheduleExisting
            | ResolutionAction::RescheduleBuffer { .. }
            | ResolutionAction::RescheduleIndividual
            | ResolutionAction::RescheduleFamily => ResolutionKind::Reschedule,
            ResolutionAction::ModifyDuration { .. } => ResolutionKind::ModifyDuration,
            ResolutionAction::CancelNew | ResolutionAction::CancelExisting => ResolutionKind::Cancel,
            ResolutionAction::RelocateNew | ResolutionAction::MakeVirtual => ResolutionKind::Relocate,
            ResolutionAction::SplitFamily => ResolutionKind::SplitEvent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub id: String,
    pub kind: ResolutionKind,
    pub action: ResolutionAction,
    pub description: String,
    /// The UI may offer a one-click apply. Nothing is ever applied automatically.
    pub automated: bool,
    pub impact: Impact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub event: Event,
    pub conflicting_events: Vec<Event>,
    pub category: RuleCategory,
    pub severity: Severity,
    /// Human-readable summary naming the people and events involved.
    pub description: String,
    pub detected_at: NaiveDateTime,
    pub resolved: bool,
    pub resolved_at: Option<NaiveDateTime>,
    pub resolutions: Vec<Resolution>,
    pub affected_people: BTreeSet<PersonScope>,
    /// 1..=10, higher is more urgent.
    pub priority: u8,
}

impl Conflict {
    /// Deterministic id from the rule and the events involved.
    pub fn derive_id(category: RuleCategory, event: &Event, conflicting: &[Event]) -> String {
        let mut id = format!("{}:{}", category.as_str(), event.id);
        for other in conflicting {
            id.push(':');
            id.push_str(&other.id);
        }
        id
    }

    pub fn involves(&self, event_id: &str) -> bool {
        self.event.id == event_id || self.conflicting_events.iter().any(|e| e.id == event_id)
    }
}

// ── Reminders ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryKind {
    Push,
    Email,
    InApp,
}

impl DeliveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryKind::Push => "push",
            DeliveryKind::Email => "email",
            DeliveryKind::InApp => "inapp",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderStatus {
    Pending,
    Sent,
    Acknowledged,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderMetadata {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    pub tag: Option<String>,
    pub payload: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub id: Ulid,
    pub event_id: EventId,
    pub offset_minutes: u32,
    pub scheduled_for: NaiveDateTime,
    pub kind: DeliveryKind,
    pub status: ReminderStatus,
    pub retry_count: u32,
    pub sent_at: Option<NaiveDateTime>,
    pub acknowledged_at: Option<NaiveDateTime>,
    pub error: Option<String>,
    pub metadata: Option<ReminderMetadata>,
}

// ── In-app notifications ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Reminder,
    Conflict,
    Acknowledgement,
    Digest,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl From<Severity> for NotificationPriority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Minor => NotificationPriority::Medium,
            Severity::Major => NotificationPriority::High,
            Severity::Critical => NotificationPriority::Urgent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    Calendar,
    Family,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub id: String,
    pub label: String,
}

impl NotificationAction {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self { id: id.into(), label: label.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InAppNotification {
    pub id: Ulid,
    pub timestamp: NaiveDateTime,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub category: NotificationCategory,
    pub read: bool,
    pub action_required: bool,
    pub related_event_id: Option<EventId>,
    pub related_person_id: Option<PersonId>,
    pub actions: Vec<NotificationAction>,
}

impl InAppNotification {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        timestamp: NaiveDateTime,
    ) -> Self {
        Self {
            id: Ulid::new(),
            timestamp,
            kind,
            title: title.into(),
            message: message.into(),
            priority: NotificationPriority::Medium,
            category: NotificationCategory::Calendar,
            read: false,
            action_required: false,
            related_event_id: None,
            related_person_id: None,
            actions: Vec::new(),
        }
    }
}
