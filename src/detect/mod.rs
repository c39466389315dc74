pub mod advisor;
pub mod ledger;
pub mod rules;
pub mod suggest;
pub mod travel;

pub use advisor::{advise, AdviceContext};
pub use ledger::ConflictLedger;
pub use rules::{Rule, RuleCatalog};
pub use suggest::{merge_overlapping, suggest, SuggestOptions};
pub use travel::{FixedEstimator, KeywordEstimator, TravelTimeEstimator};

use std::sync::Arc;

use crate::clock::Clock;
use crate::limits::*;
use crate::model::*;

/// Applies the enabled rules of a catalog to a new or edited event.
pub struct ConflictDetector {
    catalog: RuleCatalog,
    estimator: Arc<dyn TravelTimeEstimator>,
    clock: Arc<dyn Clock>,
}

/// A finding of the location analysis, tagged with the rule it belongs to.
struct LocationFinding {
    category: RuleCategory,
    gap_minutes: i64,
    travel_minutes: u32,
}

impl ConflictDetector {
    pub fn new(
        catalog: RuleCatalog,
        estimator: Arc<dyn TravelTimeEstimator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            estimator,
            clock,
        }
    }

    /// Default rules and the keyword travel heuristic.
    pub fn with_defaults(clock: Arc<dyn Clock>) -> Self {
        Self::new(RuleCatalog::default(), Arc::new(KeywordEstimator), clock)
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    pub fn estimator(&self) -> &dyn TravelTimeEstimator {
        self.estimator.as_ref()
    }

    /// Run every enabled rule against the candidates that share a person with
    /// `new_event`. Result is sorted by priority, most urgent first.
    pub fn detect(&self, new_event: &Event, candidates: &[Event], people: &[Person]) -> Vec<Conflict> {
        let started = std::time::Instant::now();
        let relevant: Vec<&Event> = candidates
            .iter()
            .filter(|c| c.id != new_event.id && c.person.shares_with(&new_event.person))
            .collect();

        let now = self.clock.now();
        let mut out = Vec::new();
        for rule in self.catalog.enabled() {
            match rule.category {
                RuleCategory::TimeOverlap => self.time_overlap(new_event, &relevant, people, now, &mut out),
                RuleCategory::DoubleBooking => {
                    self.double_booking(new_event, &relevant, people, now, &mut out)
                }
                RuleCategory::LocationConflict | RuleCategory::TravelTime => {
                    self.location(rule.category, new_event, &relevant, people, now, &mut out)
                }
                RuleCategory::FamilyConflict => {
                    self.family_conflict(new_event, &relevant, people, now, &mut out)
                }
            }
        }
        out.sort_by(|a, b| b.priority.cmp(&a.priority));

        for conflict in &out {
            metrics::counter!(
                crate::observability::CONFLICTS_DETECTED_TOTAL,
                "category" => conflict.category.as_str(),
                "severity" => conflict.severity.as_str()
            )
            .increment(1);
        }
        metrics::histogram!(crate::observability::DETECTION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        tracing::debug!(
            event = %new_event.id,
            candidates = relevant.len(),
            conflicts = out.len(),
            "detection pass"
        );
        out
    }

    fn time_overlap(
        &self,
        event: &Event,
        others: &[&Event],
        people: &[Person],
        now: chrono::NaiveDateTime,
        out: &mut Vec<Conflict>,
    ) {
        let span = event.span();
        for other in others {
            if !span.collides(&other.span()) {
                continue;
            }
            let overlap_minutes = span.overlap_with(&other.span()).num_minutes();
            let ratio = if event.duration_minutes == 0 {
                0.0
            } else {
                overlap_minutes as f64 / f64::from(event.duration_minutes)
            };
            let severity = if ratio >= 0.9 {
                Severity::Critical
            } else if ratio >= 0.5 {
                Severity::Major
            } else {
                Severity::Minor
            };
            let priority = (severity.score() + RuleCategory::TimeOverlap.type_score())
                .clamp(1, MAX_SHARED_PRIORITY);
            let description = format!(
                "{} has \"{}\" overlapping \"{}\" by {overlap_minutes} minutes",
                display_name(&other.person, people),
                event.title,
                other.title
            );
            let ctx = AdviceContext {
                overlap_minutes,
                travel_minutes: 0,
            };
            out.push(build(
                RuleCategory::TimeOverlap,
                severity,
                priority,
                event,
                other,
                description,
                &ctx,
                now,
            ));
        }
    }

    fn double_booking(
        &self,
        event: &Event,
        others: &[&Event],
        people: &[Person],
        now: chrono::NaiveDateTime,
        out: &mut Vec<Conflict>,
    ) {
        for other in others {
            if other.date != event.date || other.start != event.start {
                continue;
            }
            let description = format!(
                "{} is double-booked at {}: \"{}\" and \"{}\"",
                display_name(&other.person, people),
                event.start_at().format("%Y-%m-%d %H:%M"),
                event.title,
                other.title
            );
            out.push(build(
                RuleCategory::DoubleBooking,
                Severity::Critical,
                MAX_PRIORITY,
                event,
                other,
                description,
                &AdviceContext::default(),
                now,
            ));
        }
    }

    fn location(
        &self,
        category: RuleCategory,
        event: &Event,
        others: &[&Event],
        people: &[Person],
        now: chrono::NaiveDateTime,
        out: &mut Vec<Conflict>,
    ) {
        for other in others {
            let Some(finding) = self.analyze_locations(event, other) else {
                continue;
            };
            if finding.category != category {
                continue;
            }
            let severity = if finding.gap_minutes * 2 < i64::from(finding.travel_minutes) {
                Severity::Major
            } else {
                Severity::Minor
            };
            let priority = (severity.score() + category.type_score()).min(MAX_SHARED_PRIORITY);
            let who = display_name(&other.person, people);
            let description = match category {
                RuleCategory::LocationConflict => format!(
                    "{who} would need to be at {} and {} within {} minutes; travel takes about {}",
                    event.location().unwrap_or_default(),
                    other.location().unwrap_or_default(),
                    finding.gap_minutes,
                    finding.travel_minutes
                ),
                _ => format!(
                    "{who} has {} minutes between \"{}\" and \"{}\"; travel takes about {}",
                    finding.gap_minutes, event.title, other.title, finding.travel_minutes
                ),
            };
            let ctx = AdviceContext {
                overlap_minutes: 0,
                travel_minutes: finding.travel_minutes,
            };
            out.push(build(category, severity, priority, event, other, description, &ctx, now));
        }
    }

    /// Shared analysis for the two location rules. A pair is a location
    /// conflict when the starts are close together, and a travel-time problem
    /// when the events are back to back with too short a gap.
    fn analyze_locations(&self, a: &Event, b: &Event) -> Option<LocationFinding> {
        let (from, to) = (a.location()?, b.location()?);
        if from.to_lowercase() == to.to_lowercase() {
            return None;
        }
        let travel_minutes = self.estimator.estimate_minutes(from, to);
        let travel = i64::from(travel_minutes);

        let start_gap = (a.start_at() - b.start_at()).num_minutes().abs();
        if start_gap <= LOCATION_WINDOW_MINUTES && start_gap < travel {
            return Some(LocationFinding {
                category: RuleCategory::LocationConflict,
                gap_minutes: start_gap,
                travel_minutes,
            });
        }

        if a.span().overlaps(&b.span()) {
            return None;
        }
        let (earlier, later) = if a.start_at() <= b.start_at() { (a, b) } else { (b, a) };
        let gap = (later.start_at() - earlier.end_at()).num_minutes();
        (gap >= 0 && gap < travel).then_some(LocationFinding {
            category: RuleCategory::TravelTime,
            gap_minutes: gap,
            travel_minutes,
        })
    }

    fn family_conflict(
        &self,
        event: &Event,
        others: &[&Event],
        people: &[Person],
        now: chrono::NaiveDateTime,
        out: &mut Vec<Conflict>,
    ) {
        if !event.person.is_all() {
            return;
        }
        let span = event.span();
        for other in others {
            if other.person.is_all() || !span.collides(&other.span()) {
                continue;
            }
            let description = format!(
                "Family event \"{}\" clashes with {}'s \"{}\"",
                event.title,
                display_name(&other.person, people),
                other.title
            );
            out.push(build(
                RuleCategory::FamilyConflict,
                Severity::Major,
                FAMILY_CONFLICT_PRIORITY,
                event,
                other,
                description,
                &AdviceContext::default(),
                now,
            ));
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn build(
    category: RuleCategory,
    severity: Severity,
    priority: u8,
    event: &Event,
    other: &Event,
    description: String,
    ctx: &AdviceContext,
    now: chrono::NaiveDateTime,
) -> Conflict {
    let conflicting = vec![other.clone()];
    let id = Conflict::derive_id(category, event, &conflicting);
    let resolutions = advise(category, &id, event, &conflicting, ctx);
    let affected_people =
        affected_people(std::iter::once(&event.person).chain(conflicting.iter().map(|e| &e.person)));
    Conflict {
        id,
        event: event.clone(),
        conflicting_events: conflicting,
        category,
        severity,
        description,
        detected_at: now,
        resolved: false,
        resolved_at: None,
        resolutions,
        affected_people,
        priority: priority.clamp(1, MAX_PRIORITY),
    }
}

/// Display name for a scope; unknown ids fall back to the raw id.
pub fn display_name(scope: &PersonScope, people: &[Person]) -> String {
    match scope {
        PersonScope::All => "the whole family".to_string(),
        PersonScope::Person(id) => people
            .iter()
            .find(|p| &p.id == id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| id.clone()),
    }
}
