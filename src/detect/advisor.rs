use crate::limits::SHORT_OVERLAP_MINUTES;
use crate::model::*;

/// Rule-specific measurements the advice depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdviceContext {
    pub overlap_minutes: i64,
    pub travel_minutes: u32,
}

fn resolution(
    conflict_id: &str,
    action: ResolutionAction,
    description: String,
    automated: bool,
    impact: Impact,
) -> Resolution {
    Resolution {
        id: format!("{conflict_id}/{}", action.slug()),
        kind: action.kind(),
        action,
        description,
        automated,
        impact,
    }
}

fn titles(events: &[Event]) -> String {
    events
        .iter()
        .map(|e| format!("\"{}\"", e.title))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Ordered resolutions for one conflict. Deterministic: same input, same output.
pub fn advise(
    category: RuleCategory,
    conflict_id: &str,
    event: &Event,
    conflicting: &[Event],
    ctx: &AdviceContext,
) -> Vec<Resolution> {
    match category {
        RuleCategory::TimeOverlap => advise_overlap(conflict_id, event, conflicting, ctx),
        RuleCategory::DoubleBooking => advise_double_booking(conflict_id, event, conflicting),
        RuleCategory::LocationConflict | RuleCategory::TravelTime => {
            advise_location(conflict_id, event, ctx)
        }
        RuleCategory::FamilyConflict => advise_family(conflict_id, event, conflicting),
    }
}

fn advise_overlap(id: &str, event: &Event, conflicting: &[Event], ctx: &AdviceContext) -> Vec<Resolution> {
    let others = titles(conflicting);
    let mut out = vec![
        resolution(
            id,
            ResolutionAction::RescheduleNew,
            format!("Move \"{}\" to a time that does not overlap {others}", event.title),
            false,
            Impact::Medium,
        ),
        resolution(
            id,
            ResolutionAction::RescheduleExisting,
            format!("Move {others} instead"),
            false,
            Impact::High,
        ),
    ];
    if ctx.overlap_minutes > 0 && ctx.overlap_minutes < SHORT_OVERLAP_MINUTES {
        let trim_minutes = ctx.overlap_minutes as u32;
        out.push(resolution(
            id,
            ResolutionAction::ModifyDuration { trim_minutes },
            format!("Shorten \"{}\" by {trim_minutes} minutes", event.title),
            true,
            Impact::Low,
        ));
    }
    out
}

fn advise_double_booking(id: &str, event: &Event, conflicting: &[Event]) -> Vec<Resolution> {
    let others = titles(conflicting);
    vec![
        resolution(
            id,
            ResolutionAction::CancelNew,
            format!("Cancel \"{}\"", event.title),
            false,
            Impact::Low,
        ),
        resolution(
            id,
            ResolutionAction::CancelExisting,
            format!("Cancel {others}"),
            false,
            Impact::High,
        ),
        resolution(
            id,
            ResolutionAction::RescheduleNew,
            format!("Move \"{}\" to the next free slot", event.title),
            true,
            Impact::Medium,
        ),
    ]
}

fn advise_location(id: &str, event: &Event, ctx: &AdviceContext) -> Vec<Resolution> {
    let minutes = ctx.travel_minutes;
    vec![
        resolution(
            id,
            ResolutionAction::RescheduleBuffer { minutes },
            format!("Leave {minutes} minutes of travel time before \"{}\"", event.title),
            true,
            Impact::Low,
        ),
        resolution(
            id,
            ResolutionAction::RelocateNew,
            format!("Hold \"{}\" somewhere closer", event.title),
            false,
            Impact::Medium,
        ),
        resolution(
            id,
            ResolutionAction::MakeVirtual,
            "Make one of the events a call or video meeting".to_string(),
            false,
            Impact::Low,
        ),
    ]
}

fn advise_family(id: &str, event: &Event, conflicting: &[Event]) -> Vec<Resolution> {
    let others = titles(conflicting);
    vec![
        resolution(
            id,
            ResolutionAction::RescheduleIndividual,
            format!("Move {others} so everyone can attend \"{}\"", event.title),
            false,
            Impact::High,
        ),
        resolution(
            id,
            ResolutionAction::RescheduleFamily,
            format!("Move \"{}\" to a time the whole family is free", event.title),
            false,
            Impact::Medium,
        ),
        resolution(
            id,
            ResolutionAction::SplitFamily,
            format!("Let part of the family attend \"{}\" while the rest keep {others}", event.title),
            false,
            Impact::High,
        ),
    ]
}
