use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};

use crate::limits::{DEFAULT_MAX_DAYS_OUT, MAX_DAYS_OUT, MAX_SUGGESTIONS};
use crate::model::{Event, Span};

const DEFAULT_SLOT_HOURS: [u32; 8] = [9, 10, 11, 14, 15, 16, 18, 19];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuggestOptions {
    /// Times of day to try. `None` uses the default working-hours set.
    pub preferred_slots: Option<Vec<NaiveTime>>,
    pub max_days_out: u32,
    pub avoid_weekends: bool,
}

impl Default for SuggestOptions {
    fn default() -> Self {
        Self {
            preferred_slots: None,
            max_days_out: DEFAULT_MAX_DAYS_OUT,
            avoid_weekends: false,
        }
    }
}

impl SuggestOptions {
    fn slots(&self) -> Vec<NaiveTime> {
        let mut slots = match &self.preferred_slots {
            Some(slots) => slots.clone(),
            None => DEFAULT_SLOT_HOURS
                .iter()
                .filter_map(|&h| NaiveTime::from_hms_opt(h, 0, 0))
                .collect(),
        };
        slots.sort();
        slots.dedup();
        slots
    }
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

fn is_free(busy: &[Span], trial: &Span) -> bool {
    let i = busy.partition_point(|s| s.end <= trial.start);
    busy.get(i).is_none_or(|s| !s.overlaps(trial))
}

/// Up to five conflict-free start times for `event` on the days after its
/// current date, in chronological order. Empty when nothing fits.
pub fn suggest(event: &Event, existing: &[Event], options: &SuggestOptions) -> Vec<NaiveDateTime> {
    let mut busy: Vec<Span> = existing
        .iter()
        .filter(|e| e.id != event.id)
        .map(Event::span)
        .filter(|s| s.start < s.end)
        .collect();
    busy.sort_by_key(|s| s.start);
    let busy = merge_overlapping(&busy);

    let slots = options.slots();
    let length = Duration::minutes(i64::from(event.duration_minutes));
    let days = options.max_days_out.min(MAX_DAYS_OUT);

    let mut out = Vec::new();
    for offset in 1..=days {
        let Some(day) = event.date.checked_add_signed(Duration::days(i64::from(offset))) else {
            break;
        };
        if options.avoid_weekends && matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            continue;
        }
        for &time in &slots {
            let start = day.and_time(time);
            let trial = Span::new(start, start + length);
            if is_free(&busy, &trial) {
                out.push(start);
                if out.len() == MAX_SUGGESTIONS {
                    return out;
                }
            }
        }
    }
    out
}
