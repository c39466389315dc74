use chrono::{Duration, NaiveDateTime};
use dashmap::DashMap;

use crate::model::Conflict;

/// Conflicts from the latest detection pass of each event, plus resolved
/// conflicts kept until their audit window lapses.
#[derive(Default)]
pub struct ConflictLedger {
    conflicts: DashMap<String, Conflict>,
}

impl ConflictLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the open conflicts previously recorded for `event_id`.
    /// Returns the conflicts that were not already known: ids that were open
    /// before stay open without being reported again, and ids that were
    /// resolved stay resolved.
    pub fn record(&self, event_id: &str, conflicts: Vec<Conflict>) -> Vec<Conflict> {
        let mut previous_open = Vec::new();
        self.conflicts.retain(|id, c| {
            if !c.resolved && c.event.id == event_id {
                previous_open.push(id.clone());
                false
            } else {
                true
            }
        });

        let mut fresh = Vec::new();
        for conflict in conflicts {
            if self
                .conflicts
                .get(&conflict.id)
                .is_some_and(|existing| existing.resolved)
            {
                continue;
            }
            if !previous_open.contains(&conflict.id) {
                fresh.push(conflict.clone());
            }
            self.conflicts.insert(conflict.id.clone(), conflict);
        }
        self.update_gauge();
        fresh
    }

    /// Mark a conflict resolved. Resolving twice keeps the first timestamp.
    pub fn resolve(&self, id: &str, now: NaiveDateTime) -> Option<Conflict> {
        let mut entry = self.conflicts.get_mut(id)?;
        if !entry.resolved {
            entry.resolved = true;
            entry.resolved_at = Some(now);
            tracing::info!(conflict = %id, "conflict resolved");
        }
        let resolved = entry.clone();
        drop(entry);
        self.update_gauge();
        Some(resolved)
    }

    pub fn get(&self, id: &str) -> Option<Conflict> {
        self.conflicts.get(id).map(|c| c.clone())
    }

    /// Unresolved conflicts, most urgent first.
    pub fn active(&self) -> Vec<Conflict> {
        let mut out: Vec<Conflict> = self
            .conflicts
            .iter()
            .filter(|c| !c.resolved)
            .map(|c| c.clone())
            .collect();
        out.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Every conflict, open or resolved, that involves the event.
    pub fn for_event(&self, event_id: &str) -> Vec<Conflict> {
        let mut out: Vec<Conflict> = self
            .conflicts
            .iter()
            .filter(|c| c.involves(event_id))
            .map(|c| c.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Drop every conflict involving a deleted event. Returns how many went.
    pub fn forget_event(&self, event_id: &str) -> usize {
        let before = self.conflicts.len();
        self.conflicts.retain(|_, c| !c.involves(event_id));
        self.update_gauge();
        before - self.conflicts.len()
    }

    /// Remove resolved conflicts whose retention has lapsed.
    pub fn purge_resolved(&self, now: NaiveDateTime, retention: Duration) -> usize {
        let before = self.conflicts.len();
        self.conflicts.retain(|_, c| match (c.resolved, c.resolved_at) {
            (true, Some(at)) => at + retention > now,
            (true, None) => false,
            (false, _) => true,
        });
        let purged = before - self.conflicts.len();
        if purged > 0 {
            metrics::counter!(crate::observability::CONFLICTS_PURGED_TOTAL).increment(purged as u64);
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    fn update_gauge(&self) {
        let open = self.conflicts.iter().filter(|c| !c.resolved).count();
        metrics::gauge!(crate::observability::CONFLICTS_OPEN).set(open as f64);
    }
}
