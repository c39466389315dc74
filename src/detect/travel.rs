/// Estimates travel minutes between two free-text locations.
pub trait TravelTimeEstimator: Send + Sync {
    fn estimate_minutes(&self, from: &str, to: &str) -> u32;
}

const SAME_KIND_MINUTES: u32 = 10;
const SHARED_AREA_MINUTES: u32 = 30;
const DEFAULT_MINUTES: u32 = 20;

const PLACE_KINDS: &[&[&str]] = &[
    &["school", "academy", "elementary", "kindergarten", "college"],
    &["gym", "field", "park", "pool", "stadium", "arena", "court"],
    &["hospital", "clinic", "doctor", "dentist", "pharmacy"],
    &["mall", "store", "market", "shop", "supermarket"],
    &["office", "work"],
    &["home", "house"],
];

const AREAS: &[&str] = &[
    "downtown", "uptown", "midtown", "city center", "north", "south", "east", "west",
];

/// Keyword heuristic: places of the same kind are close, places that merely
/// share a broad area are assumed to be across it.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordEstimator;

fn kind_of(location: &str) -> Option<usize> {
    PLACE_KINDS
        .iter()
        .position(|words| words.iter().any(|w| location.contains(w)))
}

fn shares_area(a: &str, b: &str) -> bool {
    AREAS.iter().any(|area| a.contains(area) && b.contains(area))
}

impl TravelTimeEstimator for KeywordEstimator {
    fn estimate_minutes(&self, from: &str, to: &str) -> u32 {
        let from = from.to_lowercase();
        let to = to.to_lowercase();
        if let (Some(a), Some(b)) = (kind_of(&from), kind_of(&to))
            && a == b
        {
            return SAME_KIND_MINUTES;
        }
        if shares_area(&from, &to) {
            return SHARED_AREA_MINUTES;
        }
        DEFAULT_MINUTES
    }
}

/// A fixed estimate, for callers with their own numbers.
#[derive(Debug, Clone, Copy)]
pub struct FixedEstimator(pub u32);

impl TravelTimeEstimator for FixedEstimator {
    fn estimate_minutes(&self, _from: &str, _to: &str) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_kind_is_close() {
        let e = KeywordEstimator;
        assert_eq!(e.estimate_minutes("Lincoln Elementary School", "Riverside Academy"), 10);
        assert_eq!(e.estimate_minutes("City Pool", "Soccer Field"), 10);
    }

    #[test]
    fn shared_area_is_across_town() {
        let e = KeywordEstimator;
        assert_eq!(e.estimate_minutes("Downtown Library", "Cafe Downtown"), 30);
    }

    #[test]
    fn unknown_places_use_default() {
        let e = KeywordEstimator;
        assert_eq!(e.estimate_minutes("Grandma's", "Piano lessons"), 20);
        assert_eq!(e.estimate_minutes("Dentist", "Mall"), 20);
    }

    #[test]
    fn case_insensitive() {
        let e = KeywordEstimator;
        assert_eq!(e.estimate_minutes("CLINIC", "hospital"), 10);
    }
}
