use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::model::{RuleCategory, Severity};

/// A detection rule. Severity is the rule's nominal level; individual
/// conflicts may be graded differently by the rule's own logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub name: String,
    pub category: RuleCategory,
    pub severity: Severity,
    pub enabled: bool,
}

impl Rule {
    pub fn new(category: RuleCategory, name: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: category.as_str().replace('_', "-"),
            name: name.into(),
            category,
            severity,
            enabled: true,
        }
    }
}

/// The operator-visible rule set. One rule per category, in evaluation order.
pub struct RuleCatalog {
    rules: RwLock<Vec<Rule>>,
}

impl Default for RuleCatalog {
    fn default() -> Self {
        Self::new(Self::default_rules())
    }
}

impl RuleCatalog {
    /// Later rules repeating an earlier rule's category are ignored.
    pub fn new(rules: Vec<Rule>) -> Self {
        let mut unique: Vec<Rule> = Vec::with_capacity(rules.len());
        for rule in rules {
            if unique.iter().any(|r| r.category == rule.category) {
                tracing::warn!(rule = %rule.id, "duplicate rule category {}, ignoring", rule.category);
                continue;
            }
            unique.push(rule);
        }
        Self {
            rules: RwLock::new(unique),
        }
    }

    pub fn default_rules() -> Vec<Rule> {
        vec![
            Rule::new(RuleCategory::DoubleBooking, "Double booking", Severity::Critical),
            Rule::new(RuleCategory::TimeOverlap, "Overlapping events", Severity::Major),
            Rule::new(RuleCategory::FamilyConflict, "Family event clash", Severity::Major),
            Rule::new(RuleCategory::LocationConflict, "Different places at once", Severity::Major),
            Rule::new(RuleCategory::TravelTime, "Not enough travel time", Severity::Minor),
        ]
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Enabled rules in evaluation order.
    pub fn enabled(&self) -> Vec<Rule> {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect()
    }

    pub fn is_enabled(&self, category: RuleCategory) -> bool {
        self.rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|r| r.category == category && r.enabled)
    }

    /// Toggle a rule. Returns false if the catalog has no rule for `category`.
    pub fn set_enabled(&self, category: RuleCategory, enabled: bool) -> bool {
        let mut rules = self.rules.write().unwrap_or_else(|e| e.into_inner());
        match rules.iter_mut().find(|r| r.category == category) {
            Some(rule) => {
                if rule.enabled != enabled {
                    tracing::info!(rule = %rule.id, enabled, "rule toggled");
                }
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn set_enabled_by_id(&self, id: &str, enabled: bool) -> bool {
        let category = self
            .rules
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.category);
        category.is_some_and(|c| self.set_enabled(c, enabled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_category_enabled() {
        let catalog = RuleCatalog::default();
        for category in RuleCategory::ALL {
            assert!(catalog.is_enabled(category), "{category} should be enabled");
        }
        assert_eq!(catalog.enabled().len(), RuleCategory::ALL.len());
    }

    #[test]
    fn toggling_excludes_rule() {
        let catalog = RuleCatalog::default();
        assert!(catalog.set_enabled(RuleCategory::TravelTime, false));
        assert!(!catalog.is_enabled(RuleCategory::TravelTime));
        assert!(catalog.enabled().iter().all(|r| r.category != RuleCategory::TravelTime));
        assert!(catalog.set_enabled_by_id("travel-time", true));
        assert!(catalog.is_enabled(RuleCategory::TravelTime));
    }

    #[test]
    fn unknown_rule_toggle_is_reported() {
        let catalog = RuleCatalog::new(vec![Rule::new(
            RuleCategory::TimeOverlap,
            "overlap",
            Severity::Major,
        )]);
        assert!(!catalog.set_enabled(RuleCategory::FamilyConflict, false));
        assert!(!catalog.set_enabled_by_id("nope", false));
    }

    #[test]
    fn duplicate_categories_are_dropped() {
        let catalog = RuleCatalog::new(vec![
            Rule::new(RuleCategory::TimeOverlap, "first", Severity::Major),
            Rule::new(RuleCategory::TimeOverlap, "second", Severity::Minor),
        ]);
        let rules = catalog.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name, "first");
    }
}
