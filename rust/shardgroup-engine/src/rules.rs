//! Regroup rule definitions.

use serde::{Deserialize, Serialize};
use shardgroup_columnar::{Query, Term};

/// A predicate on one field: `value == term`, or `value <= term` when
/// `inequality` is set. String inequalities compare bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegroupCondition {
    pub field: String,
    pub term: Term,
    #[serde(default)]
    pub inequality: bool,
}

impl RegroupCondition {
    pub fn int_eq(field: &str, term: i64) -> Self {
        RegroupCondition {
            field: field.to_string(),
            term: Term::Int(term),
            inequality: false,
        }
    }

    pub fn int_le(field: &str, term: i64) -> Self {
        RegroupCondition {
            inequality: true,
            ..Self::int_eq(field, term)
        }
    }

    pub fn string_eq(field: &str, term: &str) -> Self {
        RegroupCondition {
            field: field.to_string(),
            term: Term::Str(term.to_string()),
            inequality: false,
        }
    }

    pub fn string_le(field: &str, term: &str) -> Self {
        RegroupCondition {
            inequality: true,
            ..Self::string_eq(field, term)
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self.term, Term::Int(_))
    }

    /// Whether a document holding `value` in this condition's int field matches.
    pub fn matches_int(&self, value: i64) -> bool {
        match self.term {
            Term::Int(term) if self.inequality => value <= term,
            Term::Int(term) => value == term,
            Term::Str(_) => false,
        }
    }

    /// Whether a document holding `value` in this condition's string field matches.
    pub fn matches_str(&self, value: &str) -> bool {
        match &self.term {
            Term::Str(term) if self.inequality => value <= term.as_str(),
            Term::Str(term) => value == term.as_str(),
            Term::Int(_) => false,
        }
    }
}

/// Moves documents of `target_group` to `positive_group` when `condition`
/// holds and to `negative_group` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRemapRule {
    pub target_group: u32,
    pub condition: RegroupCondition,
    pub negative_group: u32,
    pub positive_group: u32,
}

/// Moves documents of `target_group` to the positive group of the first
/// condition they satisfy, or to `negative_group` if none holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMultiRemapRule {
    pub target_group: u32,
    pub negative_group: u32,
    pub positive_groups: Vec<u32>,
    pub conditions: Vec<RegroupCondition>,
}

impl GroupMultiRemapRule {
    /// Largest group the rule can send a document to.
    pub fn max_group(&self) -> u32 {
        self.positive_groups
            .iter()
            .copied()
            .fold(self.negative_group, u32::max)
    }

    /// Whether every outcome of the rule is its own target.
    pub fn is_identity(&self) -> bool {
        self.negative_group == self.target_group
            && self.positive_groups.iter().all(|&g| g == self.target_group)
    }
}

impl From<&GroupRemapRule> for GroupMultiRemapRule {
    fn from(rule: &GroupRemapRule) -> Self {
        GroupMultiRemapRule {
            target_group: rule.target_group,
            negative_group: rule.negative_group,
            positive_groups: vec![rule.positive_group],
            conditions: vec![rule.condition.clone()],
        }
    }
}

/// Moves documents of `target_group` to `positive_group` when they match
/// `query` and to `negative_group` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRemapRule {
    pub target_group: u32,
    pub query: Query,
    pub negative_group: u32,
    pub positive_group: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_matching() {
        assert!(RegroupCondition::int_eq("x", 5).matches_int(5));
        assert!(!RegroupCondition::int_eq("x", 5).matches_int(4));
        assert!(RegroupCondition::int_le("x", 5).matches_int(-100));
        assert!(!RegroupCondition::int_le("x", 5).matches_int(6));
        assert!(RegroupCondition::string_le("s", "m").matches_str("abc"));
        assert!(!RegroupCondition::string_le("s", "m").matches_str("n"));
        assert!(!RegroupCondition::string_eq("s", "5").matches_int(5));
    }

    #[test]
    fn test_multi_rule_helpers() {
        let rule = GroupMultiRemapRule {
            target_group: 2,
            negative_group: 4,
            positive_groups: vec![7, 3],
            conditions: vec![
                RegroupCondition::int_eq("x", 1),
                RegroupCondition::int_eq("x", 2),
            ],
        };
        assert_eq!(rule.max_group(), 7);
        assert!(!rule.is_identity());

        let single = GroupRemapRule {
            target_group: 1,
            condition: RegroupCondition::string_eq("s", "a"),
            negative_group: 1,
            positive_group: 1,
        };
        assert!(GroupMultiRemapRule::from(&single).is_identity());
    }

    #[test]
    fn test_rule_from_json() {
        let json = r#"{
            "target_group": 1,
            "negative_group": 1,
            "positive_groups": [2],
            "conditions": [{"field": "x", "term": 5}]
        }"#;
        let rule: GroupMultiRemapRule = serde_json::from_str(json).unwrap();
        assert_eq!(rule.conditions[0], RegroupCondition::int_eq("x", 5));
    }
}
