//! Pure checks and bounds over rule sets. Nothing here touches the shard.

use ahash::{AHashMap, AHashSet};
use shardgroup_columnar::Term;
use shardgroup_common::{Error, Result};

use crate::rules::{GroupMultiRemapRule, GroupRemapRule};

/// Checks the shape of every rule and returns the highest target group.
///
/// Every rule needs one positive group per condition and a non-zero target,
/// and no two rules may share a target.
pub fn validate_targets(rules: &[GroupMultiRemapRule]) -> Result<u32> {
    let mut seen = AHashSet::with_capacity(rules.len());
    let mut highest = 0;
    for (i, rule) in rules.iter().enumerate() {
        if rule.conditions.len() != rule.positive_groups.len() {
            return Err(Error::invalid_arg(
                "rules",
                format!(
                    "rule {i} has {} conditions but {} positive groups",
                    rule.conditions.len(),
                    rule.positive_groups.len()
                ),
            ));
        }
        if rule.target_group == 0 {
            return Err(Error::invalid_arg(
                "rules",
                format!("rule {i} targets group 0"),
            ));
        }
        if !seen.insert(rule.target_group) {
            return Err(Error::invalid_arg(
                "rules",
                format!("more than one rule targets group {}", rule.target_group),
            ));
        }
        highest = highest.max(rule.target_group);
    }
    Ok(highest)
}

/// The field of a rule whose conditions are all equality tests on one field
/// of one type, or `None` if the rule mixes fields, types or inequalities.
pub fn equality_split_field(rule: &GroupMultiRemapRule) -> Option<&str> {
    let first = rule.conditions.first()?;
    let is_split = rule.conditions.iter().all(|c| {
        !c.inequality && c.field == first.field && c.is_int() == first.is_int()
    });
    is_split.then_some(first.field.as_str())
}

/// Rejects equality splits that send the same term to different groups.
pub fn validate_equality_splits(rules: &[GroupMultiRemapRule]) -> Result<()> {
    for rule in rules {
        let Some(field) = equality_split_field(rule) else {
            continue;
        };
        let mut destinations: AHashMap<&Term, u32> = AHashMap::with_capacity(rule.conditions.len());
        for (condition, &positive) in rule.conditions.iter().zip(&rule.positive_groups) {
            if let Some(&previous) = destinations.get(&condition.term) {
                if previous != positive {
                    return Err(Error::invalid_arg(
                        "rules",
                        format!(
                            "equality split of group {} on '{field}' sends {:?} to both {previous} and {positive}",
                            rule.target_group, condition.term
                        ),
                    ));
                }
            } else {
                destinations.insert(&condition.term, positive);
            }
        }
    }
    Ok(())
}

/// Largest group any rule can produce.
pub fn find_max_group(rules: &[GroupMultiRemapRule]) -> u32 {
    rules.iter().map(|r| r.max_group()).max().unwrap_or(0)
}

/// Number of conditions across all rules; condition indexes run `1..=` this.
pub fn find_max_intermediate_group(rules: &[GroupMultiRemapRule]) -> u32 {
    rules.iter().map(|r| r.conditions.len() as u32).sum()
}

/// Whether applying `rules` to a lookup with `num_groups` groups would leave
/// every document where it is.
pub fn is_identity_rule_set(rules: &[GroupMultiRemapRule], num_groups: u32) -> bool {
    let mut covered = 0u32;
    for rule in rules.iter().filter(|r| r.target_group < num_groups) {
        if !rule.is_identity() {
            return false;
        }
        covered += 1;
    }
    covered + 1 == num_groups
}

/// Checks single-condition rules and indexes them by target group.
///
/// Targets at or above `num_groups` hold no documents and are dropped.
pub fn index_single_rules(
    rules: &[GroupRemapRule],
    num_groups: u32,
) -> Result<Vec<Option<&GroupRemapRule>>> {
    let mut by_target: Vec<Option<&GroupRemapRule>> = vec![None; num_groups as usize];
    let mut seen = AHashSet::with_capacity(rules.len());
    for rule in rules {
        if rule.target_group == 0 {
            return Err(Error::invalid_arg("rules", "rule targets group 0"));
        }
        if !seen.insert(rule.target_group) {
            return Err(Error::invalid_arg(
                "rules",
                format!("more than one rule targets group {}", rule.target_group),
            ));
        }
        if let Some(slot) = by_target.get_mut(rule.target_group as usize) {
            *slot = Some(rule);
        }
    }
    Ok(by_target)
}

/// Checks a percentile table for random multi-way regroups.
pub fn validate_percentages(percentages: &[f64], result_groups: &[u32]) -> Result<()> {
    if percentages.len() + 1 != result_groups.len() {
        return Err(Error::invalid_arg(
            "percentages",
            format!(
                "{} percentages need {} result groups, got {}",
                percentages.len(),
                percentages.len() + 1,
                result_groups.len()
            ),
        ));
    }
    for (i, &p) in percentages.iter().enumerate() {
        if !(0.0..=1.0).contains(&p) {
            return Err(Error::invalid_arg(
                "percentages",
                format!("percentage {p} at {i} is outside [0, 1]"),
            ));
        }
        if i > 0 && p < percentages[i - 1] {
            return Err(Error::invalid_arg(
                "percentages",
                "percentages must be in ascending order",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RegroupCondition;

    fn rule(target: u32, conditions: Vec<RegroupCondition>, positives: Vec<u32>) -> GroupMultiRemapRule {
        GroupMultiRemapRule {
            target_group: target,
            negative_group: target,
            positive_groups: positives,
            conditions,
        }
    }

    #[test]
    fn test_validate_targets() {
        let rules = vec![
            rule(3, vec![RegroupCondition::int_eq("x", 1)], vec![4]),
            rule(1, vec![], vec![]),
        ];
        assert_eq!(validate_targets(&rules).unwrap(), 3);

        let dup = vec![rule(2, vec![], vec![]), rule(2, vec![], vec![])];
        assert!(validate_targets(&dup).unwrap_err().is_invalid_argument());

        let zero = vec![rule(0, vec![], vec![])];
        assert!(validate_targets(&zero).is_err());

        let mismatched = vec![rule(1, vec![RegroupCondition::int_eq("x", 1)], vec![])];
        assert!(validate_targets(&mismatched).is_err());
    }

    #[test]
    fn test_equality_split_detection() {
        let split = rule(
            1,
            vec![RegroupCondition::string_eq("s", "a"), RegroupCondition::string_eq("s", "b")],
            vec![2, 3],
        );
        assert_eq!(equality_split_field(&split), Some("s"));

        let mixed = rule(
            1,
            vec![RegroupCondition::string_eq("s", "a"), RegroupCondition::string_le("s", "b")],
            vec![2, 3],
        );
        assert_eq!(equality_split_field(&mixed), None);

        let two_fields = rule(
            1,
            vec![RegroupCondition::int_eq("x", 1), RegroupCondition::int_eq("y", 1)],
            vec![2, 3],
        );
        assert_eq!(equality_split_field(&two_fields), None);
    }

    #[test]
    fn test_conflicting_equality_split() {
        let ok = rule(
            1,
            vec![RegroupCondition::int_eq("x", 1), RegroupCondition::int_eq("x", 1)],
            vec![2, 2],
        );
        assert!(validate_equality_splits(&[ok]).is_ok());

        let conflict = rule(
            1,
            vec![RegroupCondition::int_eq("x", 1), RegroupCondition::int_eq("x", 1)],
            vec![2, 3],
        );
        assert!(validate_equality_splits(&[conflict]).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_bounds() {
        let rules = vec![
            rule(1, vec![RegroupCondition::int_eq("x", 1)], vec![9]),
            rule(
                2,
                vec![RegroupCondition::int_eq("x", 1), RegroupCondition::int_le("y", 0)],
                vec![3, 4],
            ),
        ];
        assert_eq!(find_max_group(&rules), 9);
        assert_eq!(find_max_intermediate_group(&rules), 3);
        assert_eq!(find_max_group(&[]), 0);
    }

    #[test]
    fn test_identity_rule_set() {
        let identity = vec![
            rule(1, vec![RegroupCondition::int_eq("x", 1)], vec![1]),
            rule(2, vec![], vec![]),
            // Targets a group with no documents.
            rule(7, vec![RegroupCondition::int_eq("x", 1)], vec![5]),
        ];
        assert!(is_identity_rule_set(&identity, 3));
        assert!(!is_identity_rule_set(&identity[..1], 3));
        assert!(!is_identity_rule_set(&identity, 8));
    }

    #[test]
    fn test_index_single_rules() {
        let rules = vec![
            GroupRemapRule {
                target_group: 1,
                condition: RegroupCondition::int_eq("x", 1),
                negative_group: 1,
                positive_group: 2,
            },
            GroupRemapRule {
                target_group: 5,
                condition: RegroupCondition::int_eq("x", 1),
                negative_group: 1,
                positive_group: 2,
            },
        ];
        let indexed = index_single_rules(&rules, 3).unwrap();
        assert_eq!(indexed.len(), 3);
        assert!(indexed[1].is_some());
        assert!(indexed[2].is_none());

        let dup = vec![rules[0].clone(), rules[0].clone()];
        assert!(index_single_rules(&dup, 3).is_err());
    }

    #[test]
    fn test_validate_percentages() {
        assert!(validate_percentages(&[0.25, 0.5], &[1, 2, 3]).is_ok());
        assert!(validate_percentages(&[], &[1]).is_ok());
        assert!(validate_percentages(&[0.5], &[1, 2, 3]).is_err());
        assert!(validate_percentages(&[0.6, 0.5], &[1, 2, 3]).is_err());
        assert!(validate_percentages(&[1.5], &[1, 2]).is_err());
        assert!(validate_percentages(&[f64::NAN], &[1, 2]).is_err());
    }
}
