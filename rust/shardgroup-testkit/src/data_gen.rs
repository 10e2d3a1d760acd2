//! Seeded generators for shards, group assignments and rule sets.

use std::collections::BTreeMap;

use shardgroup_columnar::{MemoryShard, ShardDocument, memory_shard::Values};
use shardgroup_engine::{GroupMultiRemapRule, GroupRemapRule, RegroupCondition};

/// Shape of a generated shard.
#[derive(Debug, Clone)]
pub struct ShardSpec {
    pub num_docs: usize,
    pub int_fields: usize,
    pub string_fields: usize,
    /// Int values are drawn from `-int_range..int_range`.
    pub int_range: i64,
    /// String values are drawn from this many distinct terms.
    pub vocabulary: usize,
    /// Upper bound of values per document and field.
    pub max_values: usize,
    /// Chance that a document has no value in a field.
    pub missing: f64,
}

impl Default for ShardSpec {
    fn default() -> Self {
        ShardSpec {
            num_docs: 200,
            int_fields: 2,
            string_fields: 2,
            int_range: 20,
            vocabulary: 30,
            max_values: 2,
            missing: 0.1,
        }
    }
}

pub fn int_field(i: usize) -> String {
    format!("i{i}")
}

pub fn string_field(i: usize) -> String {
    format!("s{i}")
}

/// String term `k`; terms sort in the same order as `k`.
pub fn string_term(k: usize) -> String {
    format!("t{k:04}")
}

/// Generates a shard in its serde form.
pub fn shard_document(rng: &mut fastrand::Rng, spec: &ShardSpec) -> ShardDocument {
    let mut int_fields = BTreeMap::new();
    for i in 0..spec.int_fields {
        let column = (0..spec.num_docs)
            .map(|_| values(rng, spec, |rng| rng.i64(-spec.int_range..spec.int_range)))
            .collect();
        int_fields.insert(int_field(i), column);
    }
    let mut string_fields = BTreeMap::new();
    for i in 0..spec.string_fields {
        let column = (0..spec.num_docs)
            .map(|_| values(rng, spec, |rng| string_term(rng.usize(..spec.vocabulary))))
            .collect();
        string_fields.insert(string_field(i), column);
    }
    ShardDocument {
        num_docs: spec.num_docs,
        int_fields,
        string_fields,
    }
}

fn values<T>(
    rng: &mut fastrand::Rng,
    spec: &ShardSpec,
    mut value: impl FnMut(&mut fastrand::Rng) -> T,
) -> Option<Values<T>> {
    if rng.f64() < spec.missing {
        return None;
    }
    let count = rng.usize(1..=spec.max_values.max(1));
    if count == 1 {
        Some(Values::One(value(rng)))
    } else {
        Some(Values::Many((0..count).map(|_| value(rng)).collect()))
    }
}

/// Generates a shard ready to be read.
pub fn random_shard(rng: &mut fastrand::Rng, spec: &ShardSpec) -> MemoryShard {
    MemoryShard::try_from(&shard_document(rng, spec)).expect("generated columns match num_docs")
}

/// A shard with one value per document in every field, so field terms and
/// field metrics describe documents identically.
pub fn dense_shard(rng: &mut fastrand::Rng, num_docs: usize, int_range: i64) -> MemoryShard {
    let spec = ShardSpec {
        num_docs,
        int_fields: 1,
        string_fields: 0,
        int_range,
        max_values: 1,
        missing: 0.0,
        ..Default::default()
    };
    random_shard(rng, &spec)
}

/// Assigns every document a group in `0..num_groups`, making sure the
/// largest group is used so the assignment has exactly `num_groups` groups.
pub fn random_groups(rng: &mut fastrand::Rng, num_docs: usize, num_groups: u32) -> Vec<u32> {
    let mut groups: Vec<u32> = (0..num_docs).map(|_| rng.u32(0..num_groups)).collect();
    if let Some(last) = groups.last_mut() {
        *last = num_groups - 1;
    }
    groups
}

/// Shape of a generated rule set.
#[derive(Debug, Clone)]
pub struct RuleSpec {
    /// Groups present before the regroup; targets are drawn from `1..num_groups + 2`.
    pub num_groups: u32,
    pub max_rules: usize,
    pub max_conditions: usize,
    /// Destinations are drawn from `0..=max_new_group`.
    pub max_new_group: u32,
    /// Chance that a condition is an inequality.
    pub inequality: f64,
}

impl Default for RuleSpec {
    fn default() -> Self {
        RuleSpec {
            num_groups: 5,
            max_rules: 5,
            max_conditions: 4,
            max_new_group: 12,
            inequality: 0.3,
        }
    }
}

/// A condition over one of the fields `shard` was generated with.
pub fn random_condition(rng: &mut fastrand::Rng, shard: &ShardSpec, rules: &RuleSpec) -> RegroupCondition {
    let use_int = shard.string_fields == 0 || (shard.int_fields > 0 && rng.bool());
    let inequality = rng.f64() < rules.inequality;
    let mut condition = if use_int {
        // Slightly wider than the value range so some terms match nothing.
        let term = rng.i64(-shard.int_range - 2..shard.int_range + 2);
        RegroupCondition::int_eq(&int_field(rng.usize(..shard.int_fields)), term)
    } else {
        let term = string_term(rng.usize(..shard.vocabulary + 2));
        RegroupCondition::string_eq(&string_field(rng.usize(..shard.string_fields)), &term)
    };
    condition.inequality = inequality;
    condition
}

/// Valid multi-condition rules: distinct non-zero targets, one positive
/// group per condition and no condition repeated within a rule.
pub fn random_multi_rules(
    rng: &mut fastrand::Rng,
    shard: &ShardSpec,
    spec: &RuleSpec,
) -> Vec<GroupMultiRemapRule> {
    let mut targets: Vec<u32> = (1..spec.num_groups + 2).collect();
    rng.shuffle(&mut targets);
    let num_rules = rng.usize(..=spec.max_rules.min(targets.len()));
    targets
        .into_iter()
        .take(num_rules)
        .map(|target_group| {
            let num_conditions = rng.usize(1..=spec.max_conditions.max(1));
            let mut conditions: Vec<RegroupCondition> = Vec::with_capacity(num_conditions);
            while conditions.len() < num_conditions {
                let condition = random_condition(rng, shard, spec);
                if !conditions.contains(&condition) {
                    conditions.push(condition);
                }
            }
            GroupMultiRemapRule {
                target_group,
                negative_group: rng.u32(..=spec.max_new_group),
                positive_groups: (0..num_conditions)
                    .map(|_| rng.u32(..=spec.max_new_group))
                    .collect(),
                conditions,
            }
        })
        .collect()
}

/// Valid single-condition rules with distinct non-zero targets.
pub fn random_single_rules(
    rng: &mut fastrand::Rng,
    shard: &ShardSpec,
    spec: &RuleSpec,
) -> Vec<GroupRemapRule> {
    let single = RuleSpec {
        max_conditions: 1,
        ..spec.clone()
    };
    random_multi_rules(rng, shard, &single)
        .into_iter()
        .map(|rule| GroupRemapRule {
            target_group: rule.target_group,
            negative_group: rule.negative_group,
            positive_group: rule.positive_groups[0],
            condition: rule.conditions.into_iter().next().expect("one condition"),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use shardgroup_columnar::ShardReader;

    use super::*;

    #[test]
    fn test_generation_is_seeded() {
        let spec = ShardSpec::default();
        let a = shard_document(&mut fastrand::Rng::with_seed(7), &spec);
        let b = shard_document(&mut fastrand::Rng::with_seed(7), &spec);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
        let shard = MemoryShard::try_from(&a).unwrap();
        assert_eq!(shard.num_docs(), spec.num_docs);
        assert_eq!(shard.int_fields(), vec!["i0", "i1"]);
    }

    #[test]
    fn test_rules_are_well_formed() {
        let mut rng = fastrand::Rng::with_seed(11);
        let shard = ShardSpec::default();
        let spec = RuleSpec::default();
        for _ in 0..50 {
            let rules = random_multi_rules(&mut rng, &shard, &spec);
            assert!(shardgroup_engine::validate::validate_targets(&rules).is_ok());
            assert!(shardgroup_engine::validate::validate_equality_splits(&rules).is_ok());
        }
    }

    #[test]
    fn test_random_groups_cover_max() {
        let mut rng = fastrand::Rng::with_seed(3);
        let groups = random_groups(&mut rng, 10, 4);
        assert_eq!(groups.iter().max(), Some(&3));
    }
}
