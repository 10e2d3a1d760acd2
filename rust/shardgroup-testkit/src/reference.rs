//! Per-document reference evaluation of regroups.
//!
//! Every function takes the assignment before the regroup and returns the
//! assignment after it, evaluating each document on its own.

use shardgroup_columnar::{MemoryShard, Term};
use shardgroup_engine::{GroupMultiRemapRule, GroupRemapRule, RegroupCondition};

/// `1 + max group`, or 1 for an empty assignment.
pub fn num_groups(groups: &[u32]) -> u32 {
    groups.iter().copied().max().unwrap_or(0) + 1
}

/// Whether `doc` satisfies `condition`.
pub fn matches(shard: &MemoryShard, doc: u32, condition: &RegroupCondition) -> bool {
    match &condition.term {
        Term::Int(_) => shard
            .int_values(&condition.field, doc)
            .into_iter()
            .any(|v| condition.matches_int(v)),
        Term::Str(_) => shard
            .string_values(&condition.field, doc)
            .iter()
            .any(|v| condition.matches_str(v)),
    }
}

/// Multi-condition rules: a document of a targeted group takes the positive
/// group of the first condition it satisfies, or the negative group; a
/// document of an untargeted group goes to 0.
pub fn regroup_multi(shard: &MemoryShard, groups: &[u32], rules: &[GroupMultiRemapRule]) -> Vec<u32> {
    if num_groups(groups) <= 1 {
        return groups.to_vec();
    }
    groups
        .iter()
        .enumerate()
        .map(|(doc, &group)| {
            let Some(rule) = rules.iter().find(|r| r.target_group == group) else {
                return 0;
            };
            rule.conditions
                .iter()
                .position(|c| matches(shard, doc as u32, c))
                .map_or(rule.negative_group, |i| rule.positive_groups[i])
        })
        .collect()
}

/// Single-condition rules, same semantics as [`regroup_multi`].
pub fn regroup_rules(shard: &MemoryShard, groups: &[u32], rules: &[GroupRemapRule]) -> Vec<u32> {
    let multi: Vec<GroupMultiRemapRule> = rules.iter().map(GroupMultiRemapRule::from).collect();
    regroup_multi(shard, groups, &multi)
}

/// Interval bucketing of `values` with gutters unless `no_gutters`.
pub fn metric_regroup(
    groups: &[u32],
    values: &[i64],
    min: i64,
    max: i64,
    interval: i64,
    no_gutters: bool,
) -> Vec<u32> {
    if num_groups(groups) <= 1 {
        return groups.to_vec();
    }
    let num_buckets = ((max as i128 - 1 - min as i128) / interval as i128 + 1) as u64;
    let total = if no_gutters { num_buckets } else { num_buckets + 2 };
    groups
        .iter()
        .zip(values)
        .map(|(&group, &value)| {
            let bucket = if value < min {
                if no_gutters { 0 } else { num_buckets + 1 }
            } else if value >= max {
                if no_gutters { 0 } else { num_buckets + 2 }
            } else {
                ((value as i128 - min as i128) / interval as i128) as u64 + 1
            };
            if group == 0 || bucket == 0 {
                0
            } else {
                ((group as u64 - 1) * total + bucket) as u32
            }
        })
        .collect()
}
