//! Two-pass regroups: a positive pass over matching documents, then a
//! negative pass over the rest of the targeted groups.

use std::collections::BTreeMap;

use itertools::Itertools;
use regex::Regex;
use shardgroup_bits::{DocBitSet, ReservedDocBitSet};
use shardgroup_columnar::{
    DocIdStream, QuerySearcher, Term, reader::for_each_doc_chunk,
};
use shardgroup_common::{Error, Result};

use super::{Scan, TermScan, rewrite_sequential};
use crate::{
    GroupLookup,
    buffers_pool::ScratchBuffers,
    rules::{GroupRemapRule, QueryRemapRule, RegroupCondition},
    validate::index_single_rules,
};

/// Applies single-condition rules, each targeting a different group.
///
/// A document matching its rule's condition moves to the positive group;
/// other documents of a targeted group move to the negative group, and
/// documents of untargeted groups move to 0.
pub fn regroup_rules(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    rules: &[GroupRemapRule],
) -> Result<u32> {
    let num_groups = lookup.num_groups();
    if num_groups <= 1 {
        return Ok(num_groups);
    }

    let _index = scan.memory.reserve(num_groups as u64 * 8)?;
    let by_target = index_single_rules(rules, num_groups)?;
    let max_group = by_target
        .iter()
        .flatten()
        .map(|r| r.negative_group.max(r.positive_group))
        .max()
        .unwrap_or(0);
    lookup.grow_to(max_group, scan.memory)?;
    let mut remapped = ReservedDocBitSet::empty(scan.num_docs(), scan.memory)?;

    let mut int_fields: BTreeMap<&str, Vec<&RegroupCondition>> = BTreeMap::new();
    let mut string_fields: BTreeMap<&str, Vec<&RegroupCondition>> = BTreeMap::new();
    for rule in by_target.iter().flatten() {
        let condition = &rule.condition;
        let fields = if condition.is_int() {
            &mut int_fields
        } else {
            &mut string_fields
        };
        fields.entry(&condition.field).or_default().push(condition);
    }

    let mut pass = ConditionPass {
        by_target: &by_target,
        remapped: &mut remapped,
    };
    for (field, conditions) in int_fields {
        let plan = TermPlan::new(conditions.iter().filter_map(|c| match c.term {
            Term::Int(v) => Some((v, c.inequality)),
            Term::Str(_) => None,
        }));
        let terms = scan.reader.int_terms(field);
        pass.apply_field(lookup, field, true, plan, terms, scan.buffers, |c, t| {
            c.matches_int(*t)
        });
    }
    for (field, conditions) in string_fields {
        let plan = TermPlan::new(conditions.iter().filter_map(|c| match &c.term {
            Term::Str(s) => Some((s.clone(), c.inequality)),
            Term::Int(_) => None,
        }));
        let terms = scan.reader.string_terms(field);
        pass.apply_field(lookup, field, false, plan, terms, scan.buffers, |c, t| {
            c.matches_str(t)
        });
    }

    rewrite_sequential(lookup, scan.buffers, |doc, group| {
        if remapped.contains(doc as usize) {
            group
        } else {
            by_target
                .get(group as usize)
                .copied()
                .flatten()
                .map_or(0, |r| r.negative_group)
        }
    });
    Ok(lookup.recalculate_num_groups())
}

/// Terms of one field that can satisfy some condition: every term up to the
/// largest inequality threshold, plus the equality terms above it.
struct TermPlan<T> {
    max_inequality: Option<T>,
    point_terms: Vec<T>,
}

impl<T: Ord + Clone> TermPlan<T> {
    fn new(conditions: impl Iterator<Item = (T, bool)>) -> TermPlan<T> {
        let mut max_inequality: Option<T> = None;
        let mut equalities = Vec::new();
        for (term, inequality) in conditions {
            if inequality {
                if max_inequality.as_ref().is_none_or(|m| term > *m) {
                    max_inequality = Some(term);
                }
            } else {
                equalities.push(term);
            }
        }
        let point_terms = equalities
            .into_iter()
            .filter(|t| max_inequality.as_ref().is_none_or(|m| t > m))
            .sorted()
            .dedup()
            .collect();
        TermPlan {
            max_inequality,
            point_terms,
        }
    }
}

struct ConditionPass<'r, 'b> {
    by_target: &'r [Option<&'r GroupRemapRule>],
    remapped: &'b mut DocBitSet,
}

impl ConditionPass<'_, '_> {
    #[allow(clippy::too_many_arguments)]
    fn apply_field<S: TermScan>(
        &mut self,
        lookup: &mut GroupLookup,
        field: &str,
        is_int: bool,
        plan: TermPlan<S::Term>,
        mut terms: S,
        buffers: &mut ScratchBuffers,
        matches: impl Fn(&RegroupCondition, &S::Term) -> bool,
    ) {
        log::debug!(
            "single-rule pass over '{field}': max inequality {:?}, {} point terms",
            plan.max_inequality,
            plan.point_terms.len()
        );
        let mut visit = |term: &S::Term, stream: &mut dyn DocIdStream| {
            for_each_doc_chunk(stream, &mut buffers.doc_ids, |docs| {
                for &doc in docs {
                    if self.remapped.contains(doc as usize) {
                        continue;
                    }
                    let group = lookup.get(doc);
                    let Some(rule) = self.by_target.get(group as usize).copied().flatten() else {
                        continue;
                    };
                    let condition = &rule.condition;
                    if condition.field == field
                        && condition.is_int() == is_int
                        && matches(condition, term)
                    {
                        lookup.set(doc, rule.positive_group);
                        self.remapped.set(doc as usize);
                    }
                }
            });
        };

        if let Some(max) = &plan.max_inequality {
            terms.rewind();
            while terms.advance() {
                let term = terms.current();
                if term > *max {
                    break;
                }
                visit(&term, terms.docs().as_mut());
            }
        }
        for term in &plan.point_terms {
            if terms.seek_exact(term) {
                visit(term, terms.docs().as_mut());
            }
        }
    }
}

/// Target group and its two destinations.
#[derive(Debug, Clone, Copy)]
pub struct Split {
    pub target: u32,
    pub negative: u32,
    pub positive: u32,
}

impl Split {
    pub fn new(target: u32, negative: u32, positive: u32) -> Split {
        Split {
            target,
            negative,
            positive,
        }
    }
}

/// Moves documents of the target group holding any of `terms` in an int
/// field to the positive group, the rest of the target group to the negative.
pub fn int_or_regroup(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    field: &str,
    terms: &[i64],
    split: Split,
) -> Result<u32> {
    let mut wanted = terms.to_vec();
    wanted.sort_unstable();
    wanted.dedup();
    let reader = scan.reader;
    or_regroup_terms(lookup, scan, reader.int_terms(field), wanted, split)
}

/// String counterpart of [`int_or_regroup`].
pub fn string_or_regroup(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    field: &str,
    terms: &[String],
    split: Split,
) -> Result<u32> {
    let mut wanted = terms.to_vec();
    wanted.sort_unstable();
    wanted.dedup();
    let reader = scan.reader;
    or_regroup_terms(lookup, scan, reader.string_terms(field), wanted, split)
}

fn or_regroup_terms<S: TermScan>(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    mut iter: S,
    wanted: Vec<S::Term>,
    split: Split,
) -> Result<u32> {
    let num_groups = lookup.num_groups();
    if num_groups <= 1 {
        return Ok(num_groups);
    }
    lookup.grow_to(split.negative.max(split.positive), scan.memory)?;
    let mut remapped = ReservedDocBitSet::empty(scan.num_docs(), scan.memory)?;
    for term in &wanted {
        if iter.seek_exact(term) {
            mark_target(lookup, iter.docs().as_mut(), scan.buffers, &mut remapped, split);
        }
    }
    finish_split(lookup, scan.buffers, &remapped, split)
}

/// Splits the target group by whether a string term fully matches `pattern`.
///
/// Only available while the session holds at most one real group.
pub fn regex_regroup(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    field: &str,
    pattern: &str,
    split: Split,
) -> Result<u32> {
    let num_groups = lookup.num_groups();
    if num_groups > 2 {
        return Err(Error::illegal_state(format!(
            "regex regroup needs at most one group, session has {}",
            num_groups - 1
        )));
    }
    if num_groups <= 1 {
        return Ok(num_groups);
    }
    let regex = Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| Error::invalid_regex(pattern, e))?;

    lookup.grow_to(split.negative.max(split.positive), scan.memory)?;
    let mut remapped = ReservedDocBitSet::empty(scan.num_docs(), scan.memory)?;
    let mut iter = scan.reader.string_terms(field);
    iter.rewind();
    while iter.advance() {
        if regex.is_match(iter.term()) {
            mark_target(lookup, iter.docs().as_mut(), scan.buffers, &mut remapped, split);
        }
    }
    finish_split(lookup, scan.buffers, &remapped, split)
}

/// Evaluates the rule's query and splits its target group by the result.
pub fn regroup_query(lookup: &mut GroupLookup, scan: Scan<'_>, rule: &QueryRemapRule) -> Result<u32> {
    let num_groups = lookup.num_groups();
    if num_groups <= 1 {
        return Ok(num_groups);
    }
    let matches = QuerySearcher::new(scan.reader, scan.memory).search(&rule.query)?;
    lookup.grow_to(rule.negative_group.max(rule.positive_group), scan.memory)?;
    lookup.bit_set_regroup(
        &matches,
        rule.target_group,
        rule.negative_group,
        rule.positive_group,
    );
    Ok(lookup.recalculate_num_groups())
}

/// Moves streamed documents of the target group to the positive group.
fn mark_target(
    lookup: &mut GroupLookup,
    stream: &mut dyn DocIdStream,
    buffers: &mut ScratchBuffers,
    remapped: &mut DocBitSet,
    split: Split,
) {
    for_each_doc_chunk(stream, &mut buffers.doc_ids, |docs| {
        for &doc in docs {
            if !remapped.contains(doc as usize) && lookup.get(doc) == split.target {
                lookup.set(doc, split.positive);
                remapped.set(doc as usize);
            }
        }
    });
}

/// Moves the unmarked documents of the target group to the negative group.
fn finish_split(
    lookup: &mut GroupLookup,
    buffers: &mut ScratchBuffers,
    remapped: &DocBitSet,
    split: Split,
) -> Result<u32> {
    rewrite_sequential(lookup, buffers, |doc, group| {
        if group == split.target && !remapped.contains(doc as usize) {
            split.negative
        } else {
            group
        }
    });
    Ok(lookup.recalculate_num_groups())
}

#[cfg(test)]
mod tests {
    use shardgroup_columnar::{MemoryShard, Query};

    use super::*;
    use crate::regroup::testing::Fixture;

    fn shard() -> MemoryShard {
        MemoryShard::builder(8)
            .int_column("x", [1, 2, 3, 4, 5, 6, 7, 8])
            .string_column("s", ["apple", "banana", "cherry", "apple", "date", "fig", "grape", "kiwi"])
            .build()
    }

    fn groups(lookup: &GroupLookup) -> Vec<u32> {
        lookup.iter().collect()
    }

    #[test]
    fn test_regroup_rules_mixed_fields() {
        let mut fx = Fixture::new(shard());
        let mut lookup = GroupLookup::constant(1, 8);
        let n = int_or_regroup(&mut lookup, fx.scan(), "x", &[1, 2, 3, 4], Split::new(1, 2, 1)).unwrap();
        assert_eq!(n, 3);
        assert_eq!(groups(&lookup), vec![1, 1, 1, 1, 2, 2, 2, 2]);

        let rules = vec![
            GroupRemapRule {
                target_group: 1,
                condition: RegroupCondition::int_le("x", 2),
                negative_group: 3,
                positive_group: 4,
            },
            GroupRemapRule {
                target_group: 2,
                condition: RegroupCondition::string_eq("s", "fig"),
                negative_group: 5,
                positive_group: 6,
            },
        ];
        let n = regroup_rules(&mut lookup, fx.scan(), &rules).unwrap();
        assert_eq!(groups(&lookup), vec![4, 4, 3, 3, 5, 6, 5, 5]);
        assert_eq!(n, 7);
    }

    #[test]
    fn test_regroup_rules_untargeted_groups_are_dropped() {
        let mut fx = Fixture::new(shard());
        let mut lookup = GroupLookup::constant(1, 8);
        int_or_regroup(&mut lookup, fx.scan(), "x", &[8], Split::new(1, 1, 2)).unwrap();
        let rules = vec![GroupRemapRule {
            target_group: 2,
            condition: RegroupCondition::int_eq("x", 8),
            negative_group: 1,
            positive_group: 1,
        }];
        let n = regroup_rules(&mut lookup, fx.scan(), &rules).unwrap();
        assert_eq!(groups(&lookup), vec![0, 0, 0, 0, 0, 0, 0, 1]);
        assert_eq!(n, 2);
    }

    #[test]
    fn test_regroup_rules_rejects_duplicate_targets() {
        let mut fx = Fixture::new(shard());
        let mut lookup = GroupLookup::constant(1, 8);
        let rule = GroupRemapRule {
            target_group: 1,
            condition: RegroupCondition::int_eq("x", 1),
            negative_group: 1,
            positive_group: 2,
        };
        let err = regroup_rules(&mut lookup, fx.scan(), &[rule.clone(), rule]).unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(lookup.is_constant());
        assert_eq!(fx.memory.used(), 0);
    }

    #[test]
    fn test_string_or_regroup() {
        let mut fx = Fixture::new(shard());
        let mut lookup = GroupLookup::constant(1, 8);
        let terms = vec!["apple".to_string(), "kiwi".to_string(), "missing".to_string()];
        let n = string_or_regroup(&mut lookup, fx.scan(), "s", &terms, Split::new(1, 0, 1)).unwrap();
        assert_eq!(groups(&lookup), vec![1, 0, 0, 1, 0, 0, 0, 1]);
        assert_eq!(n, 2);
    }

    #[test]
    fn test_regex_regroup_full_match() {
        let mut fx = Fixture::new(shard());
        let mut lookup = GroupLookup::constant(1, 8);
        let n = regex_regroup(&mut lookup, fx.scan(), "s", "[a-c].*e", Split::new(1, 1, 2)).unwrap();
        // "apple" matches; "banana" and "cherry" do not end in 'e'.
        assert_eq!(groups(&lookup), vec![2, 1, 1, 2, 1, 1, 1, 1]);
        assert_eq!(n, 3);

        let err = regex_regroup(&mut lookup, fx.scan(), "s", "a", Split::new(1, 1, 2)).unwrap_err();
        assert!(err.is_illegal_state());
    }

    #[test]
    fn test_regex_regroup_invalid_pattern() {
        let mut fx = Fixture::new(shard());
        let mut lookup = GroupLookup::constant(1, 8);
        let err = regex_regroup(&mut lookup, fx.scan(), "s", "(", Split::new(1, 1, 2)).unwrap_err();
        assert!(matches!(
            err.kind(),
            shardgroup_common::ErrorKind::InvalidRegex { .. }
        ));
        assert!(lookup.is_constant());
    }

    #[test]
    fn test_regroup_query() {
        let mut fx = Fixture::new(shard());
        let mut lookup = GroupLookup::constant(1, 8);
        let rule = QueryRemapRule {
            target_group: 1,
            query: Query::Or(vec![
                Query::int_term("x", 2),
                Query::string_term("s", "grape"),
            ]),
            negative_group: 0,
            positive_group: 3,
        };
        let n = regroup_query(&mut lookup, fx.scan(), &rule).unwrap();
        assert_eq!(groups(&lookup), vec![0, 3, 0, 0, 0, 0, 3, 0]);
        assert_eq!(n, 4);
    }

    #[test]
    fn test_filtered_out_is_noop() {
        let mut fx = Fixture::new(shard());
        let mut lookup = GroupLookup::constant(0, 8);
        let n = int_or_regroup(&mut lookup, fx.scan(), "x", &[1], Split::new(1, 2, 3)).unwrap();
        assert_eq!(n, 1);
        assert!(lookup.is_constant());
    }
}
