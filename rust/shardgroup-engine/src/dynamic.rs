//! Dynamic metrics: per-document counters owned by the engine that outlive
//! regroups and are adjusted by group or by term.

use std::collections::BTreeMap;

use itertools::Itertools;
use shardgroup_columnar::{ArrayValueLookup, Term, reader::for_each_doc_chunk};
use shardgroup_common::{Error, Result};
use shardgroup_memory::{MemoryReservationContext, Reservation};

use crate::{
    GroupLookup,
    buffers_pool::ScratchBuffers,
    regroup::{Scan, TermScan},
    rules::RegroupCondition,
};

/// One `i32` counter per document, starting at zero. Updates wrap on
/// overflow.
pub struct DynamicMetric {
    values: Vec<i32>,
    _reservation: Reservation,
}

impl DynamicMetric {
    /// Reserves four bytes per document and creates a zeroed metric.
    pub fn new(num_docs: usize, memory: &MemoryReservationContext) -> Result<DynamicMetric> {
        let reservation = memory.reserve(Self::bytes_for(num_docs))?;
        Ok(DynamicMetric {
            values: vec![0; num_docs],
            _reservation: reservation,
        })
    }

    pub fn bytes_for(num_docs: usize) -> u64 {
        (num_docs * std::mem::size_of::<i32>()) as u64
    }

    pub fn values(&self) -> &[i32] {
        &self.values
    }

    #[inline]
    pub fn add(&mut self, doc: u32, delta: i32) {
        let value = &mut self.values[doc as usize];
        *value = value.wrapping_add(delta);
    }

    /// Copies the current values into a lookup that can go on the stat stack.
    pub fn snapshot(&self) -> ArrayValueLookup {
        ArrayValueLookup::new(self.values.iter().map(|&v| v as i64).collect::<Vec<_>>())
    }

    pub fn memory_used(&self) -> u64 {
        Self::bytes_for(self.values.len())
    }
}

impl std::fmt::Debug for DynamicMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicMetric")
            .field("num_docs", &self.values.len())
            .finish_non_exhaustive()
    }
}

/// Adds `deltas[group]` to every document whose group has an entry.
pub fn update_by_group(
    metric: &mut DynamicMetric,
    lookup: &GroupLookup,
    buffers: &mut ScratchBuffers,
    deltas: &[i32],
) {
    let num_docs = lookup.len();
    let chunk = buffers.groups.len().max(1);
    let mut start = 0;
    while start < num_docs {
        let n = chunk.min(num_docs - start);
        let groups = &mut buffers.groups[..n];
        lookup.fill_sequential(start, groups);
        for (i, &group) in groups.iter().enumerate() {
            if let Some(&delta) = deltas.get(group as usize) {
                metric.add((start + i) as u32, delta);
            }
        }
        start += n;
    }
}

/// Adds `deltas[i]` to every document holding the term of `conditions[i]`,
/// whatever its group. Only equality conditions are accepted.
pub fn conditional_update(
    metric: &mut DynamicMetric,
    scan: Scan<'_>,
    conditions: &[RegroupCondition],
    deltas: &[i32],
) -> Result<()> {
    validate_conditions(conditions, deltas.len())?;

    let by_field = conditions
        .iter()
        .zip(deltas)
        .into_group_map_by(|&(c, _)| (c.field.as_str(), c.is_int()));
    for ((field, is_int), entries) in by_field.into_iter().sorted_by_key(|(key, _)| *key) {
        let doc_ids = scan.buffers.doc_ids.as_mut_slice();
        let apply = |delta: &i32, docs: &[u32]| {
            for &doc in docs {
                metric.add(doc, *delta);
            }
        };
        if is_int {
            let terms = entries.iter().filter_map(|&(c, &d)| int_term(c).map(|t| (t, d)));
            visit_terms(scan.reader.int_terms(field), terms, doc_ids, apply);
        } else {
            let terms = entries.iter().filter_map(|&(c, &d)| str_term(c).map(|t| (t, d)));
            visit_terms(scan.reader.string_terms(field), terms, doc_ids, apply);
        }
    }
    Ok(())
}

/// Like [`conditional_update`], but `deltas[i]` only applies to documents
/// of `groups[i]`. When the same group and term appear more than once the
/// last delta wins. Entries for groups that do not exist are skipped.
pub fn group_conditional_update(
    metric: &mut DynamicMetric,
    lookup: &GroupLookup,
    scan: Scan<'_>,
    groups: &[u32],
    conditions: &[RegroupCondition],
    deltas: &[i32],
) -> Result<()> {
    if groups.len() != conditions.len() {
        return Err(Error::invalid_arg(
            "groups",
            format!(
                "{} groups for {} conditions",
                groups.len(),
                conditions.len()
            ),
        ));
    }
    validate_conditions(conditions, deltas.len())?;

    let num_groups = lookup.num_groups();
    let mut int_fields: BTreeMap<&str, BTreeMap<i64, Vec<(u32, i32)>>> = BTreeMap::new();
    let mut string_fields: BTreeMap<&str, BTreeMap<String, Vec<(u32, i32)>>> = BTreeMap::new();
    for ((&group, condition), &delta) in groups.iter().zip(conditions).zip(deltas) {
        if group >= num_groups {
            continue;
        }
        let field = condition.field.as_str();
        match &condition.term {
            Term::Int(term) => int_fields
                .entry(field)
                .or_default()
                .entry(*term)
                .or_default()
                .push((group, delta)),
            Term::Str(term) => string_fields
                .entry(field)
                .or_default()
                .entry(term.clone())
                .or_default()
                .push((group, delta)),
        }
    }

    let _table = scan.memory.reserve(num_groups as u64 * 8)?;
    let mut group_delta: Vec<Option<i32>> = vec![None; num_groups as usize];
    let ScratchBuffers {
        doc_ids,
        groups: doc_groups,
        ..
    } = &mut *scan.buffers;
    let mut apply = |entries: &Vec<(u32, i32)>, docs: &[u32]| {
        for &(group, delta) in entries {
            group_delta[group as usize] = Some(delta);
        }
        let doc_groups = &mut doc_groups[..docs.len()];
        lookup.fill_doc_groups(docs, doc_groups);
        for (&doc, &group) in docs.iter().zip(doc_groups.iter()) {
            if let Some(delta) = group_delta[group as usize] {
                metric.add(doc, delta);
            }
        }
        for &(group, _) in entries {
            group_delta[group as usize] = None;
        }
    };
    for (field, terms) in int_fields {
        visit_terms(scan.reader.int_terms(field), terms, doc_ids.as_mut_slice(), &mut apply);
    }
    for (field, terms) in string_fields {
        visit_terms(scan.reader.string_terms(field), terms, doc_ids.as_mut_slice(), &mut apply);
    }
    Ok(())
}

/// Streams the postings of every listed term the field holds, in term order.
fn visit_terms<S, P>(
    mut terms: S,
    entries: impl IntoIterator<Item = (S::Term, P)>,
    doc_ids: &mut [u32],
    mut f: impl FnMut(&P, &[u32]),
) where
    S: TermScan,
{
    let entries = entries
        .into_iter()
        .sorted_by(|a, b| a.0.cmp(&b.0));
    for (term, payload) in entries {
        if terms.seek_exact(&term) {
            let mut docs = terms.docs();
            for_each_doc_chunk(docs.as_mut(), doc_ids, |chunk| f(&payload, chunk));
        }
    }
}

fn validate_conditions(conditions: &[RegroupCondition], num_deltas: usize) -> Result<()> {
    if conditions.len() != num_deltas {
        return Err(Error::invalid_arg(
            "deltas",
            format!("{num_deltas} deltas for {} conditions", conditions.len()),
        ));
    }
    if let Some(c) = conditions.iter().find(|c| c.inequality) {
        return Err(Error::invalid_arg(
            "conditions",
            format!("inequality condition on '{}' cannot update a metric", c.field),
        ));
    }
    Ok(())
}

fn int_term(condition: &RegroupCondition) -> Option<i64> {
    match condition.term {
        Term::Int(term) => Some(term),
        Term::Str(_) => None,
    }
}

fn str_term(condition: &RegroupCondition) -> Option<String> {
    match &condition.term {
        Term::Str(term) => Some(term.clone()),
        Term::Int(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use shardgroup_columnar::{IntValueLookup, MemoryShard};

    use super::*;
    use crate::regroup::testing::Fixture;

    fn shard() -> MemoryShard {
        let mut builder = MemoryShard::builder(6);
        builder
            .int_column("x", [1, 2, 1, 3, 2, 1])
            .string_column("s", ["a", "b", "c", "a", "b", "c"]);
        builder.add_int("tags", 0, 7).add_int("tags", 0, 8).add_int("tags", 4, 8);
        builder.build()
    }

    fn groups(fx: &Fixture, groups: &[u32]) -> GroupLookup {
        let max = groups.iter().copied().max().unwrap_or(0);
        let mut lookup = GroupLookup::create(max, groups.len(), &fx.memory).unwrap();
        for (doc, &group) in groups.iter().enumerate() {
            lookup.set(doc as u32, group);
        }
        lookup.recalculate_num_groups();
        lookup
    }

    #[test]
    fn test_metric_reserves_four_bytes_per_doc() {
        let memory = MemoryReservationContext::new(100);
        let metric = DynamicMetric::new(20, &memory).unwrap();
        assert_eq!(memory.used(), 80);
        assert_eq!(metric.memory_used(), 80);
        assert!(DynamicMetric::new(6, &memory).unwrap_err().is_out_of_memory());
        drop(metric);
        assert_eq!(memory.used(), 0);
    }

    #[test]
    fn test_update_by_group() {
        let mut fx = Fixture::new(shard());
        let lookup = groups(&fx, &[0, 1, 2, 1, 3, 2]);
        let mut metric = DynamicMetric::new(6, &fx.memory).unwrap();
        // Group 3 has no entry and keeps its value.
        update_by_group(&mut metric, &lookup, &mut fx.buffers, &[5, 10, -1]);
        update_by_group(&mut metric, &lookup, &mut fx.buffers, &[0, 1]);
        assert_eq!(metric.values(), &[5, 11, -1, 11, 0, -1]);

        let snapshot = metric.snapshot();
        assert_eq!((snapshot.min(), snapshot.max()), (-1, 11));
    }

    #[test]
    fn test_add_wraps() {
        let memory = MemoryReservationContext::unbounded();
        let mut metric = DynamicMetric::new(1, &memory).unwrap();
        metric.add(0, i32::MAX);
        metric.add(0, 1);
        assert_eq!(metric.values(), &[i32::MIN]);
    }

    #[test]
    fn test_conditional_update_ignores_groups() {
        let mut fx = Fixture::new(shard());
        let mut metric = DynamicMetric::new(6, &fx.memory).unwrap();
        let conditions = [
            RegroupCondition::int_eq("x", 1),
            RegroupCondition::string_eq("s", "b"),
            RegroupCondition::int_eq("x", 1),
            RegroupCondition::int_eq("x", 99),
            RegroupCondition::int_eq("tags", 8),
            RegroupCondition::string_eq("missing", "b"),
        ];
        conditional_update(&mut metric, fx.scan(), &conditions, &[1, 10, 100, 5, 1000, 7])
            .unwrap();
        assert_eq!(metric.values(), &[1101, 10, 101, 0, 1010, 101]);
    }

    #[test]
    fn test_conditional_update_rejects_bad_input() {
        let mut fx = Fixture::new(shard());
        let mut metric = DynamicMetric::new(6, &fx.memory).unwrap();
        let err = conditional_update(&mut metric, fx.scan(), &[RegroupCondition::int_eq("x", 1)], &[])
            .unwrap_err();
        assert!(err.is_invalid_argument());
        let err = conditional_update(&mut metric, fx.scan(), &[RegroupCondition::int_le("x", 1)], &[1])
            .unwrap_err();
        assert!(err.is_invalid_argument());
        assert!(metric.values().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_group_conditional_update() {
        let mut fx = Fixture::new(shard());
        let lookup = groups(&fx, &[1, 1, 2, 2, 1, 0]);
        let mut metric = DynamicMetric::new(6, &fx.memory).unwrap();
        let entries = [
            (1, RegroupCondition::int_eq("x", 1), 3),
            (2, RegroupCondition::int_eq("x", 1), 4),
            // Same group and term again: replaces the delta of 3.
            (1, RegroupCondition::int_eq("x", 1), 30),
            (2, RegroupCondition::string_eq("s", "a"), -2),
            (0, RegroupCondition::string_eq("s", "c"), 9),
            // Group 7 does not exist.
            (7, RegroupCondition::string_eq("s", "b"), 50),
            (1, RegroupCondition::int_eq("tags", 8), 1),
        ];
        let groups: Vec<u32> = entries.iter().map(|e| e.0).collect();
        let conditions: Vec<RegroupCondition> = entries.iter().map(|e| e.1.clone()).collect();
        let deltas: Vec<i32> = entries.iter().map(|e| e.2).collect();
        let used = fx.memory.used();
        group_conditional_update(&mut metric, &lookup, fx.scan(), &groups, &conditions, &deltas)
            .unwrap();
        assert_eq!(metric.values(), &[31, 0, 4, -2, 1, 9]);
        assert_eq!(fx.memory.used(), used);
    }

    #[test]
    fn test_group_conditional_update_checks_lengths() {
        let mut fx = Fixture::new(shard());
        let lookup = groups(&fx, &[1, 1, 1, 1, 1, 1]);
        let mut metric = DynamicMetric::new(6, &fx.memory).unwrap();
        let err = group_conditional_update(
            &mut metric,
            &lookup,
            fx.scan(),
            &[1, 1],
            &[RegroupCondition::int_eq("x", 1)],
            &[1],
        )
        .unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
