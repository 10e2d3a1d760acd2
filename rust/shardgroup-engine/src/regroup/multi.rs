//! Multi-condition regroup over sorted term dictionaries.
//!
//! Every condition of every rule gets a global index, `1..=num_conditions`,
//! assigned rule by rule in condition order, so a smaller index always means
//! an earlier condition of the same rule. Conditions are grouped per field;
//! each field is scanned once, and every document a term matches records the
//! smallest matching index in an intermediate lookup. Documents no term
//! matched fall back to their rule's negative group; the rest take the
//! positive group of their recorded index.

use std::collections::BTreeMap;

use ahash::AHashMap;
use itertools::Itertools;
use shardgroup_bits::ReservedDocBitSet;
use shardgroup_columnar::{DocIdStream, Term, reader::try_for_each_doc_chunk};
use shardgroup_common::{Error, Result};

use super::{Scan, TermScan, rewrite_sequential};
use crate::{
    GroupLookup,
    rules::GroupMultiRemapRule,
    validate::{
        equality_split_field, find_max_group, find_max_intermediate_group, is_identity_rule_set,
        validate_equality_splits, validate_targets,
    },
};

/// Marks "no condition matched" in per-term remap tables.
const NO_MATCH: u32 = u32::MAX;
/// Marks "no rule targets this group".
const NO_RULE: u32 = u32::MAX;

/// Rule data laid out for the passes.
pub struct RuleTables {
    /// Rule index per current group.
    rule_for_group: Vec<u32>,
    /// Per rule.
    negatives: Vec<u32>,
    equality_split: Vec<bool>,
    /// Per condition index; slot 0 is unused.
    positives: Vec<u32>,
    num_conditions: u32,
}

impl RuleTables {
    pub fn new(rules: &[GroupMultiRemapRule], highest_target: u32, num_groups: u32) -> RuleTables {
        let len = (highest_target as usize + 1).max(num_groups as usize);
        let mut rule_for_group = vec![NO_RULE; len];
        let mut positives = vec![0u32];
        for (i, rule) in rules.iter().enumerate() {
            rule_for_group[rule.target_group as usize] = i as u32;
            positives.extend_from_slice(&rule.positive_groups);
        }
        RuleTables {
            rule_for_group,
            negatives: rules.iter().map(|r| r.negative_group).collect(),
            equality_split: rules
                .iter()
                .map(|r| equality_split_field(r).is_some())
                .collect(),
            num_conditions: find_max_intermediate_group(rules),
            positives,
        }
    }

    #[inline]
    fn rule_of(&self, group: u32) -> Option<usize> {
        match self.rule_for_group.get(group as usize) {
            Some(&r) if r != NO_RULE => Some(r as usize),
            _ => None,
        }
    }

    /// Placeholder for targeted documents that no term has matched yet.
    pub fn placeholder(&self) -> u32 {
        self.num_conditions + 1
    }
}

/// Bytes of bookkeeping the partition pass holds while it runs.
pub fn bookkeeping_bytes(
    rules: &[GroupMultiRemapRule],
    highest_target: u32,
    num_groups: u32,
) -> u64 {
    let nc = find_max_intermediate_group(rules) as u64;
    let highest = highest_target as u64;
    let max_intermediate = highest.max(num_groups as u64);
    let parallel = 3 * 4 * nc + 8 * nc;
    let inequality = (highest + 1) * (4 + 8 + 8) + nc * (4 + 8);
    let barriers = nc * 4;
    let remap = (max_intermediate + 1) * 4;
    let rule_index = (highest + 1).max(num_groups as u64) * 8;
    parallel + inequality + barriers + remap + rule_index
}

/// Applies `rules` to `lookup` and returns the new group count.
///
/// The committed lookup is only written once every field has been
/// partitioned, so a collision or a failed reservation leaves it unchanged
/// apart from a possible widening.
pub fn regroup(
    lookup: &mut GroupLookup,
    mut scan: Scan<'_>,
    rules: &[GroupMultiRemapRule],
    error_on_collisions: bool,
) -> Result<u32> {
    let num_groups = lookup.num_groups();
    if num_groups <= 1 {
        return Ok(num_groups);
    }
    if rules.is_empty() {
        *lookup = GroupLookup::constant(0, scan.num_docs());
        return Ok(1);
    }

    let highest_target = {
        let num_conditions = find_max_intermediate_group(rules) as u64;
        let _scratch = scan
            .memory
            .reserve((rules.len() as u64 * 4).max(num_conditions * 8))?;
        let highest = validate_targets(rules)?;
        validate_equality_splits(rules)?;
        highest
    };
    if is_identity_rule_set(rules, num_groups) {
        log::debug!("multi regroup: identity rule set over {num_groups} groups");
        return Ok(num_groups);
    }

    let max_intermediate = num_groups.max(highest_target);
    lookup.grow_to(max_intermediate.max(find_max_group(rules)), scan.memory)?;

    let _bookkeeping = scan
        .memory
        .reserve(bookkeeping_bytes(rules, highest_target, num_groups))?;
    let tables = RuleTables::new(rules, highest_target, num_groups);
    let mut partitioner = Partitioner::new(lookup, &tables, error_on_collisions, &mut scan)?;
    partitioner.partition_all(lookup, rules, &mut scan)?;
    partitioner.finish(lookup, &mut scan);
    Ok(lookup.recalculate_num_groups())
}

/// Conditions of all rules on one field, prepared for a sorted scan.
struct FieldTable<T> {
    field: String,
    rules: Vec<FieldRule<T>>,
    /// Term -> (rule slot, condition index) of equality conditions.
    equalities: AHashMap<T, Vec<(usize, u32)>>,
    max_inequality: Option<T>,
}

struct FieldRule<T> {
    target: u32,
    /// Inequality thresholds, ascending.
    thresholds: Vec<T>,
    /// `barriers[i]` is the smallest condition index among `thresholds[i..]`.
    barriers: Vec<u32>,
    cursor: usize,
}

impl<T: Ord> FieldRule<T> {
    /// Smallest inequality condition index satisfied by `term`.
    ///
    /// Terms must be presented in ascending order.
    fn advance_to(&mut self, term: &T) -> u32 {
        while self.cursor < self.thresholds.len() && self.thresholds[self.cursor] < *term {
            self.cursor += 1;
        }
        self.barriers.get(self.cursor).copied().unwrap_or(NO_MATCH)
    }
}

impl<T: Ord + std::hash::Hash + Clone> FieldTable<T> {
    fn build(field: &str, conditions: Vec<(u32, u32, T, bool)>) -> FieldTable<T> {
        // (target, condition index, term, inequality), condition indexes ascending.
        let mut slot_of: BTreeMap<u32, usize> = BTreeMap::new();
        let mut rules: Vec<FieldRule<T>> = Vec::new();
        let mut inequalities: Vec<Vec<(T, u32)>> = Vec::new();
        let mut equalities: AHashMap<T, Vec<(usize, u32)>> = AHashMap::new();
        let mut max_inequality: Option<T> = None;

        for (target, index, term, inequality) in conditions {
            let slot = *slot_of.entry(target).or_insert_with(|| {
                rules.push(FieldRule {
                    target,
                    thresholds: Vec::new(),
                    barriers: Vec::new(),
                    cursor: 0,
                });
                inequalities.push(Vec::new());
                rules.len() - 1
            });
            if inequality {
                if max_inequality.as_ref().is_none_or(|m| term > *m) {
                    max_inequality = Some(term.clone());
                }
                inequalities[slot].push((term, index));
            } else {
                let entries = equalities.entry(term).or_default();
                // Keep the first condition per rule for a repeated term.
                if !entries.iter().any(|&(s, _)| s == slot) {
                    entries.push((slot, index));
                }
            }
        }

        for (rule, mut thresholds) in rules.iter_mut().zip(inequalities) {
            thresholds.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
            let mut barriers = vec![NO_MATCH; thresholds.len()];
            let mut best = NO_MATCH;
            for i in (0..thresholds.len()).rev() {
                best = best.min(thresholds[i].1);
                barriers[i] = best;
            }
            rule.thresholds = thresholds.into_iter().map(|(t, _)| t).collect();
            rule.barriers = barriers;
        }

        FieldTable {
            field: field.to_string(),
            rules,
            equalities,
            max_inequality,
        }
    }

    /// Equality terms above the inequality range, ascending.
    fn point_terms(&self) -> Vec<T> {
        self.equalities
            .keys()
            .filter(|t| self.max_inequality.as_ref().is_none_or(|m| *t > m))
            .cloned()
            .sorted()
            .collect()
    }
}

/// State of one multi-rule partition pass.
pub struct Partitioner<'a> {
    intermediate: GroupLookup,
    remapped: ReservedDocBitSet,
    tables: &'a RuleTables,
    /// Condition index per target group for the current term.
    remap: Vec<u32>,
    error_on_collisions: bool,
}

impl<'a> Partitioner<'a> {
    /// Builds the intermediate lookup: targeted documents start at the
    /// placeholder, everything else at 0.
    pub fn new(
        lookup: &GroupLookup,
        tables: &'a RuleTables,
        error_on_collisions: bool,
        scan: &mut Scan<'_>,
    ) -> Result<Partitioner<'a>> {
        let num_docs = scan.num_docs();
        let placeholder = tables.placeholder();
        let remapped = ReservedDocBitSet::empty(num_docs, scan.memory)?;
        let mut intermediate = GroupLookup::create(placeholder, num_docs, scan.memory)?;

        let chunk = scan.buffers.groups.len().max(1);
        let mut start = 0;
        while start < num_docs {
            let n = chunk.min(num_docs - start);
            let groups = &mut scan.buffers.groups[..n];
            lookup.fill_sequential(start, groups);
            for group in groups.iter_mut() {
                *group = if tables.rule_of(*group).is_some() {
                    placeholder
                } else {
                    0
                };
            }
            intermediate.write_sequential(start, groups);
            start += n;
        }

        Ok(Partitioner {
            intermediate,
            remapped,
            tables,
            remap: vec![NO_MATCH; tables.rule_for_group.len()],
            error_on_collisions,
        })
    }

    /// Runs every field of `rules` through the partitioner.
    pub fn partition_all(
        &mut self,
        lookup: &GroupLookup,
        rules: &[GroupMultiRemapRule],
        scan: &mut Scan<'_>,
    ) -> Result<()> {
        let mut int_fields: BTreeMap<&str, Vec<(u32, u32, i64, bool)>> = BTreeMap::new();
        let mut string_fields: BTreeMap<&str, Vec<(u32, u32, String, bool)>> = BTreeMap::new();
        let mut index = 0u32;
        for rule in rules {
            for condition in &rule.conditions {
                index += 1;
                match &condition.term {
                    Term::Int(v) => int_fields.entry(&condition.field).or_default().push((
                        rule.target_group,
                        index,
                        *v,
                        condition.inequality,
                    )),
                    Term::Str(s) => string_fields.entry(&condition.field).or_default().push((
                        rule.target_group,
                        index,
                        s.clone(),
                        condition.inequality,
                    )),
                }
            }
        }

        for (field, conditions) in int_fields {
            let mut table = FieldTable::build(field, conditions);
            let terms = scan.reader.int_terms(field);
            self.partition_field(lookup, &mut table, terms, scan)?;
        }
        for (field, conditions) in string_fields {
            let mut table = FieldTable::build(field, conditions);
            let terms = scan.reader.string_terms(field);
            self.partition_field(lookup, &mut table, terms, scan)?;
        }
        Ok(())
    }

    fn partition_field<S: TermScan>(
        &mut self,
        lookup: &GroupLookup,
        table: &mut FieldTable<S::Term>,
        mut terms: S,
        scan: &mut Scan<'_>,
    ) -> Result<()> {
        log::debug!(
            "partitioning field '{}': {} rules, {} equality terms, max inequality {:?}",
            table.field,
            table.rules.len(),
            table.equalities.len(),
            table.max_inequality
        );
        self.remap.fill(NO_MATCH);

        if let Some(max) = table.max_inequality.clone() {
            terms.rewind();
            while terms.advance() {
                let term = terms.current();
                if term > max {
                    break;
                }
                if self.prepare_term(table, &term) {
                    self.apply_term(lookup, terms.docs().as_mut(), scan)?;
                }
            }
        }
        for term in table.point_terms() {
            if terms.seek_exact(&term) && self.prepare_term(table, &term) {
                self.apply_term(lookup, terms.docs().as_mut(), scan)?;
            }
        }
        Ok(())
    }

    /// Fills the remap table for `term`; returns whether any rule matches.
    fn prepare_term<T: Ord + std::hash::Hash>(
        &mut self,
        table: &mut FieldTable<T>,
        term: &T,
    ) -> bool {
        let mut any = false;
        for rule in table.rules.iter_mut() {
            let index = rule.advance_to(term);
            self.remap[rule.target as usize] = index;
            any |= index != NO_MATCH;
        }
        if let Some(entries) = table.equalities.get(term) {
            for &(slot, index) in entries {
                let target = table.rules[slot].target as usize;
                self.remap[target] = self.remap[target].min(index);
                any = true;
            }
        }
        any
    }

    fn apply_term(
        &mut self,
        lookup: &GroupLookup,
        stream: &mut dyn DocIdStream,
        scan: &mut Scan<'_>,
    ) -> Result<()> {
        let buffers = &mut *scan.buffers;
        let (doc_ids, groups) = (&mut buffers.doc_ids, &mut buffers.groups);
        let tables = self.tables;
        let remap = &self.remap;
        let intermediate = &mut self.intermediate;
        let remapped = &mut self.remapped;
        let error_on_collisions = self.error_on_collisions;

        try_for_each_doc_chunk(stream, doc_ids, |docs| {
            let groups = &mut groups[..docs.len()];
            lookup.fill_doc_groups(docs, groups);
            for (&doc, &group) in docs.iter().zip(groups.iter()) {
                let index = remap.get(group as usize).copied().unwrap_or(NO_MATCH);
                if index == NO_MATCH {
                    continue;
                }
                let seen = remapped.set_replace(doc as usize);
                if seen && error_on_collisions {
                    if let Some(rule) = tables.rule_of(group) {
                        if tables.equality_split[rule] {
                            return Err(Error::illegal_state(format!(
                                "document {doc} in group {group} matches more than one term of an equality split"
                            )));
                        }
                    }
                }
                if index < intermediate.get(doc) {
                    intermediate.set(doc, index);
                }
            }
            Ok(())
        })
    }

    /// Writes final groups into `lookup`: unmatched documents take their
    /// rule's negative group (0 without a rule), matched documents the
    /// positive group of their condition.
    pub fn finish(self, lookup: &mut GroupLookup, scan: &mut Scan<'_>) {
        let Partitioner {
            intermediate,
            remapped,
            tables,
            ..
        } = self;

        rewrite_sequential(lookup, scan.buffers, |doc, group| {
            if remapped.contains(doc as usize) {
                group
            } else {
                tables
                    .rule_of(group)
                    .map_or(0, |rule| tables.negatives[rule])
            }
        });

        for doc in remapped.iter() {
            let index = intermediate.get(doc as u32);
            lookup.set(doc as u32, tables.positives[index as usize]);
        }
    }
}
