//! Salted-hash random regroups, by field term or by metric value.

use shardgroup_bits::ReservedDocBitSet;
use shardgroup_columnar::{IntValueLookup, reader::for_each_doc_chunk};
use shardgroup_common::Result;

use super::{Scan, TermScan};
use crate::{
    GroupLookup,
    hashing::{GroupChooser, TermHasher},
    validate::validate_percentages,
};

/// Where documents of `target` go: hashes land in `result_groups` through
/// the cumulative `percentages`.
#[derive(Debug, Clone)]
pub struct RandomSplit<'a> {
    pub salt: &'a str,
    pub target: u32,
    pub percentages: &'a [f64],
    pub result_groups: &'a [u32],
}

impl RandomSplit<'_> {
    fn prepare(&self, lookup: &mut GroupLookup, scan: &Scan<'_>) -> Result<(TermHasher, GroupChooser)> {
        validate_percentages(self.percentages, self.result_groups)?;
        let max_group = self.result_groups.iter().copied().max().unwrap_or(0);
        lookup.grow_to(max_group, scan.memory)?;
        Ok((TermHasher::new(self.salt), GroupChooser::new(self.percentages)))
    }
}

/// Splits the target group by the hash of each document's term in `field`.
///
/// A document with several terms follows the first term visited; documents
/// without a term stay in the target group.
pub fn random_multi_regroup(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    field: &str,
    is_int: bool,
    split: &RandomSplit<'_>,
) -> Result<u32> {
    split_by_terms(lookup, scan, field, is_int, split, None)
}

/// Two-way random split: a fraction `p` of the hash space goes to
/// `negative`, the rest to `positive`. Documents of `target` without a term
/// go to `negative`.
#[allow(clippy::too_many_arguments)]
pub fn random_regroup(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    field: &str,
    is_int: bool,
    salt: &str,
    p: f64,
    target: u32,
    negative: u32,
    positive: u32,
) -> Result<u32> {
    let split = RandomSplit {
        salt,
        target,
        percentages: &[p],
        result_groups: &[negative, positive],
    };
    split_by_terms(lookup, scan, field, is_int, &split, Some(negative))
}

/// Moves target documents by the hash of their first term. Target documents
/// that no term reached go to `unmatched`, or stay put when it is `None`.
fn split_by_terms(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    field: &str,
    is_int: bool,
    split: &RandomSplit<'_>,
    unmatched: Option<u32>,
) -> Result<u32> {
    let num_groups = lookup.num_groups();
    if num_groups <= 1 {
        return Ok(num_groups);
    }
    let (hasher, chooser) = split.prepare(lookup, &scan)?;
    let mut assigned = ReservedDocBitSet::empty(scan.num_docs(), scan.memory)?;
    let reader = scan.reader;

    let mut apply = |hash: u64, stream: &mut dyn shardgroup_columnar::DocIdStream| {
        let group = split.result_groups[chooser.choose(hash)];
        for_each_doc_chunk(stream, &mut scan.buffers.doc_ids, |docs| {
            for &doc in docs {
                if !assigned.contains(doc as usize) && lookup.get(doc) == split.target {
                    lookup.set(doc, group);
                    assigned.set(doc as usize);
                }
            }
        });
    };
    if is_int {
        let mut terms = reader.unsorted_int_terms(field);
        terms.rewind();
        while terms.advance() {
            apply(hasher.hash_int(terms.term()), terms.docs().as_mut());
        }
    } else {
        let mut terms = reader.string_terms(field);
        terms.rewind();
        while terms.advance() {
            apply(hasher.hash_str(terms.term()), terms.docs().as_mut());
        }
    }

    if let Some(fallback) = unmatched {
        super::rewrite_sequential(lookup, scan.buffers, |doc, group| {
            if group == split.target && !assigned.contains(doc as usize) {
                fallback
            } else {
                group
            }
        });
    }
    Ok(lookup.recalculate_num_groups())
}

/// Splits the target group by the hash of each document's metric value.
pub fn random_metric_multi_regroup(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    metric: &dyn IntValueLookup,
    split: &RandomSplit<'_>,
) -> Result<u32> {
    let num_groups = lookup.num_groups();
    if num_groups <= 1 {
        return Ok(num_groups);
    }
    let (hasher, chooser) = split.prepare(lookup, &scan)?;

    let num_docs = scan.num_docs();
    let buffers = &mut *scan.buffers;
    let chunk = buffers.doc_ids.len().max(1);
    let mut start = 0;
    while start < num_docs {
        let n = chunk.min(num_docs - start);
        let doc_ids = &mut buffers.doc_ids[..n];
        for (i, doc) in doc_ids.iter_mut().enumerate() {
            *doc = (start + i) as u32;
        }
        let groups = &mut buffers.groups[..n];
        lookup.fill_sequential(start, groups);
        if groups.contains(&split.target) {
            let values = &mut buffers.values[..n];
            metric.lookup(doc_ids, values);
            for (group, &value) in groups.iter_mut().zip(values.iter()) {
                if *group == split.target {
                    *group = split.result_groups[chooser.choose(hasher.hash_int(value))];
                }
            }
            lookup.write_sequential(start, groups);
        }
        start += n;
    }
    Ok(lookup.recalculate_num_groups())
}

/// Two-way counterpart of [`random_metric_multi_regroup`].
#[allow(clippy::too_many_arguments)]
pub fn random_metric_regroup(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    metric: &dyn IntValueLookup,
    salt: &str,
    p: f64,
    target: u32,
    negative: u32,
    positive: u32,
) -> Result<u32> {
    let split = RandomSplit {
        salt,
        target,
        percentages: &[p],
        result_groups: &[negative, positive],
    };
    random_metric_multi_regroup(lookup, scan, metric, &split)
}
