//! Regroups driven by per-document metric values.

use shardgroup_columnar::IntValueLookup;
use shardgroup_common::Result;

use super::{Scan, rewrite_sequential};
use crate::{
    GroupLookup,
    bucket::{GridBucketer, IntervalBucketer, compose_group, composed_max_group},
    buffers_pool::ScratchBuffers,
};

/// Splits every group into interval buckets of `metric`.
pub fn metric_regroup(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    metric: &dyn IntValueLookup,
    bucketer: &IntervalBucketer,
) -> Result<u32> {
    let num_groups = lookup.num_groups();
    if num_groups <= 1 {
        return Ok(num_groups);
    }
    let total = bucketer.total_buckets();
    let max_group = composed_max_group(num_groups, total)?;

    if let Some(bucket) = bucketer.common_bucket(metric.min(), metric.max()) {
        log::debug!("metric regroup: every document lands in bucket {bucket}");
        return compose_all(lookup, scan, bucket, total);
    }

    lookup.grow_to(max_group, scan.memory)?;
    rewrite_with_values(lookup, scan.buffers, metric, |group, value| {
        compose_group(group, bucketer.bucket(value), total)
    });
    Ok(lookup.recalculate_num_groups())
}

/// Moves every document that is not filtered out into the cell of a
/// two-metric grid. The previous group only decides whether a document
/// takes part: group 0 stays 0, any other group is replaced by the cell.
pub fn metric_regroup_2d(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    x_metric: &dyn IntValueLookup,
    y_metric: &dyn IntValueLookup,
    grid: &GridBucketer,
) -> Result<u32> {
    let num_groups = lookup.num_groups();
    if num_groups <= 1 {
        return Ok(num_groups);
    }
    let max_group = grid.max_group()?;

    let x_common = grid.x.common_index(x_metric.min(), x_metric.max());
    let y_common = grid.y.common_index(y_metric.min(), y_metric.max());
    if let (Some(x), Some(y)) = (x_common, y_common) {
        let cell = grid.cell_of(x, y);
        log::debug!("2d metric regroup: every document lands in cell {cell}");
        return assign_all(lookup, scan, cell);
    }

    lookup.grow_to(max_group, scan.memory)?;
    let buffers = &mut *scan.buffers;
    let chunk = buffers.doc_ids.len().max(1);
    let _y_reservation = scan.memory.reserve(chunk as u64 * 8)?;
    let mut y_values = vec![0i64; chunk];

    let num_docs = lookup.len();
    let mut start = 0;
    while start < num_docs {
        let n = chunk.min(num_docs - start);
        let doc_ids = sequential_ids(&mut buffers.doc_ids[..n], start);
        let groups = &mut buffers.groups[..n];
        let x_values = &mut buffers.values[..n];
        let y_values = &mut y_values[..n];
        lookup.fill_sequential(start, groups);
        x_metric.lookup(doc_ids, x_values);
        y_metric.lookup(doc_ids, y_values);
        for ((group, &x), &y) in groups.iter_mut().zip(x_values.iter()).zip(y_values.iter()) {
            if *group != 0 {
                *group = grid.cell(x, y);
            }
        }
        lookup.write_sequential(start, groups);
        start += n;
    }
    Ok(lookup.recalculate_num_groups())
}

/// Keeps documents whose value lies in `[min, max]` (outside it when
/// `negate` is set) and moves every other document to group 0.
pub fn metric_filter(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    metric: &dyn IntValueLookup,
    min: i64,
    max: i64,
    negate: bool,
) -> Result<u32> {
    let num_groups = lookup.num_groups();
    if num_groups <= 1 {
        return Ok(num_groups);
    }
    let (lo, hi) = (metric.min(), metric.max());
    let all_inside = min <= lo && hi <= max;
    let all_outside = hi < min || max < lo;
    if all_inside || all_outside {
        if all_inside == negate {
            *lookup = GroupLookup::constant(0, lookup.len());
            return Ok(1);
        }
        return Ok(num_groups);
    }

    lookup.grow_to(num_groups - 1, scan.memory)?;
    rewrite_with_values(lookup, scan.buffers, metric, |group, value| {
        if ((min..=max).contains(&value)) != negate {
            group
        } else {
            0
        }
    });
    Ok(lookup.recalculate_num_groups())
}

/// Fast path shared by the bucketing regroups: every document lands in
/// the same `bucket` of its group.
fn compose_all(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    bucket: u32,
    total: u64,
) -> Result<u32> {
    if bucket == 0 {
        *lookup = GroupLookup::constant(0, lookup.len());
        return Ok(1);
    }
    if let GroupLookup::Constant(c) = &*lookup {
        let group = compose_group(c.group(), bucket, total);
        *lookup = GroupLookup::constant(group, lookup.len());
        return Ok(group + 1);
    }
    let highest = compose_group(lookup.num_groups() - 1, bucket, total);
    lookup.grow_to(highest, scan.memory)?;
    rewrite_sequential(lookup, scan.buffers, |_, group| {
        compose_group(group, bucket, total)
    });
    Ok(lookup.recalculate_num_groups())
}

/// Moves every document outside group 0 to `group`.
fn assign_all(lookup: &mut GroupLookup, scan: Scan<'_>, group: u32) -> Result<u32> {
    if let GroupLookup::Constant(c) = &*lookup {
        if c.group() != 0 {
            *lookup = GroupLookup::constant(group, lookup.len());
        }
        return Ok(lookup.num_groups());
    }
    lookup.grow_to(group, scan.memory)?;
    rewrite_sequential(lookup, scan.buffers, |_, old| if old == 0 { 0 } else { group });
    Ok(lookup.recalculate_num_groups())
}

/// Rewrites `lookup` chunk by chunk from each document's group and value.
pub(crate) fn rewrite_with_values(
    lookup: &mut GroupLookup,
    buffers: &mut ScratchBuffers,
    metric: &dyn IntValueLookup,
    mut f: impl FnMut(u32, i64) -> u32,
) {
    let num_docs = lookup.len();
    let chunk = buffers.doc_ids.len().max(1);
    let mut start = 0;
    while start < num_docs {
        let n = chunk.min(num_docs - start);
        let doc_ids = sequential_ids(&mut buffers.doc_ids[..n], start);
        let groups = &mut buffers.groups[..n];
        let values = &mut buffers.values[..n];
        lookup.fill_sequential(start, groups);
        metric.lookup(doc_ids, values);
        for (group, &value) in groups.iter_mut().zip(values.iter()) {
            *group = f(*group, value);
        }
        lookup.write_sequential(start, groups);
        start += n;
    }
}

fn sequential_ids(doc_ids: &mut [u32], start: usize) -> &[u32] {
    for (i, doc) in doc_ids.iter_mut().enumerate() {
        *doc = (start + i) as u32;
    }
    doc_ids
}
