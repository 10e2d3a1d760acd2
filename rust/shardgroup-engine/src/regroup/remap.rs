//! Direct group to group remapping.

use shardgroup_common::{Error, Result};

use super::{Scan, rewrite_sequential};
use crate::GroupLookup;

/// Moves every document of `from_groups[i]` to `to_groups[i]`.
///
/// Groups not listed keep their id, or move to 0 with
/// `filter_out_not_targeted`. A later pair overrides an earlier one with the
/// same source group.
pub fn remap_groups(
    lookup: &mut GroupLookup,
    scan: Scan<'_>,
    from_groups: &[u32],
    to_groups: &[u32],
    filter_out_not_targeted: bool,
) -> Result<u32> {
    if from_groups.len() != to_groups.len() {
        return Err(Error::invalid_arg(
            "to_groups",
            format!(
                "{} source groups but {} destinations",
                from_groups.len(),
                to_groups.len()
            ),
        ));
    }
    if from_groups.contains(&0) {
        return Err(Error::invalid_arg("from_groups", "group 0 cannot be remapped"));
    }
    let num_groups = lookup.num_groups();
    if num_groups <= 1 {
        return Ok(num_groups);
    }

    let _table = scan.memory.reserve(num_groups as u64 * 4)?;
    let mut old_to_new: Vec<u32> = if filter_out_not_targeted {
        vec![0; num_groups as usize]
    } else {
        (0..num_groups).collect()
    };
    for (&from, &to) in from_groups.iter().zip(to_groups) {
        if let Some(slot) = old_to_new.get_mut(from as usize) {
            *slot = to;
        }
    }

    if old_to_new.iter().enumerate().all(|(old, &new)| old as u32 == new) {
        return Ok(num_groups);
    }
    if old_to_new.iter().all(|&new| new == 0) {
        *lookup = GroupLookup::constant(0, lookup.len());
        return Ok(1);
    }

    let max_group = old_to_new.iter().copied().max().unwrap_or(0);
    lookup.grow_to(max_group, scan.memory)?;
    rewrite_sequential(lookup, scan.buffers, |_, group| old_to_new[group as usize]);
    Ok(lookup.recalculate_num_groups())
}
