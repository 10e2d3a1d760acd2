//! Interval bucketing of metric values.

use shardgroup_common::{Error, Result};

/// Splits `[min, max)` into buckets of `interval` values.
///
/// In-range values land in buckets `1..=num_buckets`. With gutters, values
/// below `min` go to `num_buckets + 1` and values at or above `max` to
/// `num_buckets + 2`; without gutters they go to 0 (filtered out).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalBucketer {
    min: i64,
    max: i64,
    interval: i64,
    num_buckets: u32,
    no_gutters: bool,
}

impl IntervalBucketer {
    pub fn new(min: i64, max: i64, interval: i64, no_gutters: bool) -> Result<IntervalBucketer> {
        check_range("metric", min, max, interval)?;
        let num_buckets = ((max as i128 - 1 - min as i128) / interval as i128) + 1;
        let num_buckets = u32::try_from(num_buckets)
            .map_err(|_| Error::invalid_arg("interval", "too many buckets"))?;
        Ok(IntervalBucketer {
            min,
            max,
            interval,
            num_buckets,
            no_gutters,
        })
    }

    pub fn num_buckets(&self) -> u32 {
        self.num_buckets
    }

    /// Buckets per source group, gutters included.
    pub fn total_buckets(&self) -> u64 {
        if self.no_gutters {
            self.num_buckets as u64
        } else {
            self.num_buckets as u64 + 2
        }
    }

    #[inline]
    pub fn bucket(&self, value: i64) -> u32 {
        if value < self.min {
            self.below()
        } else if value >= self.max {
            self.above()
        } else {
            ((value as i128 - self.min as i128) / self.interval as i128) as u32 + 1
        }
    }

    /// The bucket every value in `[lo, hi]` falls into, if there is only one.
    pub fn common_bucket(&self, lo: i64, hi: i64) -> Option<u32> {
        if lo > hi {
            return None;
        }
        if self.min <= lo && hi < self.max {
            let (a, b) = (self.bucket(lo), self.bucket(hi));
            (a == b).then_some(a)
        } else if hi < self.min {
            Some(self.below())
        } else if self.max <= lo {
            Some(self.above())
        } else {
            None
        }
    }

    fn below(&self) -> u32 {
        if self.no_gutters {
            0
        } else {
            self.num_buckets + 1
        }
    }

    fn above(&self) -> u32 {
        if self.no_gutters {
            0
        } else {
            self.num_buckets + 2
        }
    }
}

/// One axis of a two-dimensional bucketing, gutters always on.
///
/// Indexes run `0..axis_buckets`: 0 is below range, `axis_buckets - 1` is at
/// or above `max`, and in-range values use `1..axis_buckets - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisBucketer {
    min: i64,
    max: i64,
    interval: i64,
    axis_buckets: u32,
}

impl AxisBucketer {
    pub fn new(name: &str, min: i64, max: i64, interval: i64) -> Result<AxisBucketer> {
        check_range(name, min, max, interval)?;
        let buckets = ((max as i128 - 1 - min as i128) / interval as i128) + 3;
        let axis_buckets = u32::try_from(buckets)
            .map_err(|_| Error::invalid_arg(name, "too many buckets"))?;
        Ok(AxisBucketer {
            min,
            max,
            interval,
            axis_buckets,
        })
    }

    pub fn axis_buckets(&self) -> u32 {
        self.axis_buckets
    }

    #[inline]
    pub fn index(&self, value: i64) -> u32 {
        if value < self.min {
            0
        } else if value >= self.max {
            self.axis_buckets - 1
        } else {
            ((value as i128 - self.min as i128) / self.interval as i128) as u32 + 1
        }
    }

    pub fn common_index(&self, lo: i64, hi: i64) -> Option<u32> {
        if lo > hi {
            return None;
        }
        let in_range = self.min <= lo && hi < self.max;
        let all_below = hi < self.min;
        let all_above = self.max <= lo;
        if in_range || all_below || all_above {
            let (a, b) = (self.index(lo), self.index(hi));
            (a == b).then_some(a)
        } else {
            None
        }
    }
}

/// Combines an x and a y axis into cells `1..=x_buckets * y_buckets`.
///
/// The cell of an `(x, y)` pair is `y_index * x_buckets + x_index + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridBucketer {
    pub x: AxisBucketer,
    pub y: AxisBucketer,
}

impl GridBucketer {
    pub fn new(x: AxisBucketer, y: AxisBucketer) -> GridBucketer {
        GridBucketer { x, y }
    }

    pub fn total_buckets(&self) -> u64 {
        self.x.axis_buckets as u64 * self.y.axis_buckets as u64
    }

    /// Largest cell, checked against the group id range.
    pub fn max_group(&self) -> Result<u32> {
        let total = self.total_buckets();
        u32::try_from(total).map_err(|_| {
            Error::invalid_arg(
                "buckets",
                format!("a grid of {total} cells exceeds the group id range"),
            )
        })
    }

    #[inline]
    pub fn cell(&self, x: i64, y: i64) -> u32 {
        self.cell_of(self.x.index(x), self.y.index(y))
    }

    #[inline]
    pub fn cell_of(&self, x_index: u32, y_index: u32) -> u32 {
        y_index * self.x.axis_buckets + x_index + 1
    }
}

fn check_range(name: &str, min: i64, max: i64, interval: i64) -> Result<()> {
    if interval <= 0 {
        return Err(Error::invalid_arg(
            name,
            format!("interval must be positive, got {interval}"),
        ));
    }
    if max <= min {
        return Err(Error::invalid_arg(
            name,
            format!("max ({max}) must be greater than min ({min})"),
        ));
    }
    Ok(())
}

/// New group of a document that was in `group` and falls in `bucket`,
/// given `total` buckets per source group. Group 0 and bucket 0 stay 0.
#[inline]
pub fn compose_group(group: u32, bucket: u32, total: u64) -> u32 {
    if group == 0 || bucket == 0 {
        0
    } else {
        ((group as u64 - 1) * total + bucket as u64) as u32
    }
}

/// Checks that composing `num_groups` source groups with `total` buckets
/// stays within `u32`, returning the largest resulting group.
pub fn composed_max_group(num_groups: u32, total: u64) -> Result<u32> {
    let max = (num_groups.saturating_sub(1) as u64).saturating_mul(total);
    u32::try_from(max).map_err(|_| {
        Error::invalid_arg(
            "buckets",
            format!("{num_groups} groups times {total} buckets exceeds the group id range"),
        )
    })
}
