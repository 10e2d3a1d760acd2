//! The regroup session over one shard.

use std::{sync::Arc, time::Instant};

use ahash::AHashMap;
use shardgroup_columnar::{IntValueLookup, ShardReader};
use shardgroup_common::{Error, Result};
use shardgroup_memory::MemoryReservationContext;

use crate::{
    GroupLookup,
    bucket::{AxisBucketer, GridBucketer, IntervalBucketer},
    buffers_pool::BuffersPool,
    config::EngineConfig,
    dynamic::{self, DynamicMetric},
    regroup::{
        Scan, metric, multi,
        random::{self, RandomSplit},
        remap,
        single::{self, Split},
    },
    rules::{GroupMultiRemapRule, GroupRemapRule, QueryRemapRule, RegroupCondition},
    stats::{StatStack, group_sums, resolve_stat},
};

/// Assigns every document of a shard to a group and refines the assignment
/// through regroup operations, charging all memory to one reservation
/// context.
///
/// A new engine puts every document in group 1. Group 0 holds filtered out
/// documents; once every document is there (`num_groups() == 1`) regroups
/// become no-ops.
///
/// Every regroup either commits a new assignment and returns the new group
/// count, or fails and leaves the previous assignment in place with every
/// byte it claimed released.
pub struct RegroupEngine {
    reader: Arc<dyn ShardReader>,
    memory: MemoryReservationContext,
    config: EngineConfig,
    lookup: GroupLookup,
    buffers: BuffersPool,
    stats: StatStack,
    dynamic: AHashMap<String, DynamicMetric>,
    zero_group_docs: Option<u64>,
}

impl RegroupEngine {
    /// Creates an engine over `reader`, reserving its scratch buffers from
    /// `memory` up front.
    pub fn new(
        reader: Arc<dyn ShardReader>,
        memory: MemoryReservationContext,
        config: EngineConfig,
    ) -> Result<RegroupEngine> {
        config.validate()?;
        let num_docs = reader.num_docs();
        shardgroup_common::verify_arg!(num_docs, num_docs <= u32::MAX as usize);
        let buffers = BuffersPool::new(config.buffer_size, config.pooled_buffers, &memory)?;
        log::debug!(
            "regroup engine over {num_docs} docs, {} bytes of scratch buffers",
            buffers.reserved_bytes()
        );
        Ok(RegroupEngine {
            lookup: GroupLookup::constant(1, num_docs),
            stats: StatStack::new(config.max_stats),
            reader,
            memory,
            config,
            buffers,
            dynamic: AHashMap::new(),
            zero_group_docs: None,
        })
    }

    pub fn num_docs(&self) -> usize {
        self.lookup.len()
    }

    /// One more than the largest group any document is in.
    pub fn num_groups(&self) -> u32 {
        self.lookup.num_groups()
    }

    pub fn is_filtered_out(&self) -> bool {
        self.lookup.num_groups() <= 1
    }

    pub fn get(&self, doc: u32) -> u32 {
        self.lookup.get(doc)
    }

    pub fn group_lookup(&self) -> &GroupLookup {
        &self.lookup
    }

    pub fn memory(&self) -> &MemoryReservationContext {
        &self.memory
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn reader(&self) -> &dyn ShardReader {
        self.reader.as_ref()
    }

    /// Copies every document's group into `out`, which must be `num_docs()` long.
    pub fn export_doc_id_to_group_id(&self, out: &mut [u32]) -> Result<()> {
        if out.len() != self.num_docs() {
            return Err(Error::invalid_arg(
                "out",
                format!("expected {} entries, got {}", self.num_docs(), out.len()),
            ));
        }
        self.lookup.export_into(out);
        Ok(())
    }

    /// Number of filtered out documents, computed on first use after a change.
    pub fn zero_group_doc_count(&mut self) -> u64 {
        if let Some(count) = self.zero_group_docs {
            return count;
        }
        let count = self.lookup.count_group(0);
        self.zero_group_docs = Some(count);
        count
    }

    /// Puts every document back into group 1.
    pub fn reset_groups(&mut self) {
        self.lookup = GroupLookup::constant(1, self.num_docs());
        self.zero_group_docs = None;
    }

    /// Applies multi-condition rules. See [`multi::regroup`].
    pub fn regroup_multi(
        &mut self,
        rules: &[GroupMultiRemapRule],
        error_on_collisions: bool,
    ) -> Result<u32> {
        self.run("regroup_multi", |lookup, scan, _| {
            multi::regroup(lookup, scan, rules, error_on_collisions)
        })
    }

    /// Applies single-condition rules.
    pub fn regroup_rules(&mut self, rules: &[GroupRemapRule]) -> Result<u32> {
        self.run("regroup_rules", |lookup, scan, _| {
            single::regroup_rules(lookup, scan, rules)
        })
    }

    pub fn int_or_regroup(
        &mut self,
        field: &str,
        terms: &[i64],
        target: u32,
        negative: u32,
        positive: u32,
    ) -> Result<u32> {
        let split = Split::new(target, negative, positive);
        self.run("int_or_regroup", |lookup, scan, _| {
            single::int_or_regroup(lookup, scan, field, terms, split)
        })
    }

    pub fn string_or_regroup(
        &mut self,
        field: &str,
        terms: &[String],
        target: u32,
        negative: u32,
        positive: u32,
    ) -> Result<u32> {
        let split = Split::new(target, negative, positive);
        self.run("string_or_regroup", |lookup, scan, _| {
            single::string_or_regroup(lookup, scan, field, terms, split)
        })
    }

    /// Splits `target` by whether a term of the string `field` fully
    /// matches `pattern`. Fails with `IllegalState` when more than one real
    /// group exists.
    pub fn regex_regroup(
        &mut self,
        field: &str,
        pattern: &str,
        target: u32,
        negative: u32,
        positive: u32,
    ) -> Result<u32> {
        let split = Split::new(target, negative, positive);
        self.run("regex_regroup", |lookup, scan, _| {
            single::regex_regroup(lookup, scan, field, pattern, split)
        })
    }

    pub fn regroup_query(&mut self, rule: &QueryRemapRule) -> Result<u32> {
        self.run("regroup_query", |lookup, scan, _| {
            single::regroup_query(lookup, scan, rule)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn random_regroup(
        &mut self,
        field: &str,
        is_int: bool,
        salt: &str,
        p: f64,
        target: u32,
        negative: u32,
        positive: u32,
    ) -> Result<u32> {
        self.run("random_regroup", |lookup, scan, _| {
            random::random_regroup(lookup, scan, field, is_int, salt, p, target, negative, positive)
        })
    }

    pub fn random_multi_regroup(
        &mut self,
        field: &str,
        is_int: bool,
        salt: &str,
        target: u32,
        percentages: &[f64],
        result_groups: &[u32],
    ) -> Result<u32> {
        let split = RandomSplit {
            salt,
            target,
            percentages,
            result_groups,
        };
        self.run("random_multi_regroup", |lookup, scan, _| {
            random::random_multi_regroup(lookup, scan, field, is_int, &split)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn random_metric_regroup(
        &mut self,
        stat: usize,
        salt: &str,
        p: f64,
        target: u32,
        negative: u32,
        positive: u32,
    ) -> Result<u32> {
        self.run("random_metric_regroup", |lookup, scan, stats| {
            let metric = stats.get(stat)?;
            random::random_metric_regroup(lookup, scan, metric, salt, p, target, negative, positive)
        })
    }

    pub fn random_metric_multi_regroup(
        &mut self,
        stat: usize,
        salt: &str,
        target: u32,
        percentages: &[f64],
        result_groups: &[u32],
    ) -> Result<u32> {
        let split = RandomSplit {
            salt,
            target,
            percentages,
            result_groups,
        };
        self.run("random_metric_multi_regroup", |lookup, scan, stats| {
            let metric = stats.get(stat)?;
            random::random_metric_multi_regroup(lookup, scan, metric, &split)
        })
    }

    /// Splits every group into buckets of `interval` over `[min, max)` of a
    /// pushed stat.
    pub fn metric_regroup(
        &mut self,
        stat: usize,
        min: i64,
        max: i64,
        interval: i64,
        no_gutters: bool,
    ) -> Result<u32> {
        self.run("metric_regroup", |lookup, scan, stats| {
            let metric = stats.get(stat)?;
            let bucketer = IntervalBucketer::new(min, max, interval, no_gutters)?;
            metric::metric_regroup(lookup, scan, metric, &bucketer)
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn metric_regroup_2d(
        &mut self,
        x_stat: usize,
        x_min: i64,
        x_max: i64,
        x_interval: i64,
        y_stat: usize,
        y_min: i64,
        y_max: i64,
        y_interval: i64,
    ) -> Result<u32> {
        self.run("metric_regroup_2d", |lookup, scan, stats| {
            let x = stats.get(x_stat)?;
            let y = stats.get(y_stat)?;
            let grid = GridBucketer::new(
                AxisBucketer::new("x", x_min, x_max, x_interval)?,
                AxisBucketer::new("y", y_min, y_max, y_interval)?,
            );
            metric::metric_regroup_2d(lookup, scan, x, y, &grid)
        })
    }

    /// Moves documents whose stat value is outside `[min, max]` (inside, when
    /// `negate` is set) to group 0.
    pub fn metric_filter(&mut self, stat: usize, min: i64, max: i64, negate: bool) -> Result<u32> {
        self.run("metric_filter", |lookup, scan, stats| {
            let metric = stats.get(stat)?;
            metric::metric_filter(lookup, scan, metric, min, max, negate)
        })
    }

    pub fn remap_groups(
        &mut self,
        from_groups: &[u32],
        to_groups: &[u32],
        filter_out_not_targeted: bool,
    ) -> Result<u32> {
        self.run("remap_groups", |lookup, scan, _| {
            remap::remap_groups(lookup, scan, from_groups, to_groups, filter_out_not_targeted)
        })
    }

    /// Pushes a stat by name: `count()`, an integer constant, an int field,
    /// or `dynamic <name>` for a copy of a dynamic metric's current values.
    /// Returns the new stack depth.
    pub fn push_stat(&mut self, name: &str) -> Result<usize> {
        let lookup: Box<dyn IntValueLookup> = match name.strip_prefix(DYNAMIC_STAT_PREFIX) {
            Some(metric) => Box::new(self.dynamic_metric_ref(metric)?.snapshot()),
            None => resolve_stat(self.reader.as_ref(), name)?,
        };
        self.stats.push(name, lookup, &self.memory)
    }

    /// Pushes a lookup computed elsewhere.
    pub fn push_metric(&mut self, name: &str, lookup: Box<dyn IntValueLookup>) -> Result<usize> {
        self.stats.push(name, lookup, &self.memory)
    }

    pub fn pop_stat(&mut self) -> Result<usize> {
        self.stats.pop()
    }

    pub fn num_stats(&self) -> usize {
        self.stats.len()
    }

    pub fn stat(&self, index: usize) -> Result<&dyn IntValueLookup> {
        self.stats.get(index)
    }

    pub fn lower_bound(&self, stat: usize) -> Result<i64> {
        Ok(self.stats.get(stat)?.min())
    }

    pub fn upper_bound(&self, stat: usize) -> Result<i64> {
        Ok(self.stats.get(stat)?.max())
    }

    /// Per-group sums of a pushed stat, `num_groups()` entries long.
    pub fn group_stats(&self, stat: usize) -> Result<Vec<i64>> {
        let metric = self.stats.get(stat)?;
        let mut buffers = self.buffers.get_buffers()?;
        Ok(group_sums(&self.lookup, metric, &mut buffers))
    }

    /// Creates a zeroed per-document counter called `name`.
    pub fn create_dynamic_metric(&mut self, name: &str) -> Result<()> {
        if self.dynamic.contains_key(name) {
            return Err(Error::invalid_arg(
                "name",
                format!("dynamic metric '{name}' already exists"),
            ));
        }
        let metric = DynamicMetric::new(self.num_docs(), &self.memory)?;
        log::debug!("dynamic metric '{name}': {} bytes", metric.memory_used());
        self.dynamic.insert(name.to_string(), metric);
        Ok(())
    }

    /// Adds `deltas[g]` to the metric of every document in group `g`.
    /// Groups past the end of `deltas` are left alone.
    pub fn update_dynamic_metric(&mut self, name: &str, deltas: &[i32]) -> Result<()> {
        let metric = dynamic_metric_mut(&mut self.dynamic, name)?;
        let mut buffers = self.buffers.get_buffers()?;
        dynamic::update_by_group(metric, &self.lookup, &mut buffers, deltas);
        Ok(())
    }

    /// Adds `deltas[i]` to every document holding the term of
    /// `conditions[i]`. See [`dynamic::conditional_update`].
    pub fn conditional_update_dynamic_metric(
        &mut self,
        name: &str,
        conditions: &[RegroupCondition],
        deltas: &[i32],
    ) -> Result<()> {
        let metric = dynamic_metric_mut(&mut self.dynamic, name)?;
        let mut buffers = self.buffers.get_buffers()?;
        let scan = Scan {
            reader: self.reader.as_ref(),
            memory: &self.memory,
            buffers: &mut buffers,
        };
        dynamic::conditional_update(metric, scan, conditions, deltas)
    }

    /// Like [`conditional_update_dynamic_metric`](Self::conditional_update_dynamic_metric),
    /// restricted to the documents of `groups[i]`.
    pub fn group_conditional_update_dynamic_metric(
        &mut self,
        name: &str,
        groups: &[u32],
        conditions: &[RegroupCondition],
        deltas: &[i32],
    ) -> Result<()> {
        let metric = dynamic_metric_mut(&mut self.dynamic, name)?;
        let mut buffers = self.buffers.get_buffers()?;
        let scan = Scan {
            reader: self.reader.as_ref(),
            memory: &self.memory,
            buffers: &mut buffers,
        };
        dynamic::group_conditional_update(metric, &self.lookup, scan, groups, conditions, deltas)
    }

    pub fn dynamic_metric(&self, name: &str) -> Result<&[i32]> {
        Ok(self.dynamic_metric_ref(name)?.values())
    }

    /// Sum of the document frequencies of every term of the listed fields.
    pub fn total_doc_freq(&self, int_fields: &[String], string_fields: &[String]) -> u64 {
        let ints: u64 = int_fields
            .iter()
            .map(|field| self.reader.int_total_doc_freq(field))
            .sum();
        let strings: u64 = string_fields
            .iter()
            .map(|field| self.reader.string_total_doc_freq(field))
            .sum();
        ints + strings
    }

    fn dynamic_metric_ref(&self, name: &str) -> Result<&DynamicMetric> {
        self.dynamic
            .get(name)
            .ok_or_else(|| Error::invalid_arg("name", format!("no dynamic metric '{name}'")))
    }

    /// Releases everything the engine holds. Logs an error if the memory
    /// context still reports claimed bytes afterwards.
    pub fn close(self) {
        let RegroupEngine {
            memory,
            lookup,
            buffers,
            mut stats,
            dynamic,
            ..
        } = self;
        stats.clear();
        drop(dynamic);
        drop(lookup);
        drop(buffers);
        let leaked = memory.used();
        if leaked != 0 {
            log::error!("regroup engine closed with {leaked} bytes still claimed");
        }
    }

    fn run<F>(&mut self, op: &str, f: F) -> Result<u32>
    where
        F: FnOnce(&mut GroupLookup, Scan<'_>, &StatStack) -> Result<u32>,
    {
        let started = self.config.log_timing.then(Instant::now);
        let mut buffers = self.buffers.get_buffers()?;
        let scan = Scan {
            reader: self.reader.as_ref(),
            memory: &self.memory,
            buffers: &mut buffers,
        };
        let result = f(&mut self.lookup, scan, &self.stats);
        drop(buffers);
        self.zero_group_docs = None;

        match &result {
            Ok(num_groups) => match started {
                Some(started) => log::debug!(
                    "{op}: {num_groups} groups in {:?}, {} bytes used",
                    started.elapsed(),
                    self.memory.used()
                ),
                None => log::debug!("{op}: {num_groups} groups"),
            },
            Err(e) => log::warn!("{op} failed: {e}"),
        }
        result
    }
}

const DYNAMIC_STAT_PREFIX: &str = "dynamic ";

fn dynamic_metric_mut<'a>(
    metrics: &'a mut AHashMap<String, DynamicMetric>,
    name: &str,
) -> Result<&'a mut DynamicMetric> {
    metrics
        .get_mut(name)
        .ok_or_else(|| Error::invalid_arg("name", format!("no dynamic metric '{name}'")))
}

impl std::fmt::Debug for RegroupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegroupEngine")
            .field("lookup", &self.lookup)
            .field("stats", &self.stats)
            .field("dynamic", &self.dynamic.keys().collect::<Vec<_>>())
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use shardgroup_columnar::MemoryShard;

    use super::*;
    use crate::rules::RegroupCondition;

    fn engine(shard: MemoryShard, limit: u64) -> RegroupEngine {
        RegroupEngine::new(
            Arc::new(shard),
            MemoryReservationContext::new(limit),
            EngineConfig::default().with_buffer_size(4),
        )
        .unwrap()
    }

    fn ten_docs() -> MemoryShard {
        MemoryShard::builder(10).int_column("x", 0..10).build()
    }

    #[test]
    fn test_new_session_is_one_group() {
        let engine = engine(ten_docs(), 1 << 20);
        assert_eq!(engine.num_groups(), 2);
        assert!(!engine.is_filtered_out());
        assert_eq!(engine.memory().used(), 4 * 16);
    }

    #[test]
    fn test_single_rule_scenario() {
        let mut engine = engine(ten_docs(), 1 << 20);
        let rule = GroupMultiRemapRule {
            target_group: 1,
            negative_group: 1,
            positive_groups: vec![2],
            conditions: vec![RegroupCondition::int_eq("x", 5)],
        };
        assert_eq!(engine.regroup_multi(&[rule], false).unwrap(), 3);
        let mut out = vec![0; 10];
        engine.export_doc_id_to_group_id(&mut out).unwrap();
        assert_eq!(out, vec![1, 1, 1, 1, 1, 2, 1, 1, 1, 1]);
        assert!(engine.export_doc_id_to_group_id(&mut [0; 3]).is_err());
    }

    #[test]
    fn test_zero_group_count_is_refreshed() {
        let mut engine = engine(ten_docs(), 1 << 20);
        assert_eq!(engine.zero_group_doc_count(), 0);
        engine.int_or_regroup("x", &[1, 2, 3], 1, 0, 1).unwrap();
        assert_eq!(engine.zero_group_doc_count(), 7);
        engine.reset_groups();
        assert_eq!(engine.zero_group_doc_count(), 0);
        assert_eq!(engine.num_groups(), 2);
    }

    #[test]
    fn test_stats_and_group_sums() {
        let mut engine = engine(ten_docs(), 1 << 20);
        assert_eq!(engine.push_stat("x").unwrap(), 1);
        assert_eq!(engine.push_stat("count()").unwrap(), 2);
        assert_eq!((engine.lower_bound(0).unwrap(), engine.upper_bound(0).unwrap()), (0, 9));
        engine.metric_regroup(0, 0, 10, 5, true).unwrap();
        assert_eq!(engine.group_stats(0).unwrap(), vec![0, 10, 35]);
        assert_eq!(engine.group_stats(1).unwrap(), vec![0, 5, 5]);
        assert!(engine.metric_regroup(2, 0, 10, 5, true).unwrap_err().is_invalid_argument());
        assert_eq!(engine.pop_stat().unwrap(), 1);
        assert_eq!(engine.num_stats(), 1);
    }

    #[test]
    fn test_close_releases_everything() {
        let memory = MemoryReservationContext::new(1 << 20);
        let mut engine = RegroupEngine::new(
            Arc::new(ten_docs()),
            memory.clone(),
            EngineConfig::default(),
        )
        .unwrap();
        engine.push_stat("x").unwrap();
        engine.int_or_regroup("x", &[4], 1, 1, 2).unwrap();
        assert!(memory.used() > 0);
        engine.close();
        assert_eq!(memory.used(), 0);
    }

    #[test]
    fn test_dynamic_metric_lifecycle() {
        let memory = MemoryReservationContext::new(1 << 20);
        let mut engine =
            RegroupEngine::new(Arc::new(ten_docs()), memory.clone(), EngineConfig::default())
                .unwrap();
        engine.create_dynamic_metric("clicks").unwrap();
        assert!(engine.create_dynamic_metric("clicks").unwrap_err().is_invalid_argument());
        assert!(engine.update_dynamic_metric("views", &[1]).unwrap_err().is_invalid_argument());

        engine.int_or_regroup("x", &[1, 2, 3], 1, 1, 2).unwrap();
        engine.update_dynamic_metric("clicks", &[0, 1, 5]).unwrap();
        engine
            .conditional_update_dynamic_metric(
                "clicks",
                &[RegroupCondition::int_eq("x", 9), RegroupCondition::int_eq("x", 2)],
                &[-3, 10],
            )
            .unwrap();
        engine
            .group_conditional_update_dynamic_metric(
                "clicks",
                &[2, 1],
                &[RegroupCondition::int_eq("x", 0), RegroupCondition::int_eq("x", 0)],
                &[100, 7],
            )
            .unwrap();
        assert_eq!(
            engine.dynamic_metric("clicks").unwrap(),
            &[8, 5, 15, 5, 1, 1, 1, 1, 1, -2]
        );

        assert_eq!(engine.push_stat("dynamic clicks").unwrap(), 1);
        assert_eq!((engine.lower_bound(0).unwrap(), engine.upper_bound(0).unwrap()), (-2, 15));
        assert_eq!(engine.group_stats(0).unwrap(), vec![0, 11, 25]);
        assert!(engine.push_stat("dynamic views").unwrap_err().is_invalid_argument());

        engine.close();
        assert_eq!(memory.used(), 0);
    }

    #[test]
    fn test_dynamic_metric_is_charged_to_memory() {
        let mut engine = engine(ten_docs(), 4 * 16 + 40 + 8);
        engine.create_dynamic_metric("a").unwrap();
        assert!(engine.create_dynamic_metric("b").unwrap_err().is_out_of_memory());
        assert!(engine.dynamic_metric("b").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_total_doc_freq() {
        let mut builder = MemoryShard::builder(4);
        builder
            .int_column("x", [1, 1, 2, 3])
            .string_column("s", ["a", "b", "b", "b"])
            .add_int("tags", 0, 5)
            .add_int("tags", 0, 6)
            .add_int("tags", 3, 6);
        let engine = engine(builder.build(), 1 << 20);
        let fields = |names: &[&str]| names.iter().map(|n| n.to_string()).collect::<Vec<_>>();
        assert_eq!(engine.total_doc_freq(&fields(&["x", "tags"]), &fields(&["s"])), 11);
        assert_eq!(engine.total_doc_freq(&fields(&["missing"]), &[]), 0);
    }

    #[test]
    fn test_new_fails_without_room_for_buffers() {
        let err = RegroupEngine::new(
            Arc::new(ten_docs()),
            MemoryReservationContext::new(100),
            EngineConfig::default(),
        )
        .unwrap_err();
        assert!(err.is_out_of_memory());
    }
}
