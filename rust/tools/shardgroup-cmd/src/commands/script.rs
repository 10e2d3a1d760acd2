//! Regroup scripts: a JSON list of engine calls applied in order.

use serde::{Deserialize, Serialize};
use shardgroup_common::Result;
use shardgroup_engine::{
    GroupMultiRemapRule, GroupRemapRule, QueryRemapRule, RegroupCondition, RegroupEngine,
};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ScriptCommand {
    RegroupMulti {
        rules: Vec<GroupMultiRemapRule>,
        #[serde(default)]
        error_on_collisions: bool,
    },
    RegroupRules {
        rules: Vec<GroupRemapRule>,
    },
    IntOr {
        field: String,
        terms: Vec<i64>,
        target: u32,
        negative: u32,
        positive: u32,
    },
    StringOr {
        field: String,
        terms: Vec<String>,
        target: u32,
        negative: u32,
        positive: u32,
    },
    Regex {
        field: String,
        pattern: String,
        target: u32,
        negative: u32,
        positive: u32,
    },
    Query(QueryRemapRule),
    Random {
        field: String,
        #[serde(default)]
        is_int: bool,
        salt: String,
        p: f64,
        target: u32,
        negative: u32,
        positive: u32,
    },
    RandomMulti {
        field: String,
        #[serde(default)]
        is_int: bool,
        salt: String,
        target: u32,
        percentages: Vec<f64>,
        result_groups: Vec<u32>,
    },
    RandomMetric {
        stat: usize,
        salt: String,
        p: f64,
        target: u32,
        negative: u32,
        positive: u32,
    },
    RandomMetricMulti {
        stat: usize,
        salt: String,
        target: u32,
        percentages: Vec<f64>,
        result_groups: Vec<u32>,
    },
    Metric {
        stat: usize,
        min: i64,
        max: i64,
        interval: i64,
        #[serde(default)]
        no_gutters: bool,
    },
    Metric2d {
        x_stat: usize,
        x_min: i64,
        x_max: i64,
        x_interval: i64,
        y_stat: usize,
        y_min: i64,
        y_max: i64,
        y_interval: i64,
    },
    MetricFilter {
        stat: usize,
        min: i64,
        max: i64,
        #[serde(default)]
        negate: bool,
    },
    Remap {
        from: Vec<u32>,
        to: Vec<u32>,
        #[serde(default)]
        filter_out_not_targeted: bool,
    },
    PushStat {
        name: String,
    },
    PopStat,
    GroupStats {
        stat: usize,
    },
    CreateDynamic {
        name: String,
    },
    UpdateDynamic {
        name: String,
        deltas: Vec<i32>,
    },
    ConditionalUpdateDynamic {
        name: String,
        conditions: Vec<RegroupCondition>,
        deltas: Vec<i32>,
    },
    GroupConditionalUpdateDynamic {
        name: String,
        groups: Vec<u32>,
        conditions: Vec<RegroupCondition>,
        deltas: Vec<i32>,
    },
    TotalDocFreq {
        #[serde(default)]
        int_fields: Vec<String>,
        #[serde(default)]
        string_fields: Vec<String>,
    },
    Reset,
}

/// What a command produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Groups(u32),
    StatDepth(usize),
    Sums(Vec<i64>),
    DocFreq(u64),
    /// Name of the dynamic metric a command changed.
    Metric(String),
}

impl ScriptCommand {
    pub fn name(&self) -> &'static str {
        match self {
            ScriptCommand::RegroupMulti { .. } => "regroup_multi",
            ScriptCommand::RegroupRules { .. } => "regroup_rules",
            ScriptCommand::IntOr { .. } => "int_or",
            ScriptCommand::StringOr { .. } => "string_or",
            ScriptCommand::Regex { .. } => "regex",
            ScriptCommand::Query(_) => "query",
            ScriptCommand::Random { .. } => "random",
            ScriptCommand::RandomMulti { .. } => "random_multi",
            ScriptCommand::RandomMetric { .. } => "random_metric",
            ScriptCommand::RandomMetricMulti { .. } => "random_metric_multi",
            ScriptCommand::Metric { .. } => "metric",
            ScriptCommand::Metric2d { .. } => "metric2d",
            ScriptCommand::MetricFilter { .. } => "metric_filter",
            ScriptCommand::Remap { .. } => "remap",
            ScriptCommand::PushStat { .. } => "push_stat",
            ScriptCommand::PopStat => "pop_stat",
            ScriptCommand::GroupStats { .. } => "group_stats",
            ScriptCommand::CreateDynamic { .. } => "create_dynamic",
            ScriptCommand::UpdateDynamic { .. } => "update_dynamic",
            ScriptCommand::ConditionalUpdateDynamic { .. } => "conditional_update_dynamic",
            ScriptCommand::GroupConditionalUpdateDynamic { .. } => {
                "group_conditional_update_dynamic"
            }
            ScriptCommand::TotalDocFreq { .. } => "total_doc_freq",
            ScriptCommand::Reset => "reset",
        }
    }

    pub fn apply(&self, engine: &mut RegroupEngine) -> Result<Outcome> {
        let groups = match self {
            ScriptCommand::RegroupMulti {
                rules,
                error_on_collisions,
            } => engine.regroup_multi(rules, *error_on_collisions)?,
            ScriptCommand::RegroupRules { rules } => engine.regroup_rules(rules)?,
            ScriptCommand::IntOr {
                field,
                terms,
                target,
                negative,
                positive,
            } => engine.int_or_regroup(field, terms, *target, *negative, *positive)?,
            ScriptCommand::StringOr {
                field,
                terms,
                target,
                negative,
                positive,
            } => engine.string_or_regroup(field, terms, *target, *negative, *positive)?,
            ScriptCommand::Regex {
                field,
                pattern,
                target,
                negative,
                positive,
            } => engine.regex_regroup(field, pattern, *target, *negative, *positive)?,
            ScriptCommand::Query(rule) => engine.regroup_query(rule)?,
            ScriptCommand::Random {
                field,
                is_int,
                salt,
                p,
                target,
                negative,
                positive,
            } => engine.random_regroup(field, *is_int, salt, *p, *target, *negative, *positive)?,
            ScriptCommand::RandomMulti {
                field,
                is_int,
                salt,
                target,
                percentages,
                result_groups,
            } => engine.random_multi_regroup(
                field,
                *is_int,
                salt,
                *target,
                percentages,
                result_groups,
            )?,
            ScriptCommand::RandomMetric {
                stat,
                salt,
                p,
                target,
                negative,
                positive,
            } => engine.random_metric_regroup(*stat, salt, *p, *target, *negative, *positive)?,
            ScriptCommand::RandomMetricMulti {
                stat,
                salt,
                target,
                percentages,
                result_groups,
            } => engine.random_metric_multi_regroup(
                *stat,
                salt,
                *target,
                percentages,
                result_groups,
            )?,
            ScriptCommand::Metric {
                stat,
                min,
                max,
                interval,
                no_gutters,
            } => engine.metric_regroup(*stat, *min, *max, *interval, *no_gutters)?,
            ScriptCommand::Metric2d {
                x_stat,
                x_min,
                x_max,
                x_interval,
                y_stat,
                y_min,
                y_max,
                y_interval,
            } => engine.metric_regroup_2d(
                *x_stat,
                *x_min,
                *x_max,
                *x_interval,
                *y_stat,
                *y_min,
                *y_max,
                *y_interval,
            )?,
            ScriptCommand::MetricFilter {
                stat,
                min,
                max,
                negate,
            } => engine.metric_filter(*stat, *min, *max, *negate)?,
            ScriptCommand::Remap {
                from,
                to,
                filter_out_not_targeted,
            } => engine.remap_groups(from, to, *filter_out_not_targeted)?,
            ScriptCommand::PushStat { name } => {
                return Ok(Outcome::StatDepth(engine.push_stat(name)?));
            }
            ScriptCommand::PopStat => return Ok(Outcome::StatDepth(engine.pop_stat()?)),
            ScriptCommand::GroupStats { stat } => {
                return Ok(Outcome::Sums(engine.group_stats(*stat)?));
            }
            ScriptCommand::CreateDynamic { name } => {
                engine.create_dynamic_metric(name)?;
                return Ok(Outcome::Metric(name.clone()));
            }
            ScriptCommand::UpdateDynamic { name, deltas } => {
                engine.update_dynamic_metric(name, deltas)?;
                return Ok(Outcome::Metric(name.clone()));
            }
            ScriptCommand::ConditionalUpdateDynamic {
                name,
                conditions,
                deltas,
            } => {
                engine.conditional_update_dynamic_metric(name, conditions, deltas)?;
                return Ok(Outcome::Metric(name.clone()));
            }
            ScriptCommand::GroupConditionalUpdateDynamic {
                name,
                groups,
                conditions,
                deltas,
            } => {
                engine.group_conditional_update_dynamic_metric(name, groups, conditions, deltas)?;
                return Ok(Outcome::Metric(name.clone()));
            }
            ScriptCommand::TotalDocFreq {
                int_fields,
                string_fields,
            } => {
                return Ok(Outcome::DocFreq(
                    engine.total_doc_freq(int_fields, string_fields),
                ));
            }
            ScriptCommand::Reset => {
                engine.reset_groups();
                engine.num_groups()
            }
        };
        Ok(Outcome::Groups(groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script() {
        let script: Vec<ScriptCommand> = serde_json::from_str(
            r#"[
                {"op": "int_or", "field": "x", "terms": [1, 2], "target": 1, "negative": 1, "positive": 2},
                {"op": "query", "target_group": 2, "query": {"term": {"field": "s", "term": "a"}},
                 "negative_group": 0, "positive_group": 2},
                {"op": "push_stat", "name": "count()"},
                {"op": "metric", "stat": 0, "min": 0, "max": 10, "interval": 5},
                {"op": "pop_stat"},
                {"op": "reset"}
            ]"#,
        )
        .unwrap();
        let names: Vec<_> = script.iter().map(ScriptCommand::name).collect();
        assert_eq!(
            names,
            ["int_or", "query", "push_stat", "metric", "pop_stat", "reset"]
        );
        assert!(matches!(
            script[3],
            ScriptCommand::Metric {
                no_gutters: false,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_op_is_rejected() {
        let err = serde_json::from_str::<Vec<ScriptCommand>>(r#"[{"op": "explode"}]"#);
        assert!(err.is_err());
    }
}
