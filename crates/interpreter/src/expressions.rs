use crate::query::{self, Query};
use interner::{intern, Symbol};
use lazy_static::lazy_static;
use meters::{Measurement, Tags};
use std::collections::HashMap;
use std::sync::Arc;

lazy_static! {
    static ref NAME: Symbol = intern("name");
}

/// A tag set paired with a value: the unit flowing through expression
/// evaluation. Unlike a [`Measurement`] it has no identity or timestamp;
/// the name is folded into the tags.
#[derive(Debug, Clone, PartialEq)]
pub struct TagsValuePair {
    pub tags: Tags,
    pub value: f64,
}

impl TagsValuePair {
    pub fn of(tags: Tags, value: f64) -> Self {
        TagsValuePair { tags, value }
    }

    /// Convert a measurement, merging in the common tags and folding the
    /// identity's name into the tag set.
    pub fn from_measurement(measurement: &Measurement, common_tags: &Tags) -> Self {
        let mut tags = common_tags.clone();
        tags.add_all(measurement.id.tags());
        tags.add(*NAME, measurement.id.name());
        TagsValuePair {
            tags,
            value: measurement.value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// An expression producing a single `(tags, value)` from a set of inputs.
#[derive(Debug, Clone)]
pub enum ValueExpr {
    /// The same constant for any input, with an empty tag set.
    Constant(f64),
    /// Fold the inputs matching `filter` with the aggregation operator.
    Aggregate {
        op: AggregateOp,
        filter: Arc<Query>,
    },
}

impl ValueExpr {
    pub fn aggregate(op: AggregateOp, filter: Arc<Query>) -> Self {
        ValueExpr::Aggregate { op, filter }
    }

    /// Sum is the default aggregation when a bare query is used where a
    /// value expression is expected.
    pub fn sum(filter: Arc<Query>) -> Self {
        ValueExpr::aggregate(AggregateOp::Sum, filter)
    }

    pub fn query(&self) -> Arc<Query> {
        match self {
            ValueExpr::Constant(_) => query::false_q(),
            ValueExpr::Aggregate { filter, .. } => filter.clone(),
        }
    }

    pub fn apply(&self, input: &[TagsValuePair]) -> TagsValuePair {
        match self {
            ValueExpr::Constant(v) => TagsValuePair::of(Tags::new(), *v),
            ValueExpr::Aggregate { op, filter } => {
                let value = fold(*op, filter, input);
                TagsValuePair::of(filter.tags(), value)
            }
        }
    }
}

fn fold(op: AggregateOp, filter: &Query, input: &[TagsValuePair]) -> f64 {
    let matching = input
        .iter()
        .filter(|pair| !pair.value.is_nan() && filter.matches(&pair.tags))
        .map(|pair| pair.value);

    match op {
        AggregateOp::Count => matching.count() as f64,
        AggregateOp::Sum => {
            let mut total = f64::NAN;
            for v in matching {
                total = if total.is_nan() { v } else { total + v };
            }
            total
        }
        AggregateOp::Avg => {
            let mut total = f64::NAN;
            let mut count = 0usize;
            for v in matching {
                total = if total.is_nan() { v } else { total + v };
                count += 1;
            }
            if count > 0 {
                total / count as f64
            } else {
                f64::NAN
            }
        }
        AggregateOp::Min => {
            let mut min = f64::MAX;
            for v in matching {
                min = min.min(v);
            }
            if min == f64::MAX {
                f64::NAN
            } else {
                min
            }
        }
        AggregateOp::Max => {
            let mut max = f64::MIN;
            for v in matching {
                max = max.max(v);
            }
            if max == f64::MIN {
                f64::NAN
            } else {
                max
            }
        }
    }
}

/// An expression producing any number of `(tags, value)` outputs.
#[derive(Debug, Clone)]
pub enum MultipleResults {
    /// Pass through the inputs matching the query.
    All(Arc<Query>),
    /// Partition by a set of keys and apply an inner expression per group.
    GroupBy {
        keys: Vec<Symbol>,
        expr: ValueExpr,
    },
    /// Group-by over the listed keys plus `name` (keep) or over every
    /// input key not listed (drop).
    KeepOrDropTags {
        keys: Vec<Symbol>,
        expr: ValueExpr,
        keep: bool,
    },
    /// A value expression promoted to a multi-result: zero or one output.
    Singleton(ValueExpr),
}

impl MultipleResults {
    pub fn query(&self) -> Arc<Query> {
        match self {
            MultipleResults::All(q) => q.clone(),
            MultipleResults::GroupBy { expr, .. } => expr.query(),
            MultipleResults::KeepOrDropTags { expr, .. } => expr.query(),
            MultipleResults::Singleton(expr) => expr.query(),
        }
    }

    pub fn apply(&self, input: &[TagsValuePair]) -> Vec<TagsValuePair> {
        match self {
            MultipleResults::All(q) => {
                if q.is_true() {
                    // fast path
                    return input.to_vec();
                }
                input
                    .iter()
                    .filter(|pair| !pair.value.is_nan() && q.matches(&pair.tags))
                    .cloned()
                    .collect()
            }
            MultipleResults::GroupBy { keys, expr } => {
                group_and_apply(input, expr, |_pair| keys.clone())
            }
            MultipleResults::KeepOrDropTags { keys, expr, keep } => {
                if *keep {
                    let mut keep_keys = keys.clone();
                    if !keep_keys.contains(&*NAME) {
                        keep_keys.push(*NAME);
                    }
                    group_and_apply(input, expr, |_pair| keep_keys.clone())
                } else {
                    group_and_apply(input, expr, |pair| {
                        // All of the input's keys except the dropped ones;
                        // name is always retained.
                        let mut group_keys = vec![*NAME];
                        for &(k, _) in pair.tags.iter() {
                            if k != *NAME && !keys.contains(&k) {
                                group_keys.push(k);
                            }
                        }
                        group_keys
                    })
                }
            }
            MultipleResults::Singleton(expr) => {
                let result = expr.apply(input);
                if result.value.is_nan() {
                    Vec::new()
                } else {
                    vec![result]
                }
            }
        }
    }
}

// Partition the input on the projection over the group keys, dropping
// inputs that lack one, then apply the inner expression per partition.
fn group_and_apply<F>(
    input: &[TagsValuePair],
    expr: &ValueExpr,
    keys_for: F,
) -> Vec<TagsValuePair>
where
    F: Fn(&TagsValuePair) -> Vec<Symbol>,
{
    let mut grouped: HashMap<Tags, Vec<TagsValuePair>> = HashMap::new();

    for pair in input {
        let keys = keys_for(pair);
        let mut group_tags = Tags::new();
        let mut complete = true;
        for key in keys {
            match pair.tags.at(key) {
                Some(value) => group_tags.add(key, value),
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            grouped.entry(group_tags).or_default().push(pair.clone());
        }
    }

    let mut results = Vec::with_capacity(grouped.len());
    for (mut tags, pairs) in grouped {
        let result = expr.apply(&pairs);
        if result.value.is_nan() {
            continue;
        }
        tags.add_all(&result.tags);
        results.push(TagsValuePair::of(tags, result.value));
    }
    results
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::query::{eq, true_q};

    fn pair(entries: Vec<(&str, &str)>, value: f64) -> TagsValuePair {
        TagsValuePair::of(entries.into(), value)
    }

    fn sample() -> Vec<TagsValuePair> {
        vec![
            pair(vec![("name", "m1"), ("k1", "v1")], 1.0),
            pair(vec![("name", "m1"), ("k1", "v2")], 2.0),
            pair(vec![("name", "m1"), ("k1", "v1"), ("k2", "w1")], 3.0),
        ]
    }

    #[test]
    fn sum_over_matching() {
        let expr = ValueExpr::sum(eq("k1", "v1"));
        let result = expr.apply(&sample());
        assert_eq!(result.value, 4.0);
        // The eq filter induces the output tags.
        assert_eq!(result.tags.at(intern("k1")), Some(intern("v1")));
    }

    #[test]
    fn aggregates_with_no_match() {
        let input = sample();
        let none = eq("k1", "none");

        assert!(ValueExpr::sum(none.clone()).apply(&input).value.is_nan());
        assert_eq!(
            ValueExpr::aggregate(AggregateOp::Count, none.clone())
                .apply(&input)
                .value,
            0.0
        );
        assert!(ValueExpr::aggregate(AggregateOp::Avg, none.clone())
            .apply(&input)
            .value
            .is_nan());
        assert!(ValueExpr::aggregate(AggregateOp::Min, none.clone())
            .apply(&input)
            .value
            .is_nan());
        assert!(ValueExpr::aggregate(AggregateOp::Max, none)
            .apply(&input)
            .value
            .is_nan());
    }

    #[test]
    fn aggregates_skip_nan_inputs() {
        let mut input = sample();
        input.push(pair(vec![("name", "m1"), ("k1", "v1")], f64::NAN));

        let expr = ValueExpr::sum(eq("k1", "v1"));
        assert_eq!(expr.apply(&input).value, 4.0);

        let count = ValueExpr::aggregate(AggregateOp::Count, true_q());
        assert_eq!(count.apply(&input).value, 3.0);
    }

    #[test]
    fn min_max_avg() {
        let input = sample();
        let min = ValueExpr::aggregate(AggregateOp::Min, true_q());
        let max = ValueExpr::aggregate(AggregateOp::Max, true_q());
        let avg = ValueExpr::aggregate(AggregateOp::Avg, true_q());

        assert_eq!(min.apply(&input).value, 1.0);
        assert_eq!(max.apply(&input).value, 3.0);
        assert_eq!(avg.apply(&input).value, 2.0);
    }

    #[test]
    fn group_by_partitions_and_sums() {
        let group_by = MultipleResults::GroupBy {
            keys: vec![intern("k1")],
            expr: ValueExpr::sum(true_q()),
        };
        let mut results = group_by.apply(&sample());
        results.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap());

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].value, 2.0);
        assert_eq!(results[0].tags.at(intern("k1")), Some(intern("v2")));
        assert_eq!(results[1].value, 4.0);
        assert_eq!(results[1].tags.at(intern("k1")), Some(intern("v1")));
    }

    #[test]
    fn group_by_drops_inputs_missing_a_key() {
        let group_by = MultipleResults::GroupBy {
            keys: vec![intern("k2")],
            expr: ValueExpr::sum(true_q()),
        };
        let results = group_by.apply(&sample());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, 3.0);
    }

    #[test]
    fn keep_tags_retains_name() {
        let keep = MultipleResults::KeepOrDropTags {
            keys: vec![intern("k1")],
            expr: ValueExpr::sum(true_q()),
            keep: true,
        };
        let results = keep.apply(&sample());
        assert_eq!(results.len(), 2);
        for r in &results {
            assert_eq!(r.tags.at(intern("name")), Some(intern("m1")));
            assert!(r.tags.has(intern("k1")));
            assert!(!r.tags.has(intern("k2")));
        }
    }

    #[test]
    fn drop_tags_removes_listed_keys() {
        let drop = MultipleResults::KeepOrDropTags {
            keys: vec![intern("k2")],
            expr: ValueExpr::sum(true_q()),
            keep: false,
        };
        let mut results = drop.apply(&sample());
        results.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap());

        // k2 projected away: {k1=v1} absorbs both v1 inputs.
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].value, 2.0);
        assert_eq!(results[1].value, 4.0);
        for r in &results {
            assert!(!r.tags.has(intern("k2")));
        }
    }

    #[test]
    fn all_filters_and_passes_through() {
        let all = MultipleResults::All(eq("k1", "v1"));
        let results = all.apply(&sample());
        assert_eq!(results.len(), 2);

        let everything = MultipleResults::All(true_q());
        assert_eq!(everything.apply(&sample()).len(), 3);
    }

    #[test]
    fn all_drops_nan_values() {
        let mut input = sample();
        input.push(pair(vec![("name", "m2")], f64::NAN));
        let all = MultipleResults::All(eq("name", "m2"));
        assert!(all.apply(&input).is_empty());
    }

    #[test]
    fn singleton_drops_nan_result() {
        let singleton = MultipleResults::Singleton(ValueExpr::sum(eq("k1", "none")));
        assert!(singleton.apply(&sample()).is_empty());

        let singleton = MultipleResults::Singleton(ValueExpr::sum(eq("k1", "v1")));
        let results = singleton.apply(&sample());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, 4.0);
    }

    #[test]
    fn from_measurement_merges_common_tags() {
        let id = meters::Id::new("m1", vec![("k1", "v1")].into());
        let m = Measurement::new(id, 60_000, 1.5);
        let common: Tags = vec![("nf.cluster", "c1")].into();

        let pair = TagsValuePair::from_measurement(&m, &common);
        assert_eq!(pair.value, 1.5);
        assert_eq!(pair.tags.at(intern("name")), Some(intern("m1")));
        assert_eq!(pair.tags.at(intern("k1")), Some(intern("v1")));
        assert_eq!(pair.tags.at(intern("nf.cluster")), Some(intern("c1")));
    }
}
