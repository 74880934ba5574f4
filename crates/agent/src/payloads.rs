use crate::subscription::SubscriptionMetric;
use interpreter::TagsValuePair;
use meters::validation::{encode_value_for_key, is_valid, to_valid_charset};
use serde_json::{json, Map, Value};

fn sanitized_tags(pair_tags: &meters::Tags) -> Map<String, Value> {
    let mut tags = Map::new();
    for &(k, v) in pair_tags.iter() {
        let key = to_valid_charset(k);
        let value = encode_value_for_key(v, k);
        tags.insert(key.as_str().to_owned(), Value::String(value.as_str().to_owned()));
    }
    tags
}

/// Serialize a main-path batch:
/// `{"tags": {}, "metrics": [{"tags": …, "start": ts, "value": v}, …]}`.
/// NaN values are omitted; when `validate` is set, invalid tag sets are
/// dropped. Returns the payload and how many measurements made it in.
pub fn measurements_to_json(
    now_millis: i64,
    measurements: &[TagsValuePair],
    validate: bool,
) -> (Value, usize) {
    let mut metrics = Vec::with_capacity(measurements.len());
    for pair in measurements {
        if pair.value.is_nan() {
            continue;
        }
        if validate && !is_valid(&pair.tags) {
            continue;
        }
        metrics.push(json!({
            "tags": sanitized_tags(&pair.tags),
            "start": now_millis,
            "value": pair.value,
        }));
    }

    let added = metrics.len();
    let payload = json!({
        "tags": {},
        "metrics": metrics,
    });
    (payload, added)
}

/// Serialize a subscription-path batch:
/// `{"timestamp": ts, "metrics": [{"id": …, "tags": …, "value": v}, …]}`.
pub fn sub_results_to_json(now_millis: i64, results: &[SubscriptionMetric]) -> Value {
    let metrics: Vec<Value> = results
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "tags": sanitized_tags(&r.tags),
                "value": r.value,
            })
        })
        .collect();

    json!({
        "timestamp": now_millis,
        "metrics": metrics,
    })
}
