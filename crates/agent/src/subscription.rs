use meters::Tags;
use serde::Deserialize;

/// A server-supplied expression evaluated at a fixed cadence and reported
/// to the evaluation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Subscription {
    pub id: String,
    /// Evaluation cadence in milliseconds.
    pub frequency: i64,
    pub expression: String,
}

/// Wire shape of the subscription list.
#[derive(Debug, Default, Deserialize)]
pub struct SubscriptionList {
    #[serde(default)]
    pub expressions: Vec<Subscription>,
}

/// One evaluated data point for a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionMetric {
    pub id: String,
    pub tags: Tags,
    pub value: f64,
}

pub fn parse_subscriptions(body: &str) -> Result<Vec<Subscription>, serde_json::Error> {
    let list: SubscriptionList = serde_json::from_str(body)?;
    Ok(list.expressions)
}
