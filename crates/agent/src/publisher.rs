use crate::config::Config;
use crate::http::{dump_gzipped, HttpClient};
use crate::payloads::{measurements_to_json, sub_results_to_json};
use crate::subscription::SubscriptionMetric;
use interpreter::TagsValuePair;
use meters::{Counter, Id, Registry, Tag, Tags, Timer};
use std::sync::Arc;
use std::time::Duration;

// Every accounting meter for the publish path carries these tags.
fn observer_tags() -> Tags {
    vec![("class", "NetflixAtlasObserver"), ("id", "main-vip")].into()
}

/// Serializes batches and posts them, recording one accounting outcome per
/// measurement: sent, dropped for validation, or dropped for an HTTP error.
pub struct Publisher {
    registry: Arc<Registry>,
    http: HttpClient,
}

impl Publisher {
    pub fn new(registry: Arc<Registry>, connect_timeout: Duration) -> Self {
        Publisher {
            registry,
            http: HttpClient::new(connect_timeout),
        }
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    fn counter(&self, name: &str, extra: Vec<(&str, &str)>) -> Arc<Counter<i64>> {
        let mut tags = observer_tags();
        for (k, v) in extra {
            tags.add_str(k, v);
        }
        self.registry.counter(Id::new(name, tags))
    }

    fn timer(&self, name: &str) -> Arc<Timer> {
        self.registry.timer(Id::new(name, Tags::new()))
    }

    fn record_elapsed(&self, timer: &Timer, start_nanos: i64) {
        let elapsed = self.registry.clock().monotonic_time() - start_nanos;
        timer.record_nanos(elapsed);
    }

    /// Send a full cycle of main-path measurements, split into batches of
    /// the configured size, serially or in parallel per config.
    pub async fn push_measurements(
        &self,
        config: &Config,
        now_millis: i64,
        measurements: &[TagsValuePair],
    ) {
        if measurements.is_empty() {
            return;
        }
        let batch_size = config.http.batch_size.max(1);
        if config.http.send_in_parallel {
            let sends = measurements
                .chunks(batch_size)
                .map(|batch| self.send_batch(config, now_millis, batch));
            futures::future::join_all(sends).await;
        } else {
            for batch in measurements.chunks(batch_size) {
                self.send_batch(config, now_millis, batch).await;
            }
        }
    }

    async fn send_batch(&self, config: &Config, now_millis: i64, batch: &[TagsValuePair]) {
        let endpoint = &config.endpoints.publish;
        tracing::info!(
            batch = batch.len(),
            endpoint = endpoint.as_str(),
            "sending batch of metrics"
        );

        let (payload, added) =
            measurements_to_json(now_millis, batch, config.should_validate_metrics());

        self.counter("numMetricsTotal", vec![]).add(batch.len() as i64);
        if added < batch.len() {
            self.counter("numMetricsDropped", vec![("error", "validationFailed")])
                .add((batch.len() - added) as i64);
        }
        if added == 0 {
            return;
        }

        let body = serde_json::to_vec(&payload).expect("payload serializes");
        if config.logs.dump_metrics {
            let file = format!("/tmp/main_batch_{}.json.gz", now_millis);
            dump_gzipped(std::path::Path::new(&file), &body);
        }

        let timer = self.timer("atlas.client.mainBatch");
        let start = self.registry.clock().monotonic_time();
        let read_timeout = Duration::from_secs(config.http.read_timeout);
        let status = self.http.post_json(endpoint, read_timeout, body).await;
        self.record_elapsed(&timer, start);

        if status == 200 {
            self.counter("numMetricsSent", vec![]).add(added as i64);
        } else {
            tracing::error!(
                batch = batch.len(),
                status,
                "unable to send batch of measurements to publish endpoint"
            );
            let status_code = status.to_string();
            self.counter(
                "numMetricsDropped",
                vec![("error", "httpError"), ("statusCode", status_code.as_str())],
            )
            .add(added as i64);
        }
    }

    /// Send one interval's evaluated subscription results to the
    /// evaluation endpoint. Failures count; there are no retries.
    pub async fn send_subscription_results(
        &self,
        config: &Config,
        frequency: i64,
        results: &[SubscriptionMetric],
    ) {
        if results.is_empty() {
            return;
        }
        let freq_str = frequency.to_string();
        let freq_tag = Tag::new("freq", &freq_str);
        let now_millis = self.registry.clock().wall_time();
        let read_timeout = Duration::from_secs(config.http.read_timeout);

        for batch in results.chunks(config.http.batch_size.max(1)) {
            let timer = self
                .registry
                .timer(Id::new("atlas.client.lwcBatch", Tags::new()).with_tag(freq_tag));
            let start = self.registry.clock().monotonic_time();

            let payload = sub_results_to_json(now_millis, batch);
            let body = serde_json::to_vec(&payload).expect("payload serializes");
            if config.logs.dump_subscriptions {
                let file = format!("/tmp/lwc_{}_{}.json.gz", freq_str, now_millis);
                dump_gzipped(std::path::Path::new(&file), &body);
            }

            let status = self
                .http
                .post_json(&config.endpoints.evaluate, read_timeout, body)
                .await;
            self.record_elapsed(&timer, start);

            if status != 200 {
                tracing::error!(status, frequency, "failed to POST subscription results");
                self.registry
                    .counter(
                        Id::new("atlas.client.sendLwcErrors", Tags::new()).with_tag(freq_tag),
                    )
                    .increment();
            }
        }
    }
}
