use crate::config::{Config, ConfigManager, MAIN_FREQUENCY_MILLIS};
use crate::publisher::Publisher;
use crate::subscription::{parse_subscriptions, Subscription, SubscriptionMetric};
use interpreter::{Evaluator, TagsValuePair};
use meters::{Clock, ConsolidationRegistry, Id, Measurement, OffsetClock, Registry, Tags};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const MIN_WAIT_MILLIS: i64 = 1;

// How many refresh cycles pass between alert-server notifications.
const NOTIFY_ALERT_SERVER_CYCLES: u64 = 30;

struct SubscriptionState {
    subscriptions: Arc<Vec<Subscription>>,
    etag: Option<String>,
    // Frequencies that already have a dedicated sender task.
    sender_frequencies: HashSet<i64>,
}

/// Owns the long-lived workers: the subscription refresher, the main
/// publisher, and one sender per distinct subscription frequency. Workers
/// are detached; shutdown is cooperative through a stop flag.
pub struct SubscriptionManager {
    evaluator: Evaluator,
    config_manager: Arc<ConfigManager>,
    registry: Arc<Registry>,
    clock: Arc<OffsetClock>,
    publisher: Publisher,
    consolidation: ConsolidationRegistry,
    state: Mutex<SubscriptionState>,
    refresher_runs: AtomicU64,
    should_run: AtomicBool,
}

impl SubscriptionManager {
    pub fn new(
        config_manager: Arc<ConfigManager>,
        registry: Arc<Registry>,
        clock: Arc<OffsetClock>,
    ) -> Arc<Self> {
        let connect_timeout =
            Duration::from_secs(config_manager.config().http.connect_timeout);
        Arc::new(SubscriptionManager {
            evaluator: Evaluator::new(),
            publisher: Publisher::new(registry.clone(), connect_timeout),
            consolidation: ConsolidationRegistry::new(
                registry.step_millis(),
                MAIN_FREQUENCY_MILLIS,
            ),
            config_manager,
            registry,
            clock,
            state: Mutex::new(SubscriptionState {
                subscriptions: Arc::new(Vec::new()),
                etag: None,
                sender_frequencies: HashSet::new(),
            }),
            refresher_runs: AtomicU64::new(0),
            should_run: AtomicBool::new(true),
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.should_run.load(Ordering::Relaxed)
    }

    /// Signal every worker to exit at its next wake.
    pub fn request_stop(&self) {
        self.should_run.store(false, Ordering::Relaxed);
    }

    /// Re-arm the stop flag so workers spawned after a stop keep running.
    pub fn resume(&self) {
        self.should_run.store(true, Ordering::Relaxed);
    }

    /// Flush one synthetic main publish with the clock advanced to just
    /// before the next step boundary, so the in-progress interval drains.
    pub async fn drain(&self) {
        tracing::info!("advancing clock and flushing metrics");
        self.clock.set_offset(MAIN_FREQUENCY_MILLIS - 100);
        self.send_to_main().await;
    }

    fn elapsed_millis(&self, start_nanos: i64) -> i64 {
        (self.clock.monotonic_time() - start_nanos) / 1_000_000
    }

    async fn wait_for_next(&self, period_millis: i64, elapsed_millis: i64) {
        let wait = (period_millis - elapsed_millis).max(MIN_WAIT_MILLIS);
        tracing::debug!(wait, period_millis, "waiting until next cycle");
        tokio::time::sleep(Duration::from_millis(wait as u64)).await;
    }

    /// Worker: periodically refresh the subscription list.
    pub async fn run_refresher(self: Arc<Self>) {
        while self.is_running() {
            let start = self.clock.monotonic_time();
            let config = self.config_manager.config();

            if config.are_subs_enabled() {
                tracing::info!(
                    endpoint = config.endpoints.subscriptions.as_str(),
                    "refreshing subscriptions"
                );
                self.refresh_subscriptions(&config).await;
            }

            let runs = self.refresher_runs.fetch_add(1, Ordering::Relaxed);
            if config.should_notify_alert_server() && runs % NOTIFY_ALERT_SERVER_CYCLES == 0 {
                // Signaling only; the outcome does not matter.
                let status = self
                    .publisher
                    .http()
                    .post_empty(
                        &config.endpoints.check_cluster,
                        Duration::from_secs(config.http.read_timeout),
                    )
                    .await;
                tracing::debug!(status, "notified alert server");
            }

            let elapsed = self.elapsed_millis(start);
            self.wait_for_next(config.sub_refresh_millis(), elapsed).await;
        }
        tracing::info!("stopping subscription refresher");
    }

    /// One refresh cycle against the subscriptions endpoint. Public so
    /// integration tests can drive the cycle without the worker loop.
    pub async fn refresh_subscriptions(self: &Arc<Self>, config: &Config) {
        let refresh_timer = self
            .registry
            .timer(Id::new("atlas.client.refreshSubs", Tags::new()));
        let etag = {
            let state = self.state.lock().expect("subscription state is never poisoned");
            state.etag.clone()
        };

        let start = self.clock.monotonic_time();
        let response = self
            .publisher
            .http()
            .conditional_get(
                &config.endpoints.subscriptions,
                etag.as_deref(),
                Duration::from_secs(config.http.read_timeout),
            )
            .await;
        refresh_timer.record_nanos(self.clock.monotonic_time() - start);

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(%err, "failed to refresh subscriptions");
                self.refresh_error_counter("http").increment();
                return;
            }
        };

        match response.status {
            200 => match parse_subscriptions(&response.body) {
                Ok(subscriptions) => {
                    let new_frequencies = self.swap_subscriptions(subscriptions, response.etag);
                    for frequency in new_frequencies {
                        tracing::info!(frequency, "new sender frequency detected, scheduling");
                        let manager = self.clone_arc();
                        tokio::spawn(async move {
                            manager.run_sub_sender(frequency).await;
                        });
                    }
                }
                Err(err) => {
                    tracing::error!(%err, "failed to parse subscriptions");
                    self.refresh_error_counter("json").increment();
                }
            },
            304 => {
                tracing::debug!("not refreshing subscriptions, not modified");
            }
            status => {
                tracing::error!(status, "failed to refresh subscriptions");
                self.refresh_error_counter("http").increment();
            }
        }
    }

    fn refresh_error_counter(&self, error: &str) -> Arc<meters::Counter<i64>> {
        self.registry.counter(Id::new(
            "atlas.client.refreshSubsErrors",
            vec![("error", error)].into(),
        ))
    }

    // Swap in the new list; returns frequencies that need a new sender.
    // The main frequency publishes through the main path, not a sender.
    fn swap_subscriptions(
        &self,
        subscriptions: Vec<Subscription>,
        etag: Option<String>,
    ) -> Vec<i64> {
        let mut state = self.state.lock().expect("subscription state is never poisoned");
        if let Some(etag) = etag {
            state.etag = Some(etag);
        }

        let mut new_frequencies = Vec::new();
        for sub in &subscriptions {
            if sub.frequency != MAIN_FREQUENCY_MILLIS
                && state.sender_frequencies.insert(sub.frequency)
            {
                new_frequencies.push(sub.frequency);
            }
        }
        state.subscriptions = Arc::new(subscriptions);

        self.registry
            .gauge(Id::new("atlas.client.numPollers", Tags::new()))
            .update(state.sender_frequencies.len() as f64);
        new_frequencies
    }

    fn clone_arc(self: &Arc<Self>) -> Arc<Self> {
        Arc::clone(self)
    }

    pub fn subscriptions(&self) -> Arc<Vec<Subscription>> {
        self.state
            .lock()
            .expect("subscription state is never poisoned")
            .subscriptions
            .clone()
    }

    fn subs_for_frequency(&self, frequency: i64) -> Vec<Subscription> {
        self.subscriptions()
            .iter()
            .filter(|s| s.frequency == frequency)
            .cloned()
            .collect()
    }

    /// Worker: the fixed-cadence main publisher.
    pub async fn run_main_sender(self: Arc<Self>, initial_delay: Duration) {
        tracing::info!(
            delay_secs = initial_delay.as_secs(),
            "waiting to send the first batch to the publish endpoint"
        );
        tokio::time::sleep(initial_delay).await;

        while self.is_running() {
            let start = self.clock.monotonic_time();
            let config = self.config_manager.config();
            if config.is_main_enabled() {
                self.send_to_main().await;
            } else {
                tracing::info!("not sending anything to the publish endpoint (disabled)");
            }
            let elapsed = self.elapsed_millis(start);
            self.wait_for_next(MAIN_FREQUENCY_MILLIS, elapsed).await;
        }
        tracing::info!("stopping main sender");
    }

    pub async fn send_to_main(&self) {
        let send_timer = self
            .registry
            .timer(Id::new("atlas.client.sendToMain", Tags::new()));
        let start = self.clock.monotonic_time();

        let config = self.config_manager.config();
        let raw = self.registry.measurements();
        self.registry
            .gauge(Id::new("atlas.client.rawMainMeasurements", Tags::new()))
            .update(raw.len() as f64);

        // Fold the raw samples through the consolidation registry; the
        // snapshot carries the step-aligned timestamp.
        self.consolidation.update_from(&raw);
        let timestamp =
            self.clock.wall_time() / MAIN_FREQUENCY_MILLIS * MAIN_FREQUENCY_MILLIS;
        let consolidated = self.consolidation.measurements(timestamp);

        let metrics = self.main_measurements(&config, &consolidated);
        self.registry
            .gauge(Id::new("atlas.client.mainMeasurements", Tags::new()))
            .update(metrics.len() as f64);

        self.publisher
            .push_measurements(&config, timestamp, &metrics)
            .await;

        let nanos = self.clock.monotonic_time() - start;
        tracing::info!(
            metrics = metrics.len(),
            endpoint = config.endpoints.publish.as_str(),
            millis = nanos / 1_000_000,
            "sent metrics to publish endpoint"
        );
        send_timer.record_nanos(nanos);
    }

    /// Route measurements through the publish rules: each measurement goes
    /// to the first rule whose query matches and is dropped when none
    /// does; each rule's batch is then evaluated through its expression.
    fn main_measurements(
        &self,
        config: &Config,
        measurements: &[Measurement],
    ) -> Vec<TagsValuePair> {
        if measurements.is_empty() {
            tracing::info!("no metrics registered");
            return Vec::new();
        }

        let common_tags = config.common_tags();
        let rules = config.publish_config();
        if rules.is_empty() {
            // No rules behaves like a single `:true,:all`.
            return measurements
                .iter()
                .map(|m| TagsValuePair::from_measurement(m, common_tags))
                .collect();
        }
        tracing::debug!(rules = rules.len(), measurements = measurements.len(), "applying publish rules");

        let queries: Vec<_> = rules.iter().map(|rule| self.evaluator.query(rule)).collect();
        let mut for_rule: Vec<Vec<TagsValuePair>> = vec![Vec::new(); rules.len()];
        for m in measurements {
            let pair = TagsValuePair::from_measurement(m, common_tags);
            if let Some(i) = queries.iter().position(|q| q.matches(&pair.tags)) {
                for_rule[i].push(pair);
            }
        }

        let mut result = Vec::new();
        for (rule, batch) in rules.iter().zip(for_rule) {
            result.extend(self.evaluator.eval(rule, &batch));
        }
        result
    }

    /// Worker: evaluate and send subscriptions for one frequency.
    pub async fn run_sub_sender(self: Arc<Self>, frequency: i64) {
        while self.is_running() {
            let start = self.clock.monotonic_time();
            self.send_metrics_for_interval(frequency).await;
            let elapsed = self.elapsed_millis(start);
            self.wait_for_next(frequency, elapsed).await;
        }
        tracing::info!(frequency, "stopping subscription sender");
    }

    async fn send_metrics_for_interval(&self, frequency: i64) {
        let freq_tag = meters::Tag::new("freq", &frequency.to_string());
        let send_timer = self
            .registry
            .timer(Id::new("atlas.client.sendLwc", Tags::new()).with_tag(freq_tag));
        let start = self.clock.monotonic_time();

        let config = self.config_manager.config();
        if !config.are_subs_enabled() {
            return;
        }

        let results = self.evaluate_subscriptions(&config, frequency);
        self.registry
            .gauge(Id::new("atlas.client.lwcMeasurements", Tags::new()).with_tag(freq_tag))
            .update(results.len() as f64);

        self.publisher
            .send_subscription_results(&config, frequency, &results)
            .await;
        send_timer.record_nanos(self.clock.monotonic_time() - start);
    }

    fn evaluate_subscriptions(
        &self,
        config: &Config,
        frequency: i64,
    ) -> Vec<SubscriptionMetric> {
        let subs = self.subs_for_frequency(frequency);
        let freq_tag = meters::Tag::new("freq", &frequency.to_string());
        self.registry
            .gauge(Id::new("atlas.client.lwcSubs", Tags::new()).with_tag(freq_tag))
            .update(subs.len() as f64);
        if subs.is_empty() {
            return Vec::new();
        }

        let measurements = self.registry.measurements();
        let common_tags = config.common_tags();
        let pairs: Vec<TagsValuePair> = measurements
            .iter()
            .map(|m| TagsValuePair::from_measurement(m, common_tags))
            .collect();

        let mut results = Vec::new();
        for sub in subs {
            for pair in self.evaluator.eval(&sub.expression, &pairs) {
                results.push(SubscriptionMetric {
                    id: sub.id.clone(),
                    tags: pair.tags,
                    value: pair.value,
                });
            }
        }
        results
    }

    /// Inject externally produced measurements into the publish path at
    /// the given wall time.
    pub async fn push_measurements(&self, now_millis: i64, measurements: &[TagsValuePair]) {
        let config = self.config_manager.config();
        self.publisher
            .push_measurements(&config, now_millis, measurements)
            .await;
    }
}

/// Randomized delay in `[0, 20s)`, shifted so wake-ups land near the main
/// step boundary.
pub fn initial_main_delay(now_millis: i64) -> Duration {
    use rand::Rng;
    const MAX_SECS_TO_START: i64 = 20;
    let main_frequency_secs = MAIN_FREQUENCY_MILLIS / 1000;

    let target_secs = rand::thread_rng().gen_range(0..MAX_SECS_TO_START);
    let offset = (now_millis / 1000) % main_frequency_secs;
    let delay = target_secs - offset;
    let delay = if delay >= 0 {
        delay
    } else {
        delay + main_frequency_secs
    };
    Duration::from_secs(delay as u64)
}

#[cfg(test)]
mod test {
    use super::*;
    use meters::{ManualClock, SystemClock};

    fn manager_with_clock(
        clock: Arc<ManualClock>,
    ) -> (Arc<SubscriptionManager>, Arc<Registry>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config_manager = Arc::new(ConfigManager::new(
            dir.path().join("global.json"),
            dir.path().join("local.json"),
        ));
        let offset_clock = Arc::new(OffsetClock::new(clock));
        let registry = Registry::new(60_000, offset_clock.clone());
        let manager =
            SubscriptionManager::new(config_manager, registry.clone(), offset_clock);
        (manager, registry, dir)
    }

    #[test]
    fn initial_delay_is_aligned_and_bounded() {
        for now in [0i64, 42, 30_000, 59_999, 123_456] {
            let delay = initial_main_delay(now);
            assert!(delay.as_secs() < 60);
            let wake = (now / 1000) + delay.as_secs() as i64;
            assert!(wake % 60 < 20, "wake at {} not near boundary", wake);
        }
    }

    #[test]
    fn swap_subscriptions_tracks_new_frequencies() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let (manager, _registry, _dir) = manager_with_clock(clock);

        let subs = vec![Subscription {
            id: "a".to_owned(),
            frequency: 10_000,
            expression: ":true,:all".to_owned(),
        }];
        let new = manager.swap_subscriptions(subs.clone(), Some("etag-1".to_owned()));
        assert_eq!(new, vec![10_000]);

        // Same list again: no new sender needed.
        let new = manager.swap_subscriptions(subs.clone(), None);
        assert!(new.is_empty());

        // One more frequency appears; the existing one persists.
        let mut more = subs;
        more.push(Subscription {
            id: "b".to_owned(),
            frequency: 5_000,
            expression: ":true,:all".to_owned(),
        });
        let new = manager.swap_subscriptions(more, None);
        assert_eq!(new, vec![5_000]);
        assert_eq!(manager.subscriptions().len(), 2);
    }

    #[test]
    fn main_frequency_needs_no_sender() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let (manager, _registry, _dir) = manager_with_clock(clock);

        let subs = vec![Subscription {
            id: "main".to_owned(),
            frequency: MAIN_FREQUENCY_MILLIS,
            expression: ":true,:all".to_owned(),
        }];
        assert!(manager.swap_subscriptions(subs, None).is_empty());
    }

    #[test]
    fn main_measurements_apply_first_matching_rule() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let (manager, _registry, _dir) = manager_with_clock(clock);

        let mut config = Config::default();
        config.features.publish_config = vec![
            "name,m1,:eq,:all".to_owned(),
            "name,m2,:eq,:sum".to_owned(),
        ];

        let measurements = vec![
            Measurement::new(Id::new("m1", vec![("k", "a")].into()), 60_000, 1.0),
            Measurement::new(Id::new("m2", vec![("k", "a")].into()), 60_000, 2.0),
            Measurement::new(Id::new("m2", vec![("k", "b")].into()), 60_000, 3.0),
            Measurement::new(Id::new("m3", Tags::new()), 60_000, 4.0),
        ];
        let mut pairs = manager.main_measurements(&config, &measurements);
        pairs.sort_by(|a, b| a.value.partial_cmp(&b.value).unwrap());

        // m1 passes through, m2 aggregates, m3 matches no rule and drops.
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0].value, 1.0);
        assert_eq!(pairs[1].value, 5.0);
    }

    #[test]
    fn main_measurements_merge_common_tags() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let dir = tempfile::tempdir().unwrap();
        let config_manager = Arc::new(ConfigManager::new(
            dir.path().join("global.json"),
            dir.path().join("local.json"),
        ));
        config_manager.add_common_tag("nf.cluster", "c1");
        let offset_clock = Arc::new(OffsetClock::new(clock));
        let registry = Registry::new(60_000, offset_clock.clone());
        let manager =
            SubscriptionManager::new(config_manager.clone(), registry, offset_clock);

        let config = config_manager.config();
        let measurements = vec![Measurement::new(Id::new("m1", Tags::new()), 0, 1.0)];
        let pairs = manager.main_measurements(&config, &measurements);

        assert_eq!(pairs.len(), 1);
        assert_eq!(
            pairs[0].tags.at(interner::intern("nf.cluster")),
            Some(interner::intern("c1"))
        );
    }

    #[test]
    fn subs_are_selected_by_frequency() {
        let clock = Arc::new(ManualClock::new(0, 0));
        let (manager, _registry, _dir) = manager_with_clock(clock);

        manager.swap_subscriptions(
            vec![
                Subscription {
                    id: "a".to_owned(),
                    frequency: 10_000,
                    expression: ":true,:all".to_owned(),
                },
                Subscription {
                    id: "b".to_owned(),
                    frequency: 5_000,
                    expression: ":true,:all".to_owned(),
                },
            ],
            None,
        );

        let subs = manager.subs_for_frequency(10_000);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].id, "a");
    }

    #[tokio::test]
    async fn drain_runs_one_synthetic_publish() {
        // A system-clock manager pointed at an unroutable endpoint: drain
        // must advance the offset clock and complete without hanging.
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("local.json");
        std::fs::write(
            &local,
            r#"{"publishUrl": "http://127.0.0.1:1/api/v1/publish", "readTimeout": 1}"#,
        )
        .unwrap();
        let config_manager = Arc::new(ConfigManager::new(dir.path().join("global.json"), local));
        let offset_clock = Arc::new(OffsetClock::new(Arc::new(SystemClock)));
        let registry = Registry::new(60_000, offset_clock.clone());
        registry
            .counter(Id::new("requests", Tags::new()))
            .increment();

        let manager = SubscriptionManager::new(config_manager, registry, offset_clock);
        manager.request_stop();
        manager.drain().await;
        assert!(!manager.is_running());
    }
}
