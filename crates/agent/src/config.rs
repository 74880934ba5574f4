use crate::environment::{default_common_tags, expand_env_vars};
use meters::Tags;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Cadence of the main publish path.
pub const MAIN_FREQUENCY_MILLIS: i64 = 60_000;

const DEFAULT_EVALUATE_URL: &str =
    "http://atlas-lwcapi-iep.$EC2_REGION.iep$NETFLIX_ENVIRONMENT.netflix.net/lwc/api/v1/evaluate";
const DEFAULT_SUBSCRIPTIONS_URL: &str =
    "http://atlas-lwcapi-iep.$EC2_REGION.iep$NETFLIX_ENVIRONMENT.netflix.net/lwc/api/v1/expressions/$NETFLIX_CLUSTER";
const DEFAULT_PUBLISH_URL: &str =
    "http://atlas-pub-$EC2_OWNER_ID.$EC2_REGION.iep$NETFLIX_ENVIRONMENT.netflix.net/api/v1/publish-fast";
const DEFAULT_CHECK_CLUSTER_URL: &str =
    "http://atlas-alert-api-$EC2_OWNER_ID.$EC2_REGION.$NETFLIX_ENVIRONMENT.netflix.net/alertchecker/checkCluster/$NETFLIX_CLUSTER";

const DEFAULT_DISABLED_FILE: &str = "/mnt/data/atlas.disabled";

pub const GLOBAL_CONFIG_FILE: &str = "/usr/local/etc/atlas-config.json";
pub const LOCAL_CONFIG_FILE: &str = "./atlas-config.json";

/// How often the config files are re-read.
pub const CONFIG_REFRESH_MILLIS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Timeouts in seconds.
    pub connect_timeout: u64,
    pub read_timeout: u64,
    pub batch_size: usize,
    pub send_in_parallel: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            connect_timeout: 6,
            read_timeout: 20,
            batch_size: 10_000,
            send_in_parallel: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub subscriptions: String,
    pub publish: String,
    pub evaluate: String,
    pub check_cluster: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            subscriptions: expand_env_vars(DEFAULT_SUBSCRIPTIONS_URL),
            publish: expand_env_vars(DEFAULT_PUBLISH_URL),
            evaluate: expand_env_vars(DEFAULT_EVALUATE_URL),
            check_cluster: expand_env_vars(DEFAULT_CHECK_CLUSTER_URL),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub verbosity: i32,
    pub max_size: u64,
    pub max_files: u64,
    pub dump_metrics: bool,
    pub dump_subscriptions: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            verbosity: 2,
            max_size: 1024 * 1024,
            max_files: 8,
            dump_metrics: false,
            dump_subscriptions: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeaturesConfig {
    pub force_start: bool,
    pub validate: bool,
    pub main: bool,
    pub subscriptions: bool,
    pub notify_alert_server: bool,
    pub subscription_refresh_ms: i64,
    pub publish_config: Vec<String>,
    pub disabled_file: PathBuf,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        FeaturesConfig {
            force_start: false,
            validate: true,
            // Main is on by default; subscriptions are opt-in.
            main: true,
            subscriptions: false,
            notify_alert_server: false,
            subscription_refresh_ms: 10_000,
            publish_config: vec![":true,:all".to_owned()],
            disabled_file: std::env::var("ATLAS_DISABLED_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DISABLED_FILE)),
        }
    }
}

/// One immutable snapshot of the agent configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub features: FeaturesConfig,
    pub endpoints: EndpointConfig,
    pub logs: LogConfig,
    pub http: HttpConfig,
    common_tags: Tags,
}

impl Config {
    fn disabled(&self) -> bool {
        self.features.disabled_file.exists()
    }

    /// Whether the main publish path may send. Existence of the disable
    /// file suppresses traffic while leaving the agent running.
    pub fn is_main_enabled(&self) -> bool {
        !self.disabled() && self.features.main
    }

    pub fn are_subs_enabled(&self) -> bool {
        !self.disabled() && self.features.subscriptions
    }

    pub fn should_notify_alert_server(&self) -> bool {
        self.features.notify_alert_server
    }

    pub fn should_validate_metrics(&self) -> bool {
        self.features.validate
    }

    pub fn should_force_start(&self) -> bool {
        self.features.force_start
    }

    pub fn publish_config(&self) -> &[String] {
        &self.features.publish_config
    }

    pub fn sub_refresh_millis(&self) -> i64 {
        self.features.subscription_refresh_ms
    }

    pub fn common_tags(&self) -> &Tags {
        &self.common_tags
    }
}

// Raw shape of a config file: every key optional, unknown keys ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct ConfigFile {
    evaluate_url: Option<String>,
    subscriptions_url: Option<String>,
    publish_url: Option<String>,
    check_cluster_url: Option<String>,
    validate_metrics: Option<bool>,
    publish_config: Option<Vec<String>>,
    force_start: Option<bool>,
    publish_enabled: Option<bool>,
    subscriptions_enabled: Option<bool>,
    notify_alert_server: Option<bool>,
    dump_metrics: Option<bool>,
    dump_subscriptions: Option<bool>,
    subscriptions_refresh_millis: Option<i64>,
    connect_timeout: Option<u64>,
    read_timeout: Option<u64>,
    batch_size: Option<usize>,
    send_in_parallel: Option<bool>,
    log_verbosity: Option<i32>,
    log_max_size: Option<u64>,
    log_max_files: Option<u64>,
}

impl ConfigFile {
    fn merge_over(self, defaults: &Config) -> Config {
        let mut config = defaults.clone();

        if let Some(url) = self.evaluate_url {
            config.endpoints.evaluate = expand_env_vars(&url);
        }
        if let Some(url) = self.subscriptions_url {
            config.endpoints.subscriptions = expand_env_vars(&url);
        }
        if let Some(url) = self.publish_url {
            config.endpoints.publish = expand_env_vars(&url);
        }
        if let Some(url) = self.check_cluster_url {
            config.endpoints.check_cluster = expand_env_vars(&url);
        }
        if let Some(v) = self.validate_metrics {
            config.features.validate = v;
        }
        if let Some(v) = self.publish_config {
            config.features.publish_config = v;
        }
        if let Some(v) = self.force_start {
            config.features.force_start = v;
        }
        if let Some(v) = self.publish_enabled {
            config.features.main = v;
        }
        if let Some(v) = self.subscriptions_enabled {
            config.features.subscriptions = v;
        }
        if let Some(v) = self.notify_alert_server {
            config.features.notify_alert_server = v;
        }
        if let Some(v) = self.dump_metrics {
            config.logs.dump_metrics = v;
        }
        if let Some(v) = self.dump_subscriptions {
            config.logs.dump_subscriptions = v;
        }
        if let Some(v) = self.subscriptions_refresh_millis {
            config.features.subscription_refresh_ms = v;
        }
        if let Some(v) = self.connect_timeout {
            config.http.connect_timeout = v;
        }
        if let Some(v) = self.read_timeout {
            config.http.read_timeout = v;
        }
        if let Some(v) = self.batch_size {
            config.http.batch_size = v;
        }
        if let Some(v) = self.send_in_parallel {
            config.http.send_in_parallel = v;
        }
        if let Some(v) = self.log_verbosity {
            config.logs.verbosity = v;
        }
        if let Some(v) = self.log_max_size {
            config.logs.max_size = v;
        }
        if let Some(v) = self.log_max_files {
            config.logs.max_files = v;
        }
        config
    }
}

fn parse_file(path: &Path, defaults: Config) -> Config {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return defaults,
    };
    if contents.trim().is_empty() {
        tracing::info!(path = %path.display(), "found an empty config");
        return defaults;
    }
    match serde_json::from_str::<ConfigFile>(&contents) {
        Ok(file) => file.merge_over(&defaults),
        Err(err) => {
            // Parse failures retain the current configuration.
            tracing::error!(path = %path.display(), %err, "failed to parse config");
            defaults
        }
    }
}

/// Owns the live configuration snapshot. A process-wide file and a
/// working-directory file are consulted, the latter overriding the former;
/// both are re-read periodically so edits take effect without a restart.
pub struct ConfigManager {
    global_path: PathBuf,
    local_path: PathBuf,
    current: Mutex<Arc<Config>>,
    extra_common_tags: Mutex<Tags>,
}

impl ConfigManager {
    pub fn new(global_path: impl Into<PathBuf>, local_path: impl Into<PathBuf>) -> Self {
        let manager = ConfigManager {
            global_path: global_path.into(),
            local_path: local_path.into(),
            current: Mutex::new(Arc::new(Config::default())),
            extra_common_tags: Mutex::new(Tags::new()),
        };
        manager.refresh();
        manager
    }

    pub fn config(&self) -> Arc<Config> {
        self.current
            .lock()
            .expect("config snapshot is never poisoned")
            .clone()
    }

    /// Re-read both config files and swap in a fresh snapshot.
    pub fn refresh(&self) {
        let mut defaults = Config {
            common_tags: default_common_tags(),
            ..Config::default()
        };
        {
            let extra = self
                .extra_common_tags
                .lock()
                .expect("common tags are never poisoned");
            defaults.common_tags.add_all(&extra);
        }

        let with_global = parse_file(&self.global_path, defaults);
        let config = parse_file(&self.local_path, with_global);
        tracing::debug!(?config, "refreshed configuration");

        *self
            .current
            .lock()
            .expect("config snapshot is never poisoned") = Arc::new(config);
    }

    /// Add a tag merged into every published measurement, on top of the
    /// environment-derived set.
    pub fn add_common_tag(&self, key: &str, value: &str) {
        self.extra_common_tags
            .lock()
            .expect("common tags are never poisoned")
            .add_str(key, value);
        self.refresh();
    }
}
