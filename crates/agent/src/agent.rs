use crate::config::{
    Config, ConfigManager, CONFIG_REFRESH_MILLIS, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
    MAIN_FREQUENCY_MILLIS,
};
use crate::environment::{is_sane_environment, safe_getenv, REQUIRED_VARS};
use crate::subscriptions::{initial_main_delay, SubscriptionManager};
use interpreter::TagsValuePair;
use meters::{Clock, Measurement, OffsetClock, Registry, SystemClock, Tags};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct AgentState {
    started: bool,
    runtime: Option<tokio::runtime::Runtime>,
}

/// The embedding facade: owns the registry, the live configuration and
/// the background workers. Construct one per process, `start` it once the
/// host is ready, and `stop` it on the way down to drain a final batch.
pub struct Agent {
    clock: Arc<OffsetClock>,
    registry: Arc<Registry>,
    config_manager: Arc<ConfigManager>,
    manager: Arc<SubscriptionManager>,
    state: Mutex<AgentState>,
}

impl Default for Agent {
    fn default() -> Self {
        Agent::new()
    }
}

impl Agent {
    pub fn new() -> Self {
        let clock = Arc::new(OffsetClock::new(Arc::new(SystemClock)));
        let registry = Registry::new(MAIN_FREQUENCY_MILLIS, clock.clone());
        let config_manager = Arc::new(ConfigManager::new(GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE));
        let manager =
            SubscriptionManager::new(config_manager.clone(), registry.clone(), clock.clone());

        Agent {
            clock,
            registry,
            config_manager,
            manager,
            state: Mutex::new(AgentState {
                started: false,
                runtime: None,
            }),
        }
    }

    /// Borrow the registry to create meters.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The live configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config_manager.config()
    }

    /// Merge a tag into every published measurement.
    pub fn add_common_tag(&self, key: &str, value: &str) {
        self.config_manager.add_common_tag(key, value);
    }

    /// Start the background workers. Refuses to run outside a recognized
    /// environment unless `forceStart` is configured. Idempotent.
    pub fn start(&self) {
        let mut state = self.state.lock().expect("agent state is never poisoned");
        if state.started {
            return;
        }

        let config = self.config_manager.config();
        if !config.should_force_start() && !is_sane_environment() {
            tracing::error!("not sending metrics from a development environment");
            for var in REQUIRED_VARS {
                let value = safe_getenv(var);
                let value = if value.is_empty() { "(null)" } else { &value };
                tracing::info!(var, value, "environment");
            }
            return;
        }

        tracing::info!("initializing agent");
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("atlas-agent")
            .enable_all()
            .build()
            .expect("runtime construction cannot fail with static options");

        self.manager.resume();

        // Config refresher: re-reads the config files while running.
        let config_manager = self.config_manager.clone();
        let manager = self.manager.clone();
        runtime.spawn(async move {
            while manager.is_running() {
                tokio::time::sleep(Duration::from_millis(CONFIG_REFRESH_MILLIS)).await;
                config_manager.refresh();
            }
        });

        runtime.spawn(self.manager.clone().run_refresher());

        let delay = initial_main_delay(self.clock.wall_time());
        runtime.spawn(self.manager.clone().run_main_sender(delay));

        state.runtime = Some(runtime);
        state.started = true;
        tracing::info!("agent initialized");
    }

    /// Stop the workers, flush a final main batch, and tear the runtime
    /// down. Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock().expect("agent state is never poisoned");
        if !state.started {
            tracing::info!("ignoring stop request since we were never started");
            return;
        }

        tracing::info!("stopping agent");
        self.manager.request_stop();
        if let Some(runtime) = state.runtime.take() {
            if self.config_manager.config().is_main_enabled() {
                runtime.block_on(self.manager.drain());
            }
            runtime.shutdown_timeout(Duration::from_secs(2));
        }
        self.clock.set_offset(0);
        state.started = false;
    }

    /// Inject externally produced measurements into the publish path at
    /// the current wall time. Hosts that maintain their own registry use
    /// this instead of `registry()`.
    pub fn push(&self, measurements: &[Measurement]) {
        let handle = {
            let state = self.state.lock().expect("agent state is never poisoned");
            match &state.runtime {
                Some(runtime) => runtime.handle().clone(),
                None => {
                    tracing::warn!("agent is not started, dropping pushed measurements");
                    return;
                }
            }
        };

        let empty = Tags::new();
        let pairs: Vec<TagsValuePair> = measurements
            .iter()
            .map(|m| TagsValuePair::from_measurement(m, &empty))
            .collect();
        let now = self.clock.wall_time();
        handle.block_on(self.manager.push_measurements(now, &pairs));
    }

    /// Log to stderr at the given verbosity (0=error .. 4=trace).
    pub fn use_console_logger(&self, verbosity: i32) {
        let _ = tracing_subscriber::fmt()
            .with_max_level(verbosity_to_level(verbosity))
            .try_init();
    }

    /// Log to `<dir>/atlas-agent.log` in the first of the given
    /// directories that is writable.
    pub fn set_logging_dirs(&self, dirs: &[String]) {
        let verbosity = self.config_manager.config().logs.verbosity;
        for dir in dirs {
            let path = std::path::Path::new(dir).join("atlas-agent.log");
            match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
                Ok(file) => {
                    let _ = tracing_subscriber::fmt()
                        .with_max_level(verbosity_to_level(verbosity))
                        .with_writer(Arc::new(file))
                        .with_ansi(false)
                        .try_init();
                    return;
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), %err, "unable to open log file");
                }
            }
        }
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        let started = self
            .state
            .lock()
            .map(|state| state.started)
            .unwrap_or(false);
        if started {
            self.stop();
        }
    }
}

fn verbosity_to_level(verbosity: i32) -> tracing::Level {
    match verbosity {
        i32::MIN..=0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        3 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}
