//! In-process metrics publication agent. Meters record into a registry;
//! background workers periodically snapshot it, evaluate server-supplied
//! streaming expressions, and deliver batches to the publish and
//! evaluation endpoints.
//!
//! The embedding surface is [`Agent`]: construct one, register meters
//! through [`Agent::registry`], and `start`/`stop` it around the host's
//! lifecycle.

mod agent;
mod config;
mod environment;
mod http;
mod payloads;
mod publisher;
mod subscription;
mod subscriptions;

pub use agent::Agent;
pub use config::{Config, ConfigManager, MAIN_FREQUENCY_MILLIS};
pub use environment::{default_common_tags, expand_env_vars, is_sane_environment};
pub use http::{GetResponse, HttpClient, HttpError};
pub use publisher::Publisher;
pub use subscription::{Subscription, SubscriptionMetric};
pub use subscriptions::SubscriptionManager;

// Re-export the measurement primitives so embedders need only one crate.
pub use interpreter::{Evaluator, TagsValuePair};
pub use meters::{
    Clock, Counter, DistributionSummary, Gauge, Id, IdPtr, ManualClock, MaxGauge, Measurement,
    Registry, SystemClock, Tag, Tags, Timer,
};
