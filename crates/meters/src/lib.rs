//! Measurement primitives and the registries that hold them: interval
//! (step) aggregation, the full meter roster, idle expiration, and the
//! consolidation of fast-cadence samples into slow-cadence ones.

pub mod bucket_functions;
pub mod percentile_buckets;
pub mod validation;

mod bucket_meters;
mod clock;
mod consolidation;
mod counter;
mod dist_summary;
mod function_gauge;
mod gauge;
mod id;
mod interval_counter;
mod long_task_timer;
mod measurement;
mod meter;
mod monotonic_counter;
mod percentile_meters;
mod registry;
mod step;
mod tags;
mod timer;

pub use bucket_meters::{BucketCounter, BucketDistributionSummary, BucketTimer};
pub use clock::{Clock, ManualClock, OffsetClock, SystemClock};
pub use consolidation::ConsolidationRegistry;
pub use counter::{Counter, DoubleCounter};
pub use dist_summary::{DistributionSummary, DoubleDistributionSummary};
pub use function_gauge::FunctionGauge;
pub use gauge::{Gauge, MaxGauge};
pub use id::{statistic, with_default_gauge_tags, with_default_tag, Id, IdPtr};
pub use interval_counter::IntervalCounter;
pub use long_task_timer::LongTaskTimer;
pub use measurement::Measurement;
pub use meter::{Meter, MAX_IDLE_MILLIS};
pub use monotonic_counter::MonotonicCounter;
pub use percentile_meters::{PercentileDistributionSummary, PercentileTimer};
pub use registry::Registry;
pub use step::{StepDouble, StepLong, StepNumber, StepValue};
pub use tags::{Tag, Tags, MAX_TAGS};
pub use timer::Timer;
