use crate::bucket_functions::BucketFunction;
use crate::id::IdPtr;
use crate::measurement::Measurement;
use crate::meter::{LastUpdated, Meter};
use crate::registry::Registry;
use crate::tags::Tag;
use interner::intern;
use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Duration;

fn bucket_tag(function: &BucketFunction, amount: i64) -> Tag {
    Tag::of(intern("bucket"), function(amount))
}

/// Counts recorded amounts per histogram bucket. Each recording increments
/// a registry counter tagged with the bucket label; this meter itself
/// reports nothing.
pub struct BucketCounter {
    id: IdPtr,
    updated: LastUpdated,
    registry: Weak<Registry>,
    bucket_function: BucketFunction,
}

impl BucketCounter {
    pub fn new(registry: &Arc<Registry>, id: IdPtr, bucket_function: BucketFunction) -> Self {
        BucketCounter {
            id,
            updated: LastUpdated::new(registry.clock().clone()),
            registry: Arc::downgrade(registry),
            bucket_function,
        }
    }

    pub fn record(&self, amount: i64) {
        if let Some(registry) = self.registry.upgrade() {
            let tag = bucket_tag(&self.bucket_function, amount);
            registry.counter(self.id.with_tag(tag)).increment();
        }
        self.updated.touch();
    }
}

impl Meter for BucketCounter {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    fn measure(&self) -> Vec<Measurement> {
        Vec::new()
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "BucketCounter"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Times events per histogram bucket, delegating to a registry timer
/// tagged with the bucket label.
pub struct BucketTimer {
    id: IdPtr,
    updated: LastUpdated,
    registry: Weak<Registry>,
    bucket_function: BucketFunction,
}

impl BucketTimer {
    pub fn new(registry: &Arc<Registry>, id: IdPtr, bucket_function: BucketFunction) -> Self {
        BucketTimer {
            id,
            updated: LastUpdated::new(registry.clock().clone()),
            registry: Arc::downgrade(registry),
            bucket_function,
        }
    }

    pub fn record(&self, duration: Duration) {
        if let Some(registry) = self.registry.upgrade() {
            let tag = bucket_tag(&self.bucket_function, duration.as_nanos() as i64);
            registry.timer(self.id.with_tag(tag)).record(duration);
        }
        self.updated.touch();
    }
}

impl Meter for BucketTimer {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    fn measure(&self) -> Vec<Measurement> {
        Vec::new()
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "BucketTimer"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Distribution summary per histogram bucket, delegating to a registry
/// summary tagged with the bucket label.
pub struct BucketDistributionSummary {
    id: IdPtr,
    updated: LastUpdated,
    registry: Weak<Registry>,
    bucket_function: BucketFunction,
}

impl BucketDistributionSummary {
    pub fn new(registry: &Arc<Registry>, id: IdPtr, bucket_function: BucketFunction) -> Self {
        BucketDistributionSummary {
            id,
            updated: LastUpdated::new(registry.clock().clone()),
            registry: Arc::downgrade(registry),
            bucket_function,
        }
    }

    pub fn record(&self, amount: i64) {
        if let Some(registry) = self.registry.upgrade() {
            let tag = bucket_tag(&self.bucket_function, amount);
            registry
                .distribution_summary(self.id.with_tag(tag))
                .record(amount);
        }
        self.updated.touch();
    }
}

impl Meter for BucketDistributionSummary {
    fn id(&self) -> &IdPtr {
        &self.id
    }

    fn measure(&self) -> Vec<Measurement> {
        Vec::new()
    }

    fn has_expired(&self) -> bool {
        self.updated.has_expired()
    }

    fn kind(&self) -> &'static str {
        "BucketDistributionSummary"
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
