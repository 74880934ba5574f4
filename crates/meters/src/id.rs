use crate::tags::{Tag, Tags};
use interner::{intern, Symbol};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Identity of a metric: a name plus a set of tags. Identities compare and
/// hash by content; the hash is computed once and cached.
#[derive(Debug)]
pub struct Id {
    name: Symbol,
    tags: Tags,
    // 0 means "not yet computed", matching the lazy-hash convention.
    hash: AtomicU64,
}

pub type IdPtr = Arc<Id>;

impl Id {
    pub fn new(name: &str, tags: Tags) -> IdPtr {
        Arc::new(Id {
            name: intern(name),
            tags,
            hash: AtomicU64::new(0),
        })
    }

    pub fn of(name: Symbol, tags: Tags) -> IdPtr {
        Arc::new(Id {
            name,
            tags,
            hash: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> Symbol {
        self.name
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// A copy of this identity with one additional tag.
    pub fn with_tag(&self, tag: Tag) -> IdPtr {
        let mut tags = self.tags.clone();
        tags.add_tag(tag);
        Id::of(self.name, tags)
    }

    fn cached_hash(&self) -> u64 {
        let mut h = self.hash.load(Ordering::Relaxed);
        if h == 0 {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            self.name.hash(&mut hasher);
            h = self.tags.content_hash() ^ hasher.finish();
            self.hash.store(h, Ordering::Relaxed);
        }
        h
    }
}

impl Clone for Id {
    fn clone(&self) -> Self {
        Id {
            name: self.name,
            tags: self.tags.clone(),
            hash: AtomicU64::new(self.hash.load(Ordering::Relaxed)),
        }
    }
}

impl PartialEq for Id {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.tags == other.tags
    }
}

impl Eq for Id {}

impl Hash for Id {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.cached_hash());
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Id({}", self.name)?;
        for (k, v) in self.tags.iter() {
            write!(f, ", {}={}", k, v)?;
        }
        write!(f, ")")
    }
}

/// Well-known values for the `statistic` tag.
pub mod statistic {
    use crate::tags::Tag;

    pub fn count() -> Tag {
        Tag::new("statistic", "count")
    }
    pub fn gauge() -> Tag {
        Tag::new("statistic", "gauge")
    }
    pub fn total_time() -> Tag {
        Tag::new("statistic", "totalTime")
    }
    pub fn total_amount() -> Tag {
        Tag::new("statistic", "totalAmount")
    }
    pub fn max() -> Tag {
        Tag::new("statistic", "max")
    }
    pub fn total_of_squares() -> Tag {
        Tag::new("statistic", "totalOfSquares")
    }
    pub fn duration() -> Tag {
        Tag::new("statistic", "duration")
    }
    pub fn active_tasks() -> Tag {
        Tag::new("statistic", "activeTasks")
    }
    pub fn percentile() -> Tag {
        Tag::new("statistic", "percentile")
    }
}

/// Add `default_tag` unless the identity already carries its key.
pub fn with_default_tag(id: &IdPtr, default_tag: Tag) -> IdPtr {
    if id.tags().has(default_tag.key) {
        id.clone()
    } else {
        id.with_tag(default_tag)
    }
}

/// Gauge identities carry `atlas.dstype=gauge` in addition to their
/// statistic so the backend treats them as spot values rather than rates.
pub fn with_default_gauge_tags(id: &IdPtr, stat: Tag) -> IdPtr {
    let with_stat = with_default_tag(id, stat);
    with_default_tag(&with_stat, Tag::new("atlas.dstype", "gauge"))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(id: &Id) -> u64 {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn equality_is_by_content() {
        let a = Id::new("m1", vec![("k1", "v1")].into());
        let b = Id::new("m1", vec![("k1", "v1")].into());
        let c = Id::new("m1", vec![("k1", "v2")].into());

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn with_tag_leaves_original_untouched() {
        let a = Id::new("m1", Tags::new());
        let b = a.with_tag(statistic::count());

        assert_eq!(a.tags().len(), 0);
        assert_eq!(b.tags().len(), 1);
        assert_ne!(*a, *b);
    }

    #[test]
    fn default_tag_does_not_override() {
        let id = Id::new("m1", vec![("statistic", "totalTime")].into());
        let tagged = with_default_tag(&id, statistic::count());

        assert_eq!(
            tagged.tags().at(interner::intern("statistic")),
            Some(interner::intern("totalTime"))
        );
    }

    #[test]
    fn gauge_tags() {
        let id = Id::new("g", Tags::new());
        let tagged = with_default_gauge_tags(&id, statistic::gauge());

        assert_eq!(
            tagged.tags().at(interner::intern("atlas.dstype")),
            Some(interner::intern("gauge"))
        );
        assert_eq!(
            tagged.tags().at(interner::intern("statistic")),
            Some(interner::intern("gauge"))
        );
    }
}
