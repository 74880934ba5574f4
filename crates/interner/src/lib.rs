use lazy_static::lazy_static;
use std::collections::HashSet;
use std::sync::Mutex;

/// An interned string. Two symbols are equal if and only if the strings
/// they denote are byte-equal, which makes equality and hashing O(1)
/// pointer operations. Symbols live for the life of the process.
#[derive(Clone, Copy)]
pub struct Symbol(&'static str);

lazy_static! {
    // The pool only ever grows. Strings are leaked on first use so that
    // symbols can hand out 'static references without re-locking.
    static ref POOL: Mutex<HashSet<&'static str>> = Mutex::new(HashSet::new());
}

/// Intern `s`, returning its canonical Symbol.
pub fn intern(s: &str) -> Symbol {
    let mut pool = POOL.lock().expect("intern pool is never poisoned");

    if let Some(existing) = pool.get(s) {
        return Symbol(existing);
    }
    let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
    pool.insert(leaked);
    Symbol(leaked)
}

/// Number of distinct strings currently interned.
pub fn pool_size() -> usize {
    POOL.lock().expect("intern pool is never poisoned").len()
}

impl Symbol {
    pub fn as_str(&self) -> &'static str {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        // Interning guarantees one allocation per distinct string.
        std::ptr::eq(self.0.as_ptr(), other.0.as_ptr())
    }
}

impl Eq for Symbol {}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Allocations are aligned, so the low bits carry no entropy.
        state.write_usize(self.0.as_ptr() as usize >> 4);
    }
}

// Ordering is by content. This is consistent with pointer equality because
// the pool holds at most one allocation per distinct string.
impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(other.0)
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl serde::Serialize for Symbol {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Symbol {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(intern(&s))
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        intern(s)
    }
}
